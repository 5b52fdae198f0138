//! Order-preserving, fixed-size partitioning of the entity catalog.

use thiserror::Error;

use crate::catalog::{EntityId, WideColumnName};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    #[error("invalid batch size: must be >= 1")]
    InvalidBatchSize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub entities: Vec<EntityId>,
}

impl Batch {
    pub fn first(&self) -> EntityId {
        self.entities[0]
    }

    pub fn last(&self) -> EntityId {
        self.entities[self.entities.len() - 1]
    }

    pub fn column_names(&self) -> Vec<WideColumnName> {
        self.entities.iter().map(|id| id.column_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Splits `ids` into `ceil(len / batch_size)` contiguous batches; only the last
/// one may be short. Batches are never empty.
pub fn partition_catalog(ids: &[EntityId], batch_size: usize) -> Result<Vec<Batch>, PartitionError> {
    if batch_size == 0 {
        return Err(PartitionError::InvalidBatchSize);
    }

    Ok(ids
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            entities: chunk.to_vec(),
        })
        .collect())
}
