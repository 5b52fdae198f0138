//! Entity catalog: the ordered universe of entity ids and their wide column names.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const COLUMN_PREFIX: &str = "stk_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn get(self) -> u32 {
        self.0
    }

    pub fn column_name(self) -> WideColumnName {
        WideColumnName(format!("{COLUMN_PREFIX}{}", self.0))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wide-table column name for one entity, always `stk_<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WideColumnName(String);

impl WideColumnName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inverse of [`EntityId::column_name`]. Non-canonical spellings such as
    /// `stk_007` are rejected so the mapping stays bijective.
    pub fn parse(raw: &str) -> Option<EntityId> {
        let digits = raw.strip_prefix(COLUMN_PREFIX)?;
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return None;
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u32>().ok().map(EntityId)
    }
}

impl fmt::Display for WideColumnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn column_name(id: EntityId) -> WideColumnName {
    id.column_name()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("entity catalog is empty")]
    Empty,
    #[error("duplicate entity id {0} in catalog")]
    DuplicateId(EntityId),
    #[error("invalid entity id spec '{0}'")]
    InvalidSpec(String),
    #[error("failed to read catalog file {path}: {message}")]
    Read { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCatalog {
    entity_ids: Vec<EntityId>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    entity_ids: Vec<u32>,
}

impl EntityCatalog {
    pub fn new(entity_ids: Vec<EntityId>) -> Result<Self, CatalogError> {
        if entity_ids.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::with_capacity(entity_ids.len());
        for id in &entity_ids {
            if !seen.insert(*id) {
                return Err(CatalogError::DuplicateId(*id));
            }
        }

        Ok(Self { entity_ids })
    }

    /// Contiguous catalog `first..=last`, the shape of the reference deployment (1..=200).
    pub fn range(first: u32, last: u32) -> Result<Self, CatalogError> {
        Self::new((first..=last).map(EntityId).collect())
    }

    pub fn from_spec(spec: &str) -> Result<Self, CatalogError> {
        Self::new(parse_entity_ids(spec)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let read_err = |message: String| CatalogError::Read {
            path: path.display().to_string(),
            message,
        };
        let raw = fs::read_to_string(path).map_err(|err| read_err(err.to_string()))?;
        let parsed: CatalogFile =
            serde_json::from_str(&raw).map_err(|err| read_err(err.to_string()))?;
        Self::new(parsed.entity_ids.into_iter().map(EntityId).collect())
    }

    pub fn ids(&self) -> &[EntityId] {
        &self.entity_ids
    }

    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    pub fn column_names(&self) -> Vec<WideColumnName> {
        self.entity_ids.iter().map(|id| id.column_name()).collect()
    }
}

/// Parses `1-200`, `1,2,5` or mixed forms like `1-10,20` in the given order.
pub fn parse_entity_ids(spec: &str) -> Result<Vec<EntityId>, CatalogError> {
    let invalid = || CatalogError::InvalidSpec(spec.to_string());
    let mut out = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if end < start {
                    return Err(invalid());
                }
                out.extend((start..=end).map(EntityId));
            }
            None => out.push(EntityId(part.parse().map_err(|_| invalid())?)),
        }
    }

    Ok(out)
}
