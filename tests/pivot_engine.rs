use stockwide::{
    run_pivot, verify_null_counts, DuplicatePolicy, EngineError, EntityCatalog, EntityId, Field,
    PivotRequest, SqliteSink, TableName, VerificationWarning,
};

type WideRow = (String, Vec<Option<f64>>);

fn sink_with_raw(rows: &[(u32, &str, Option<f64>, Option<i64>)]) -> SqliteSink {
    let sink = SqliteSink::open_in_memory().expect("in-memory sink");
    sink.connection()
        .execute_batch(
            "CREATE TABLE raw (id INTEGER, date TEXT, price REAL, trade_volume INTEGER)",
        )
        .expect("create raw");
    {
        let mut stmt = sink
            .connection()
            .prepare("INSERT INTO raw (id, date, price, trade_volume) VALUES (?1, ?2, ?3, ?4)")
            .expect("prepare insert");
        for (id, date, price, volume) in rows {
            stmt.execute(rusqlite::params![id, date, price, volume])
                .expect("insert raw row");
        }
    }
    sink
}

fn sample_rows() -> Vec<(u32, &'static str, Option<f64>, Option<i64>)> {
    vec![
        (1, "2024-01-01", Some(100.0), Some(1_000)),
        (2, "2024-01-01", Some(50.0), Some(2_000)),
        (1, "2024-01-02", Some(110.0), Some(1_500)),
        (2, "2024-01-02", Some(45.0), Some(2_500)),
    ]
}

fn wide_rows(sink: &SqliteSink, table: &str, catalog: &EntityCatalog) -> Vec<WideRow> {
    let columns: Vec<String> = catalog
        .column_names()
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect();
    let sql = format!(
        "SELECT \"date\", {} FROM \"{table}\" ORDER BY \"date\"",
        columns.join(", ")
    );
    let mut stmt = sink.connection().prepare(&sql).expect("prepare select");
    let rows: Vec<WideRow> = stmt
        .query_map([], |row| {
            let date: String = row.get(0)?;
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                values.push(row.get::<_, Option<f64>>(idx + 1)?);
            }
            Ok((date, values))
        })
        .expect("query wide rows")
        .map(|row| row.expect("wide row"))
        .collect();
    rows
}

fn price_request(batch_size: usize) -> PivotRequest {
    PivotRequest {
        batch_size,
        ..PivotRequest::new(Field::price())
    }
}

fn table_exists(sink: &SqliteSink, table: &str) -> bool {
    sink.connection()
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .expect("sqlite_master lookup")
        > 0
}

#[test]
fn pivots_narrow_prices_into_date_keyed_columns() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    let report = run_pivot(&mut sink, &catalog, &price_request(20)).expect("pivot succeeds");

    assert_eq!(report.source_rows, 4);
    assert_eq!(report.dates_seeded, 2);
    assert_eq!(report.batches_committed, 1);
    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![
            ("2024-01-01".to_string(), vec![Some(100.0), Some(50.0)]),
            ("2024-01-02".to_string(), vec![Some(110.0), Some(45.0)]),
        ]
    );
}

#[test]
fn rerunning_the_pivot_gives_the_same_table() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    run_pivot(&mut sink, &catalog, &price_request(1)).expect("first run");
    let first = wide_rows(&sink, "price_wide", &catalog);
    run_pivot(&mut sink, &catalog, &price_request(1)).expect("second run");

    assert_eq!(wide_rows(&sink, "price_wide", &catalog), first);
}

#[test]
fn batch_size_does_not_change_the_result() {
    let mut rows = Vec::new();
    let dates = ["2024-02-01", "2024-02-02", "2024-02-05"];
    for id in 1..=5_u32 {
        for (day, date) in dates.iter().enumerate() {
            if id == 4 && day == 1 {
                continue;
            }
            rows.push((id, *date, Some(f64::from(id * 10) + day as f64), Some(100)));
        }
    }
    let catalog = EntityCatalog::range(1, 5).expect("catalog");

    let mut reference = None;
    for batch_size in [1, 2, 5, 7] {
        let mut sink = sink_with_raw(&rows);
        let report =
            run_pivot(&mut sink, &catalog, &price_request(batch_size)).expect("pivot succeeds");
        assert_eq!(report.batches_committed, 5_usize.div_ceil(batch_size));

        let snapshot = wide_rows(&sink, "price_wide", &catalog);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1].1[3], None);
        match &reference {
            None => reference = Some(snapshot),
            Some(expected) => assert_eq!(&snapshot, expected, "batch_size={batch_size}"),
        }
    }
}

#[test]
fn dates_come_from_every_entity_not_only_the_first() {
    let mut sink = sink_with_raw(&[
        (1, "2024-01-01", Some(1.0), None),
        (2, "2024-01-01", Some(2.0), None),
        (2, "2024-01-02", Some(3.0), None),
    ]);
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    run_pivot(&mut sink, &catalog, &price_request(20)).expect("pivot succeeds");

    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![
            ("2024-01-01".to_string(), vec![Some(1.0), Some(2.0)]),
            ("2024-01-02".to_string(), vec![None, Some(3.0)]),
        ]
    );
}

#[test]
fn entity_without_rows_yields_an_all_null_column() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 3).expect("catalog");

    run_pivot(&mut sink, &catalog, &price_request(2)).expect("pivot succeeds");
    let table = TableName::parse("price_wide").expect("table");
    let report = verify_null_counts(&mut sink, &table, &catalog, false).expect("verify");

    assert_eq!(report.total_rows, 2);
    assert_eq!(report.null_counts[0].1, 0);
    assert_eq!(report.null_counts[2].1, 2);
    assert_eq!(
        report.warnings,
        vec![VerificationWarning::AllNull {
            column: EntityId(3).column_name()
        }]
    );
}

#[test]
fn trade_volume_columns_are_stored_as_integers() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    let report = run_pivot(&mut sink, &catalog, &PivotRequest::new(Field::trade_volume()))
        .expect("pivot succeeds");
    assert_eq!(report.table.to_string(), "trade_volume_wide");

    let (value, kind): (i64, String) = sink
        .connection()
        .query_row(
            "SELECT \"stk_2\", typeof(\"stk_2\") FROM trade_volume_wide WHERE \"date\" = '2024-01-02'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("volume cell");
    assert_eq!(value, 2_500);
    assert_eq!(kind, "integer");
}

#[test]
fn empty_source_fails_before_touching_the_target() {
    let mut sink = sink_with_raw(&[]);
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    let err = run_pivot(&mut sink, &catalog, &price_request(20)).expect_err("empty source");

    assert!(matches!(err, EngineError::EmptySource { .. }));
    assert!(!table_exists(&sink, "price_wide"));
}

#[test]
fn schema_qualified_source_tables_are_supported() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    let request = PivotRequest {
        source_table: TableName::parse("main.raw").expect("qualified table"),
        ..price_request(1)
    };

    run_pivot(&mut sink, &catalog, &request).expect("pivot succeeds");
    assert_eq!(wide_rows(&sink, "price_wide", &catalog).len(), 2);
}

#[test]
fn target_naming_the_source_is_rejected_and_leaves_it_intact() {
    let mut sink = SqliteSink::open_in_memory().expect("in-memory sink");
    sink.connection()
        .execute_batch(
            "CREATE TABLE price_wide (id INTEGER, date TEXT, price REAL, trade_volume INTEGER);
             INSERT INTO price_wide VALUES (1, '2024-01-01', 10.0, 5), (2, '2024-01-01', 20.0, 6);",
        )
        .expect("seed narrow rows under the wide name");
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    let request = PivotRequest {
        source_table: TableName::parse("main.price_wide").expect("table"),
        ..price_request(1)
    };

    let err = run_pivot(&mut sink, &catalog, &request).expect_err("name conflict");

    assert!(matches!(err, EngineError::NameConflict { .. }));
    let rows: i64 = sink
        .connection()
        .query_row("SELECT COUNT(*) FROM price_wide", [], |row| row.get(0))
        .expect("count source rows");
    assert_eq!(rows, 2);
}

#[test]
fn target_in_unknown_schema_is_a_schema_error() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    let request = PivotRequest {
        target_table: TableName::parse("missing_db.price_wide").expect("table"),
        ..price_request(1)
    };

    let err = run_pivot(&mut sink, &catalog, &request).expect_err("unknown schema");

    match err {
        EngineError::Schema { table, source } => {
            assert_eq!(table.to_string(), "missing_db.price_wide");
            assert!(source.to_string().contains("missing_db"), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }
    let rows: i64 = sink
        .connection()
        .query_row("SELECT COUNT(*) FROM raw", [], |row| row.get(0))
        .expect("count raw rows");
    assert_eq!(rows, 4);
}

fn duplicated_rows() -> Vec<(u32, &'static str, Option<f64>, Option<i64>)> {
    vec![
        (1, "2024-01-01", Some(100.0), Some(10)),
        (1, "2024-01-01", Some(90.0), Some(20)),
        (2, "2024-01-01", Some(50.0), Some(30)),
    ]
}

#[test]
fn max_policy_keeps_the_largest_duplicate() {
    let mut sink = sink_with_raw(&duplicated_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");

    run_pivot(&mut sink, &catalog, &price_request(20)).expect("pivot succeeds");
    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![("2024-01-01".to_string(), vec![Some(100.0), Some(50.0)])]
    );
}

#[test]
fn latest_policy_keeps_the_last_ingested_duplicate() {
    let mut sink = sink_with_raw(&duplicated_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    let request = PivotRequest {
        duplicate_policy: DuplicatePolicy::Latest,
        ..price_request(20)
    };

    run_pivot(&mut sink, &catalog, &request).expect("pivot succeeds");
    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![("2024-01-01".to_string(), vec![Some(90.0), Some(50.0)])]
    );
}

#[test]
fn reject_policy_fails_on_duplicates_and_leaves_columns_empty() {
    let mut sink = sink_with_raw(&duplicated_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    let request = PivotRequest {
        duplicate_policy: DuplicatePolicy::Reject,
        ..price_request(20)
    };

    let err = run_pivot(&mut sink, &catalog, &request).expect_err("duplicates rejected");
    match err {
        EngineError::DuplicateRecords {
            batch_index,
            first_column,
            entity,
            date,
            count,
            ..
        } => {
            assert_eq!(batch_index, 0);
            assert_eq!(first_column.as_str(), "stk_1");
            assert_eq!(entity, EntityId(1));
            assert_eq!(date, "2024-01-01");
            assert_eq!(count, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![("2024-01-01".to_string(), vec![None, None])]
    );
}

#[test]
fn failing_batch_is_rolled_back_and_reported() {
    let mut sink = sink_with_raw(&sample_rows());
    let catalog = EntityCatalog::range(1, 2).expect("catalog");
    run_pivot(&mut sink, &catalog, &price_request(1)).expect("baseline pivot");

    sink.connection()
        .execute_batch("ALTER TABLE raw RENAME COLUMN price TO px")
        .expect("rename column");
    let err = run_pivot(&mut sink, &catalog, &price_request(1)).expect_err("missing column");

    match err {
        EngineError::BatchExecution {
            batch_index,
            first_column,
            ..
        } => {
            assert_eq!(batch_index, 0);
            assert_eq!(first_column.as_str(), "stk_1");
        }
        other => panic!("unexpected error: {other}"),
    }
    let autocommit = sink.connection().is_autocommit();
    assert!(autocommit, "no transaction may stay open after a failed batch");
    assert_eq!(
        wide_rows(&sink, "price_wide", &catalog),
        vec![
            ("2024-01-01".to_string(), vec![None, None]),
            ("2024-01-02".to_string(), vec![None, None]),
        ]
    );
}
