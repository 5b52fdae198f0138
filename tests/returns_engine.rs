use stockwide::{
    run_pivot, run_returns, verify_null_counts, EngineError, EntityCatalog, Field, PivotRequest,
    ReturnsRequest, SqliteSink, TableName,
};

const TOLERANCE: f64 = 1e-9;

fn sink_with_wide(create_sql: &str, rows: &[(&str, Option<f64>, Option<f64>)]) -> SqliteSink {
    let sink = SqliteSink::open_in_memory().expect("in-memory sink");
    sink.connection()
        .execute_batch(create_sql)
        .expect("create wide table");
    {
        let mut stmt = sink
            .connection()
            .prepare("INSERT INTO price_wide (\"date\", stk_1, stk_2) VALUES (?1, ?2, ?3)")
            .expect("prepare insert");
        for (date, a, b) in rows {
            stmt.execute(rusqlite::params![date, a, b])
                .expect("insert wide row");
        }
    }
    sink
}

fn real_wide(rows: &[(&str, Option<f64>, Option<f64>)]) -> SqliteSink {
    sink_with_wide(
        "CREATE TABLE price_wide (\"date\" TEXT NOT NULL PRIMARY KEY, stk_1 REAL, stk_2 REAL)",
        rows,
    )
}

fn returns(sink: &SqliteSink) -> Vec<(String, Option<f64>, Option<f64>)> {
    let mut stmt = sink
        .connection()
        .prepare("SELECT \"date\", stk_1, stk_2 FROM stock_returns ORDER BY \"date\"")
        .expect("prepare select");
    let rows: Vec<(String, Option<f64>, Option<f64>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .expect("query returns")
        .map(|row| row.expect("returns row"))
        .collect();
    rows
}

fn assert_close(actual: Option<f64>, expected: Option<f64>) {
    match (actual, expected) {
        (Some(a), Some(e)) => assert!((a - e).abs() < TOLERANCE, "{a} != {e}"),
        (None, None) => {}
        other => panic!("mismatch: {other:?}"),
    }
}

fn catalog() -> EntityCatalog {
    EntityCatalog::range(1, 2).expect("catalog")
}

#[test]
fn computes_one_lag_percent_change_per_column() {
    let mut sink = real_wide(&[
        ("2024-01-01", Some(100.0), Some(50.0)),
        ("2024-01-02", Some(110.0), Some(45.0)),
    ]);

    let report = run_returns(&mut sink, &catalog(), &ReturnsRequest::default())
        .expect("returns succeed");
    assert_eq!(report.dates_seeded, 2);

    let rows = returns(&sink);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "2024-01-01");
    assert_close(rows[0].1, None);
    assert_close(rows[0].2, None);
    assert_close(rows[1].1, Some(10.0));
    assert_close(rows[1].2, Some(-10.0));
}

#[test]
fn zero_or_missing_previous_values_yield_null() {
    let mut sink = real_wide(&[
        ("2024-01-01", Some(0.0), Some(10.0)),
        ("2024-01-02", Some(5.0), None),
        ("2024-01-03", Some(10.0), Some(12.0)),
        ("2024-01-04", None, Some(6.0)),
    ]);

    run_returns(&mut sink, &catalog(), &ReturnsRequest::default()).expect("returns succeed");

    let rows = returns(&sink);
    assert_close(rows[1].1, None);
    assert_close(rows[2].1, Some(100.0));
    assert_close(rows[3].1, None);
    assert_close(rows[1].2, None);
    assert_close(rows[2].2, None);
    assert_close(rows[3].2, Some(-50.0));
}

#[test]
fn previous_row_follows_date_order_not_insertion_order() {
    let mut sink = real_wide(&[
        ("2024-01-03", Some(121.0), Some(1.0)),
        ("2024-01-01", Some(100.0), Some(1.0)),
        ("2024-01-02", Some(110.0), Some(1.0)),
    ]);

    run_returns(&mut sink, &catalog(), &ReturnsRequest::default()).expect("returns succeed");

    let rows = returns(&sink);
    assert_close(rows[1].1, Some(10.0));
    assert_close(rows[2].1, Some(10.0));
}

#[test]
fn integer_sources_produce_fractional_returns() {
    let mut sink = sink_with_wide(
        "CREATE TABLE price_wide (\"date\" TEXT NOT NULL PRIMARY KEY, stk_1 INTEGER, stk_2 INTEGER)",
        &[
            ("2024-01-01", Some(3.0), Some(200.0)),
            ("2024-01-02", Some(4.0), Some(150.0)),
        ],
    );

    run_returns(&mut sink, &catalog(), &ReturnsRequest::default()).expect("returns succeed");

    let rows = returns(&sink);
    assert_close(rows[1].1, Some(100.0 / 3.0));
    assert_close(rows[1].2, Some(-25.0));
    let kind: String = sink
        .connection()
        .query_row(
            "SELECT typeof(stk_1) FROM stock_returns WHERE \"date\" = '2024-01-02'",
            [],
            |row| row.get(0),
        )
        .expect("typeof");
    assert_eq!(kind, "real");
}

#[test]
fn empty_wide_table_succeeds_with_no_rows() {
    let mut sink = real_wide(&[]);

    let report =
        run_returns(&mut sink, &catalog(), &ReturnsRequest::default()).expect("returns succeed");

    assert_eq!(report.dates_seeded, 0);
    assert_eq!(report.columns_updated, 2);
    assert!(returns(&sink).is_empty());
}

#[test]
fn returns_into_its_own_source_is_rejected_and_leaves_it_intact() {
    let mut sink = real_wide(&[
        ("2024-01-01", Some(100.0), Some(50.0)),
        ("2024-01-02", Some(110.0), Some(45.0)),
    ]);
    let request = ReturnsRequest {
        target_table: TableName::parse("main.price_wide").expect("table"),
        ..ReturnsRequest::default()
    };

    let err = run_returns(&mut sink, &catalog(), &request).expect_err("name conflict");

    assert!(matches!(err, EngineError::NameConflict { .. }));
    let rows: i64 = sink
        .connection()
        .query_row("SELECT COUNT(*) FROM price_wide", [], |row| row.get(0))
        .expect("count source rows");
    assert_eq!(rows, 2);
}

#[test]
fn one_column_batches_match_a_single_batch() {
    let rows = [
        ("2024-01-01", Some(100.0), Some(50.0)),
        ("2024-01-02", Some(110.0), Some(45.0)),
        ("2024-01-03", Some(99.0), Some(45.0)),
    ];
    let mut single = real_wide(&rows);
    let mut split = real_wide(&rows);

    run_returns(&mut single, &catalog(), &ReturnsRequest::default()).expect("single batch");
    run_returns(
        &mut split,
        &catalog(),
        &ReturnsRequest {
            batch_size: 1,
            ..ReturnsRequest::default()
        },
    )
    .expect("split batches");

    assert_eq!(returns(&single), returns(&split));
}

#[test]
fn pivot_then_returns_end_to_end() {
    let mut sink = SqliteSink::open_in_memory().expect("in-memory sink");
    sink.connection()
        .execute_batch(
            "CREATE TABLE raw (id INTEGER, date TEXT, price REAL, trade_volume INTEGER);
             INSERT INTO raw VALUES
                (1, '2024-01-01', 100.0, 500),
                (1, '2024-01-02', 110.0, 600),
                (2, '2024-01-01', 50.0, 100),
                (2, '2024-01-02', 45.0, 150);",
        )
        .expect("seed raw");

    let pivot = PivotRequest {
        batch_size: 1,
        ..PivotRequest::new(Field::price())
    };
    let returns_request = ReturnsRequest {
        batch_size: 1,
        ..ReturnsRequest::default()
    };
    run_pivot(&mut sink, &catalog(), &pivot).expect("pivot");
    run_returns(&mut sink, &catalog(), &returns_request).expect("returns");

    let rows = returns(&sink);
    assert_eq!(rows.len(), 2);
    assert_close(rows[0].1, None);
    assert_close(rows[0].2, None);
    assert_close(rows[1].1, Some(10.0));
    assert_close(rows[1].2, Some(-10.0));

    let table = TableName::parse("stock_returns").expect("table");
    let report = verify_null_counts(&mut sink, &table, &catalog(), true).expect("verify");
    assert_eq!(report.total_rows, 1);
    assert!(report.is_clean());
}
