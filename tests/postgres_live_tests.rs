//! Runs against a real PostgreSQL only when `SQLGATE_TEST_DATABASE_URL` is set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use sqlgate::db::{PgSessionProvider, PoolSettings};
use sqlgate::error::ErrorKind;
use sqlgate::gateway::{Gateway, GatewaySettings, QueryRequest};
use sqlgate::identity::{Principal, Role};
use sqlgate::value::CellValue;

fn live_gateway(settings: GatewaySettings) -> Option<Gateway> {
    let url = match std::env::var("SQLGATE_TEST_DATABASE_URL") {
        Ok(u) if !u.trim().is_empty() => u,
        _ => {
            eprintln!("skipping: SQLGATE_TEST_DATABASE_URL not set");
            return None;
        }
    };
    let provider = PgSessionProvider::connect(&PoolSettings { database_url: url, max_size: 4, wait_timeout: Duration::from_secs(5) })
        .expect("pool");
    Some(Gateway::new(Arc::new(provider), &settings))
}

fn admin() -> Principal { Principal::new(1, "admin", Role::Admin) }
fn developer() -> Principal { Principal::new(2, "dev", Role::Developer) }

fn table_name() -> String { format!("sqlgate_live_{}", uuid::Uuid::new_v4().simple()) }

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binds_named_parameters_and_decodes_types() {
    let Some(gw) = live_gateway(GatewaySettings::default()) else { return };
    let sql = "SELECT :a::int + 1 AS n, :p_date_from::date AS d, 12.50::numeric AS amount, 'x'::text AS s, \
               '{\"k\": [1]}'::jsonb AS j, '2024-01-02 03:04:05+00'::timestamptz AS ts";
    let params = json!({"a": 41}).as_object().cloned();
    let r = gw.execute(&developer(), &QueryRequest::new(sql, params)).await.expect("query");
    assert_eq!(r.columns, vec!["n", "d", "amount", "s", "j", "ts"]);
    let row = &r.rows[0];
    assert_eq!(row[0], CellValue::Int(42));
    assert_eq!(row[1], CellValue::Null);
    assert_eq!(row[2], CellValue::Numeric("12.50".into()));
    assert_eq!(row[3], CellValue::Text("x".into()));
    assert_eq!(row[4], CellValue::Json(json!({"k": [1]})));
    assert!(matches!(row[5], CellValue::TimestampTz(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn writes_commit_for_admin_and_are_refused_for_developer() {
    let Some(gw) = live_gateway(GatewaySettings::default()) else { return };
    let t = table_name();
    let run = |sql: String| QueryRequest::new(sql, None);

    gw.execute(&admin(), &run(format!("CREATE TABLE {t} (id int primary key, note text)"))).await.expect("create");
    let r = gw.execute(&admin(), &run(format!("INSERT INTO {t} VALUES (1, 'a'), (2, 'b')"))).await.expect("insert");
    assert_eq!(r.row_count, 2);

    let err = gw
        .execute(&developer(), &run(format!("WITH gone AS (SELECT 1) DELETE FROM {t}")))
        .await
        .unwrap_err();
    assert_eq!(err.code_str(), "read_only_write");

    let r = gw.execute(&admin(), &run(format!("DELETE FROM {t} WHERE id = -1"))).await.expect("delete none");
    assert_eq!(r.row_count, 0);

    let r = gw.execute(&developer(), &run(format!("SELECT count(*) AS c FROM {t}"))).await.expect("count");
    assert_eq!(r.rows[0][0], CellValue::Int(2));

    let tables = gw.list_tables(&developer()).await.expect("tables");
    let mine = tables.iter().find(|ti| ti.table_name == t).expect("listed");
    assert_eq!(mine.column_count, 2);

    gw.execute(&admin(), &run(format!("DROP TABLE {t}"))).await.expect("drop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_errors_are_classified() {
    let Some(gw) = live_gateway(GatewaySettings::default()) else { return };
    let err = gw.execute(&admin(), &QueryRequest::new("SELEC 1", None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    let err = gw.execute(&admin(), &QueryRequest::new("SELECT * FROM no_such_table_here", None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = gw.execute(&admin(), &QueryRequest::new("SELECT :region::text AS r", None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingParameter);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn developer_statement_timeout_is_enforced() {
    let settings = GatewaySettings { developer_timeout: Some(Duration::from_millis(200)), ..GatewaySettings::default() };
    let Some(gw) = live_gateway(settings) else { return };
    let sql = "SELECT count(*) FROM generate_series(1, 500000000)";
    let err = gw.execute(&developer(), &QueryRequest::new(sql, None)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.http_status(), 408);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn huge_selects_stop_at_the_row_window() {
    let Some(gw) = live_gateway(GatewaySettings { max_rows: 10, ..GatewaySettings::default() }) else { return };
    // A target-list SRF streams, so only the window is ever produced.
    for (who, sql) in [
        (developer(), "SELECT generate_series(1, 300000000) AS n"),
        (admin(), "SELECT generate_series(1, 20000000) AS n"),
    ] {
        let started = Instant::now();
        let r = gw.execute(&who, &QueryRequest::new(sql, None)).await.expect("select");
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert!(r.truncated);
        assert_eq!(r.row_count, 10);
        assert_eq!(r.rows[0][0], CellValue::Int(1));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admin_scripts_run_every_statement() {
    let Some(gw) = live_gateway(GatewaySettings::default()) else { return };
    let t = table_name();
    let script = format!("CREATE TABLE {t} (id int); INSERT INTO {t} VALUES (1); INSERT INTO {t} VALUES (2), (3)");
    let r = gw.execute(&admin(), &QueryRequest::new(script, None)).await.expect("script");
    assert_eq!(r.row_count, 2);

    let r = gw.execute(&developer(), &QueryRequest::new(format!("SELECT count(*) AS c FROM {t}"), None)).await.expect("count");
    assert_eq!(r.rows[0][0], CellValue::Int(3));

    let err = gw.execute(&developer(), &QueryRequest::new(format!("SELECT 1; SELECT * FROM {t}"), None)).await.unwrap_err();
    assert_eq!(err.code_str(), "multiple_statements");

    gw.execute(&admin(), &QueryRequest::new(format!("DROP TABLE {t}"), None)).await.expect("drop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_parameters_bind_to_any() {
    let Some(gw) = live_gateway(GatewaySettings::default()) else { return };
    let sql = "SELECT n FROM generate_series(1, 5) AS n WHERE n = ANY(:ids) ORDER BY n";
    let r = gw.execute(&developer(), &QueryRequest::new(sql, json!({"ids": [1, 2]}).as_object().cloned())).await.expect("any");
    assert_eq!(r.row_count, 2);
    assert_eq!(r.rows, vec![vec![CellValue::Int(1)], vec![CellValue::Int(2)]]);

    let sql = "SELECT s FROM unnest(ARRAY['a', 'b', 'c']) AS s WHERE s = ANY(:names)";
    let r = gw.execute(&developer(), &QueryRequest::new(sql, json!({"names": ["c"]}).as_object().cloned())).await.expect("text any");
    assert_eq!(r.rows, vec![vec![CellValue::Text("c".into())]]);
}
