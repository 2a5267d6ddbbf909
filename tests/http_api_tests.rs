mod support;

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use sqlgate::db::TableInfo;
use sqlgate::gateway::{Gateway, GatewaySettings};
use sqlgate::identity::{IdentityProvider, Principal, Role, StaticTokenProvider, TokenEntry};
use sqlgate::server::{router, AppState};
use sqlgate::value::CellValue;

use support::ScriptedProvider;

struct Guard(JoinHandle<()>);
impl Drop for Guard {
    fn drop(&mut self) { self.0.abort(); }
}

fn entry(token: &str, id: i64, username: &str, role: Role, is_active: bool) -> TokenEntry {
    TokenEntry { token: token.into(), id, username: username.into(), role, is_active }
}

// Serve the router on an ephemeral localhost port. Returns (guard, base_url).
async fn start(provider: Arc<ScriptedProvider>, legacy_query: bool) -> (Guard, String) {
    let identity = StaticTokenProvider::from_entries(vec![
        entry("t-admin", 1, "admin", Role::Admin, true),
        entry("t-dev", 2, "dev", Role::Developer, true),
        entry("t-user", 3, "viewer", Role::User, true),
        entry("t-gone", 4, "former", Role::Admin, false),
    ])
    .expect("token table");
    let gateway = Gateway::new(provider, &GatewaySettings { max_rows: 100, ..GatewaySettings::default() });
    let app = router(AppState { gateway: Arc::new(gateway), identity: Arc::new(identity) }, legacy_query);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().expect("local addr");
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test server error: {e:?}");
        }
    });
    (Guard(handle), format!("http://{}", addr))
}

async fn post_json(base: &str, path: &str, token: Option<&str>, body: Value) -> reqwest::Response {
    let mut rb = reqwest::Client::new().post(format!("{}{}", base, path)).json(&body);
    if let Some(t) = token {
        rb = rb.bearer_auth(t);
    }
    rb.send().await.expect("request")
}

fn one_row() -> Arc<ScriptedProvider> { Arc::new(ScriptedProvider::rows(&["x"], vec![vec![CellValue::Int(1)]])) }

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_route_needs_no_token() {
    let (_g, base) = start(one_row(), false).await;
    let resp = reqwest::get(format!("{}/", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "sqlgate ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_unknown_or_inactive_credentials_are_401() {
    let provider = one_row();
    let (_g, base) = start(provider.clone(), false).await;
    for (token, code) in [(None, "no_credentials"), (Some("bogus"), "invalid_credentials"), (Some("t-gone"), "inactive_user")] {
        let resp = post_json(&base, "/execute", token, json!({"query": "SELECT 1 AS x"})).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["kind"], "unauthenticated");
        assert_eq!(body["code"], code);
    }
    assert!(!provider.contacted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execute_returns_columnar_result() {
    let (_g, base) = start(one_row(), false).await;
    let resp = post_json(&base, "/execute", Some("t-dev"), json!({"query": "-- note\nSELECT 1 AS x", "params": {}})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"columns": ["x"], "data": [{"x": 1}], "row_count": 1, "truncated": false}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn error_bodies_carry_kind_code_and_status() {
    let (_g, base) = start(one_row(), false).await;

    let resp = post_json(&base, "/execute", Some("t-user"), json!({"query": "SELECT 1"})).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "role_denied");
    assert_eq!(body["kind"], "authorization_denied");
    assert_eq!(body["retriable"], false);

    let resp = post_json(&base, "/execute", Some("t-dev"), json!({"query": "SELECT pg_sleep(100)"})).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Function 'pg_sleep' is not allowed for developer role");

    let resp = post_json(&base, "/execute", Some("t-admin"), json!({"query": "   "})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>().await.unwrap()["kind"], "validation_error");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_errors_map_to_http_statuses() {
    let (_g, base) = start(Arc::new(ScriptedProvider::failing("relation \"ghost\" does not exist")), false).await;
    let resp = post_json(&base, "/execute", Some("t-admin"), json!({"query": "SELECT * FROM ghost"})).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_g2, base2) = start(Arc::new(ScriptedProvider::failing("canceling statement due to statement timeout")), false).await;
    let resp = post_json(&base2, "/execute", Some("t-dev"), json!({"query": "SELECT slow()"})).await;
    assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(resp.json::<Value>().await.unwrap()["kind"], "timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_body_is_a_validation_error() {
    let (_g, base) = start(one_row(), false).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/execute", base))
        .bearer_auth("t-admin")
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>().await.unwrap()["code"], "invalid_body");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tables_lists_catalog() {
    let provider = Arc::new(ScriptedProvider::with_tables(vec![TableInfo { table_name: "users".into(), column_count: 3 }]));
    let (_g, base) = start(provider, false).await;
    let resp = reqwest::Client::new().get(format!("{}/tables", base)).bearer_auth("t-dev").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"tables": [{"table_name": "users", "column_count": 3}]}));

    let resp = reqwest::Client::new().get(format!("{}/tables", base)).bearer_auth("t-user").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_returns_xlsx_attachment() {
    let provider = Arc::new(ScriptedProvider::rows(
        &["id", "amount"],
        vec![vec![CellValue::Int(1), CellValue::Numeric("12.50".into())], vec![CellValue::Int(2), CellValue::Null]],
    ));
    let (_g, base) = start(provider, false).await;
    let resp = post_json(&base, "/export", Some("t-dev"), json!({"sql": "SELECT id, amount FROM payments", "params": null})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["content-type"],
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    );
    assert_eq!(resp.headers()["content-disposition"], "attachment; filename=\"export.xlsx\"");
    let bytes = resp.bytes().await.unwrap();
    assert!(bytes.starts_with(b"PK"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_validation_happens_before_execution() {
    let provider = one_row();
    let (_g, base) = start(provider.clone(), false).await;
    for sql in ["SELECT 1; SELECT 2", "DELETE FROM t"] {
        let resp = post_json(&base, "/export", Some("t-admin"), json!({"sql": sql})).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{sql}");
    }
    assert!(!provider.contacted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn legacy_query_route_is_opt_in() {
    let (_g, base) = start(one_row(), false).await;
    let resp = post_json(&base, "/query", Some("t-admin"), json!({"query": "select 1 as x"})).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (_g2, base2) = start(one_row(), true).await;
    let resp = post_json(&base2, "/query", Some("t-admin"), json!({"query": "select 1 as x"})).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], json!([{"x": 1}]));
    assert_eq!(body["query"], "select 1 as x");

    let resp = post_json(&base2, "/query", Some("t-admin"), json!({"query": "select 1; drop table t"})).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<Value>().await.unwrap()["message"], "Only safe SELECT queries allowed.");
}

#[test]
fn principal_from_token_entry_keeps_activity_flag() {
    let p = StaticTokenProvider::from_entries(vec![entry("k", 9, "x", Role::Developer, false)]).unwrap();
    let got: Principal = p.resolve("k").unwrap();
    assert!(!got.is_active);
}
