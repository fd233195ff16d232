use std::collections::HashMap;
use std::time::Duration;

use chrono::{NaiveDate, TimeZone, Utc};
use marlo_contracts::Observation;
use marlo_gateway::config::GatewayConfig;
use marlo_gateway::http;
use marlo_store::PgStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn test_db_url() -> Option<String> {
    std::env::var("MARLO_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

fn obs(group: &str, id: &str, date: &str, value: f64) -> Observation {
    Observation {
        group: group.to_string(),
        id: id.to_string(),
        date: date.parse::<NaiveDate>().expect("valid test date"),
        value,
        fetched_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_gateway_serves_role_gated_and_aggregated_views() {
    let Some(db_url) = test_db_url() else {
        eprintln!("skipping e2e smoke test; set MARLO_TEST_DB_URL to enable");
        return;
    };

    let schema = format!(
        "marlo_smoke_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock after epoch")
            .as_nanos()
    );

    let admin_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");
    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin_pool)
        .await
        .expect("create schema should succeed");
    admin_pool.close().await;

    let scoped_db_url = schema_db_url(&db_url, &schema);

    let config = GatewayConfig::from_kv(&HashMap::from([(
        "MARLO_DB_URL".to_string(),
        scoped_db_url.clone(),
    )]))
    .expect("config should load");

    let app = http::router(config).await.expect("router should build");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("server should run");
    });

    // Seed users and observations directly through the store.
    let store = PgStore::connect(&scoped_db_url, Duration::from_secs(2))
        .await
        .expect("store connect should succeed");
    assert!(store
        .create_user("alice", "tanker")
        .await
        .expect("create alice"));
    assert!(store.create_user("bob", "guest").await.expect("create bob"));
    store
        .append_observations(&[
            obs("bulk", "A", "2024-01-01", 100.0),
            obs("bulk", "A", "2024-01-02", 150.0),
            obs("tanker", "T1", "2024-01-01", 40.0),
            obs("tanker", "T1", "2024-01-02", 0.0),
        ])
        .await
        .expect("seed observations");

    let client = reqwest::Client::new();
    let base = format!("http://{}", addr);

    let health = client
        .get(format!("{base}/healthz"))
        .send()
        .await
        .expect("healthz request");
    assert_eq!(health.status(), 200);

    let ready = client
        .get(format!("{base}/readyz"))
        .send()
        .await
        .expect("readyz request");
    assert_eq!(ready.status(), 200);

    // User management round trip.
    let created = client
        .post(format!("{base}/users"))
        .json(&serde_json::json!({"username": "carol", "role": "bulk"}))
        .send()
        .await
        .expect("create user request");
    assert_eq!(created.status(), 200);

    let duplicate = client
        .post(format!("{base}/users"))
        .json(&serde_json::json!({"username": "carol", "role": "admin"}))
        .send()
        .await
        .expect("duplicate create request");
    assert_eq!(duplicate.status(), 400);
    let body: serde_json::Value = duplicate.json().await.expect("error body");
    assert_eq!(body["code"], "ERR_USERNAME_TAKEN");

    // Role-gated view: alice (tanker) sees only the tanker series.
    let alice = client
        .get(format!("{base}/user-data/alice"))
        .send()
        .await
        .expect("user-data request");
    assert_eq!(alice.status(), 200);
    let body: serde_json::Value = alice.json().await.expect("user-data body");
    assert_eq!(body["message"], "Success");
    let data = body["data"].as_array().expect("data array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["group"], "tanker");
    let points = data[0]["data"].as_array().expect("points array");
    assert_eq!(points[0]["date"], "2024-01-01");
    assert_eq!(points[0]["percentage_difference"], 40.0 * 100.0);
    assert!(points[0].get("yesterday_value").is_none());
    // Day two dropped to zero: forced to 0, not -100.
    assert_eq!(points[1]["yesterday_value"], 40.0);
    assert_eq!(points[1]["percentage_difference"], 0.0);

    let bob = client
        .get(format!("{base}/user-data/bob"))
        .send()
        .await
        .expect("forbidden request");
    assert_eq!(bob.status(), 403);
    let body: serde_json::Value = bob.json().await.expect("error body");
    assert_eq!(body["code"], "ERR_FORBIDDEN_ROLE");

    let ghost = client
        .get(format!("{base}/user-data/ghost"))
        .send()
        .await
        .expect("not-found request");
    assert_eq!(ghost.status(), 404);

    // Whole-store view is not role-gated and spans every group.
    let aggregated = client
        .get(format!("{base}/aggregated-data"))
        .send()
        .await
        .expect("aggregated request");
    assert_eq!(aggregated.status(), 200);
    let body: serde_json::Value = aggregated.json().await.expect("aggregated body");
    let series = body.as_array().expect("series array");
    assert_eq!(series.len(), 2);
    assert_eq!(series[0]["group"], "bulk");
    assert_eq!(series[1]["group"], "tanker");
    let bulk_points = series[0]["data"].as_array().expect("bulk points");
    assert_eq!(bulk_points[1]["yesterday_value"], 100.0);
    assert_eq!(bulk_points[1]["percentage_difference"], 50.0);

    let removed = client
        .delete(format!("{base}/users/carol"))
        .send()
        .await
        .expect("delete request");
    assert_eq!(removed.status(), 200);

    let missing = client
        .delete(format!("{base}/users/carol"))
        .send()
        .await
        .expect("second delete request");
    assert_eq!(missing.status(), 404);

    store.close().await;
    let _ = shutdown_tx.send(());
    server.await.expect("server task should join");
}
