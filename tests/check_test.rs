// ABOUTME: Integration tests for the check service against live PostgreSQL databases
// ABOUTME: Set POA_TEST_SRC_URL and POA_TEST_DST_URL to run; tests skip silently otherwise

use std::collections::BTreeSet;
use std::env;

use poa::check::check;
use poa::config::{Api, DbConfig};
use poa::filters::After;
use poa::model::Value;
use poa::sync::{sync, SyncRequest};
use tokio_postgres::NoTls;

fn test_urls() -> Option<(String, String)> {
    let src = env::var("POA_TEST_SRC_URL").ok()?;
    let dst = env::var("POA_TEST_DST_URL").ok()?;
    Some((src, dst))
}

fn db_config(name: &str, conn_str: &str) -> DbConfig {
    DbConfig {
        name: name.to_string(),
        api: Api::Psycopg,
        host: None,
        db_name: Some(name.to_string()),
        username_entry: None,
        password_entry: None,
        connection_string: Some(conn_str.to_string()),
    }
}

async fn connect(conn_str: &str) -> tokio_postgres::Client {
    let (client, connection) = tokio_postgres::connect(conn_str, NoTls)
        .await
        .expect("failed to connect to a test database");
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

#[tokio::test]
async fn test_check_reports_extra_and_missing_keys() {
    let Some((src_url, dst_url)) = test_urls() else {
        return;
    };
    let src = connect(&src_url).await;
    let dst = connect(&dst_url).await;
    let table = "poa_test_check";

    src.batch_execute(&format!(
        "DROP TABLE IF EXISTS public.\"{table}\";
         CREATE TABLE public.\"{table}\" (
             customer_id INT PRIMARY KEY,
             first_name  TEXT NOT NULL
         );
         INSERT INTO public.\"{table}\" (customer_id, first_name)
             VALUES (1, 'Steve'), (2, 'Mandie'), (3, 'Bill')"
    ))
    .await
    .unwrap();
    for suffix in ["", "_staging", "_history"] {
        dst.batch_execute(&format!("DROP TABLE IF EXISTS public.\"{table}{suffix}\""))
            .await
            .unwrap();
    }
    dst.batch_execute(&format!(
        "DELETE FROM poa.table_def WHERE table_name = '{table}'"
    ))
    .await
    .ok();

    let src_config = db_config("pg_src_check", &src_url);
    let dst_config = db_config("dw", &dst_url);

    let request = SyncRequest {
        src_schema_name: Some("public".to_string()),
        src_table_name: table.to_string(),
        dst_schema_name: Some("public".to_string()),
        dst_table_name: table.to_string(),
        pk: vec!["customer_id".to_string()],
        incremental: false,
        compare_cols: BTreeSet::new(),
        increasing_cols: BTreeSet::new(),
        skip_if_row_counts_match: false,
        recreate: false,
        track_history: false,
        after: After::new(),
        batch_size: 1_000,
    };
    sync(&src_config, &dst_config, &request).await.unwrap();

    // Key 4 now exists only at the source; key 3 only at the destination.
    src.batch_execute(&format!(
        "INSERT INTO public.\"{table}\" (customer_id, first_name) VALUES (4, 'New');
         DELETE FROM public.\"{table}\" WHERE customer_id = 3"
    ))
    .await
    .unwrap();

    let result = check(
        &src_config,
        Some("public"),
        table,
        &dst_config,
        Some("public"),
        table,
        &["customer_id".to_string()],
        &After::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.src_rows, 3);
    assert_eq!(result.dst_rows, 3);
    assert_eq!(result.missing_keys.len(), 1);
    assert_eq!(result.extra_keys.len(), 1);

    let missing = result.missing_keys.iter().next().unwrap();
    assert_eq!(missing.get("customer_id"), Some(&Value::Int(4)));
    let extra = result.extra_keys.iter().next().unwrap();
    assert_eq!(extra.get("customer_id"), Some(&Value::Int(3)));
    assert!(!result.is_in_sync());

    // The outcome is persisted through the audit schema.
    let row = dst
        .query_one(
            "SELECT count(*) AS ct FROM poa.check_result WHERE src_table_name = $1",
            &[&table],
        )
        .await
        .unwrap();
    let recorded: i64 = row.get("ct");
    assert!(recorded >= 1);
}

#[tokio::test]
async fn test_check_on_identical_tables_is_in_sync() {
    let Some((src_url, dst_url)) = test_urls() else {
        return;
    };
    let src = connect(&src_url).await;
    let dst = connect(&dst_url).await;
    let table = "poa_test_check_in_sync";

    src.batch_execute(&format!(
        "DROP TABLE IF EXISTS public.\"{table}\";
         CREATE TABLE public.\"{table}\" (
             customer_id INT PRIMARY KEY,
             first_name  TEXT NOT NULL
         );
         INSERT INTO public.\"{table}\" (customer_id, first_name)
             VALUES (1, 'Steve'), (2, 'Mandie')"
    ))
    .await
    .unwrap();
    for suffix in ["", "_staging", "_history"] {
        dst.batch_execute(&format!("DROP TABLE IF EXISTS public.\"{table}{suffix}\""))
            .await
            .unwrap();
    }
    dst.batch_execute(&format!(
        "DELETE FROM poa.table_def WHERE table_name = '{table}'"
    ))
    .await
    .ok();

    let src_config = db_config("pg_src_check2", &src_url);
    let dst_config = db_config("dw", &dst_url);

    let request = SyncRequest {
        src_schema_name: Some("public".to_string()),
        src_table_name: table.to_string(),
        dst_schema_name: Some("public".to_string()),
        dst_table_name: table.to_string(),
        pk: vec!["customer_id".to_string()],
        incremental: false,
        compare_cols: BTreeSet::new(),
        increasing_cols: BTreeSet::new(),
        skip_if_row_counts_match: false,
        recreate: false,
        track_history: false,
        after: After::new(),
        batch_size: 1_000,
    };
    sync(&src_config, &dst_config, &request).await.unwrap();

    let result = check(
        &src_config,
        Some("public"),
        table,
        &dst_config,
        Some("public"),
        table,
        &["customer_id".to_string()],
        &After::new(),
    )
    .await
    .unwrap();

    assert!(result.is_in_sync());
    assert_eq!(result.src_rows, 2);
    assert_eq!(result.dst_rows, 2);
}
