//! MySQL and PostgreSQL integration tests.
//!
//! Run with `TEST_MYSQL_URL` and/or `TEST_POSTGRES_URL` pointing at a
//! scratch database; each test is skipped when its variable is unset.

use dbkit::config::{DatabaseConfig, PoolOptions};
use dbkit::{Database, DbError, Dialect, PageQuery, Record, Value};
use std::time::Duration;

async fn connect(var: &str, dialect: Dialect) -> Option<Database> {
    let Ok(url) = std::env::var(var) else {
        eprintln!("{} not set, skipping", var);
        return None;
    };
    let config = DatabaseConfig::new("server", dialect, url, PoolOptions::with_max_open(4));
    Some(Database::connect(config, Duration::from_secs(30)).await.unwrap())
}

/// Table name unique to this process so parallel runs do not collide.
fn table_name(prefix: &str) -> String {
    format!("{}_{}", prefix, std::process::id())
}

async fn exercise_crud(db: &Database, create_sql: &str, table: &str) {
    db.exec(&format!("DROP TABLE IF EXISTS {}", table), &[])
        .await
        .unwrap();
    db.exec(create_sql, &[]).await.unwrap();

    let mut alice = Record::new().with("name", "Alice").with("age", 30);
    let result = db.save(table, &alice).await.unwrap();
    let id = result.last_insert_id.unwrap();
    assert!(id > 0);

    alice.set("id", id).set("age", 31);
    assert_eq!(db.save(table, &alice).await.unwrap().rows_affected, 1);

    let row = db
        .query_first(&format!("SELECT * FROM {} WHERE id = ?", table), &[id.into()])
        .await
        .unwrap();
    assert_eq!(row.int("age"), 31);

    // NULL binds without a known column type
    db.update(table, &Record::new().with("age", Value::Null), "id = ?", &[id.into()])
        .await
        .unwrap();
    assert!(
        db.query_first(&format!("SELECT age FROM {} WHERE id = ?", table), &[id.into()])
            .await
            .unwrap()
            .get("age")
            .is_null()
    );

    let rows: Vec<Record> = (0..12)
        .map(|i| Record::new().with("name", format!("n{}", i)).with("age", i))
        .collect();
    assert_eq!(db.batch_insert(table, &rows, 5).await.unwrap(), 12);

    let page = db
        .paginate(2, 5, &PageQuery::new(table).order_by("id"), &[])
        .await
        .unwrap();
    assert_eq!(page.total_row, 13);
    assert_eq!(page.total_page, 3);
    assert_eq!(page.list.len(), 5);

    let err = db
        .transaction(|tx| {
            let table = table.to_string();
            Box::pin(async move {
                tx.delete(&table, "", &[]).await?;
                Err::<(), _>(DbError::invalid_input("abort"))
            })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert_eq!(db.count(table, "", &[]).await.unwrap(), 13);

    db.exec(&format!("DROP TABLE {}", table), &[]).await.unwrap();
}

#[tokio::test]
async fn test_mysql_crud_and_pagination() {
    let Some(db) = connect("TEST_MYSQL_URL", Dialect::MySql).await else {
        return;
    };
    let table = table_name("dbkit_mysql");
    let create = format!(
        "CREATE TABLE {} (id BIGINT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL, age INT NULL)",
        table
    );
    exercise_crud(&db, &create, &table).await;
    db.close().await;
}

#[tokio::test]
async fn test_postgres_crud_and_pagination() {
    let Some(db) = connect("TEST_POSTGRES_URL", Dialect::Postgres).await else {
        return;
    };
    let table = table_name("dbkit_pg");
    let create = format!(
        "CREATE TABLE {} (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL, age INTEGER NULL)",
        table
    );
    exercise_crud(&db, &create, &table).await;

    let version = db.query_first("SELECT version() AS v", &[]).await.unwrap();
    assert!(version.string("v").contains("PostgreSQL"));
    db.close().await;
}
