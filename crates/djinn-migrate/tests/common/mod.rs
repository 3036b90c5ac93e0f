#![allow(dead_code)]

use std::sync::Arc;

use djinn_migrate::{Introspect, SqliteIntrospector};
use djinn_orm::fields::Field;
use djinn_orm::{Connection, Model};

pub async fn connection() -> Connection {
    init_tracing();
    Connection::open_in_memory().await.unwrap()
}

/// Installs a test subscriber once; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn blog_models() -> Vec<Arc<Model>> {
    let users = Model::builder("User", "users")
        .field("username", Field::char(50).unique(true))
        .field("email", Field::email().null(true))
        .build()
        .unwrap();
    let tags = Model::builder("Tag", "tags")
        .field("name", Field::char(50).db_index(true))
        .build()
        .unwrap();
    let posts = Model::builder("Post", "posts")
        .field("title", Field::char(200))
        .field("author", Field::foreign_key("users"))
        .field("tags", Field::many_to_many("tags"))
        .field("created_at", Field::datetime().auto_now_add(true))
        .build()
        .unwrap();
    vec![Arc::new(users), Arc::new(tags), Arc::new(posts)]
}

pub async fn column_names(conn: &Connection, table: &str) -> Vec<String> {
    SqliteIntrospector::new(conn.clone())
        .columns(table)
        .await
        .unwrap()
        .into_iter()
        .map(|column| column.name)
        .collect()
}

pub async fn table_exists(conn: &Connection, table: &str) -> bool {
    SqliteIntrospector::new(conn.clone())
        .table_exists(table)
        .await
        .unwrap()
}
