#![allow(dead_code)]

use std::sync::Arc;

use djinn_orm::fields::Field;
use djinn_orm::{Connection, Dialect, Model, Registry};

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

pub fn user_model() -> Model {
    Model::builder("User", "users")
        .field("username", Field::char(50).unique(true))
        .field("is_active", Field::boolean().default(true))
        .build()
        .unwrap()
}

pub fn tag_model() -> Model {
    Model::builder("Tag", "tags")
        .field("name", Field::char(50).unique(true))
        .build()
        .unwrap()
}

pub fn post_model() -> Model {
    Model::builder("Post", "posts")
        .field("title", Field::char(200))
        .field(
            "status",
            Field::char(20)
                .default("pending")
                .choices(["pending", "published", "archived"]),
        )
        .field("views", Field::integer().default(0))
        .field("author", Field::foreign_key("users"))
        .field("created_at", Field::datetime().auto_now_add(true))
        .field("updated_at", Field::datetime().auto_now(true))
        .field("tags", Field::many_to_many("tags"))
        .build()
        .unwrap()
}

/// Creates the table of `model` and its join tables from the rendered
/// column definitions.
pub async fn create_tables(conn: &Connection, model: &Model) {
    let columns: Vec<String> = model
        .fields()
        .iter()
        .filter_map(|(name, field)| field.render_column_sql(name, Dialect::Sqlite))
        .collect();
    let sql = format!("CREATE TABLE {} ({})", model.table(), columns.join(", "));
    conn.execute(&sql, &[]).await.unwrap();

    for (_, field) in model.many_to_many() {
        let spec = field.kind.many_to_many().unwrap();
        let (source, target) = spec.join_columns(model.table());
        let sql = format!(
            "CREATE TABLE {} ({source} INTEGER NOT NULL, {target} INTEGER NOT NULL, \
             PRIMARY KEY ({source}, {target}))",
            spec.join_table(model.table())
        );
        conn.execute(&sql, &[]).await.unwrap();
    }
}

/// An in-memory database with users, tags and posts registered and their
/// tables created.
pub async fn blog() -> Registry {
    init_tracing();
    let conn = Connection::open_in_memory().await.unwrap();
    let mut registry = Registry::new(conn.clone());
    for model in [user_model(), tag_model(), post_model()] {
        let model = registry.register(model).unwrap();
        create_tables(&conn, &model).await;
    }
    registry
}

pub fn model(registry: &Registry, name: &str) -> Arc<Model> {
    Arc::clone(registry.model(name).unwrap())
}
