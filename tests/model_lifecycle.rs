// End-to-end model lifecycle: defining a model creates its table, content
// CRUD is driven by the loaded metadata, destroying the model removes both
// the table and the registry entries.

use std::sync::Arc;

use serde_json::{json, Value};

use protean::content::{self, Content};
use protean::db::SqliteBackend;
use protean::{Engine, EngineError, HookTiming, QueryOpts};

async fn engine() -> Engine {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let db = Arc::new(SqliteBackend::in_memory().await.unwrap());
    let engine = Engine::new(db);
    engine.init().await.unwrap();
    engine
}

fn spec(v: Value) -> Content {
    v.as_object().unwrap().clone()
}

#[tokio::test]
async fn model_lifecycle_end_to_end() {
    let engine = engine().await;

    let model = engine
        .create(
            "model",
            spec(json!({
                "name": "yellow",
                "position": 3,
                "fields": [
                    {"name": "gogon", "type": "string"},
                    {"name": "wibib", "type": "boolean"}
                ]
            })),
        )
        .await
        .unwrap();
    let model_id = content::get_i64(&model, "id").unwrap();

    let yellow = engine.model("yellow").await.unwrap();
    assert_eq!(yellow.name, "yellow");
    assert!(yellow.fields.len() >= 8, "declared + base fields expected");
    assert!(engine.db().table_exists("yellow").await.unwrap());

    engine
        .create("yellow", spec(json!({"gogon": "obobo", "wibib": true})))
        .await
        .unwrap();
    let rows = engine
        .db()
        .query("SELECT * FROM \"yellow\"", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("gogon"), Some(&json!("obobo")));
    assert_eq!(content::get_bool(&rows[0], "wibib"), Some(true));

    engine.destroy("model", model_id).await.unwrap();
    assert!(!engine.db().table_exists("yellow").await.unwrap());
    assert!(matches!(
        engine.model("yellow").await,
        Err(EngineError::MissingModel(_))
    ));
}

#[tokio::test]
async fn base_fields_are_present_on_created_tables() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();

    let row = engine
        .create("thing", spec(json!({"label": "x", "position": 2})))
        .await
        .unwrap();
    let id = content::get_i64(&row, "id").unwrap();
    let stored = engine.db().choose("thing", id).await.unwrap().unwrap();
    for column in [
        "id",
        "position",
        "status",
        "locale_id",
        "env_id",
        "locked",
        "created_at",
        "updated_at",
    ] {
        assert!(stored.contains_key(column), "missing base column {}", column);
    }
    assert_eq!(content::get_i64(&stored, "position"), Some(2));
    // created_at materialized on insert
    assert!(stored.get("created_at").unwrap().is_string());
}

#[tokio::test]
async fn create_round_trips_after_coercion() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [
                {"name": "label", "type": "string"},
                {"name": "count", "type": "integer"},
                {"name": "flag", "type": "boolean"},
                {"name": "body", "type": "text"}
            ]})),
        )
        .await
        .unwrap();

    let created = engine
        .create(
            "thing",
            spec(json!({"label": "a", "count": "42", "flag": "true", "body": "b"})),
        )
        .await
        .unwrap();
    let stored = engine
        .db()
        .choose("thing", content::get_i64(&created, "id").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("label"), Some(&json!("a")));
    assert_eq!(content::get_i64(&stored, "count"), Some(42));
    assert_eq!(content::get_bool(&stored, "flag"), Some(true));
    assert_eq!(stored.get("body"), Some(&json!("b")));
}

#[tokio::test]
async fn bad_coercion_is_dropped_not_fatal() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [
                {"name": "wibib", "type": "boolean"},
                {"name": "count", "type": "integer"}
            ]})),
        )
        .await
        .unwrap();

    let row = engine
        .create(
            "thing",
            spec(json!({"wibib": "not a bool", "count": "many"})),
        )
        .await
        .unwrap();
    let stored = engine
        .db()
        .choose("thing", content::get_i64(&row, "id").unwrap())
        .await
        .unwrap()
        .unwrap();
    // the offending keys fell back to the column defaults
    assert_eq!(stored.get("wibib"), Some(&Value::Null));
    assert_eq!(stored.get("count"), Some(&Value::Null));
}

#[tokio::test]
async fn create_with_id_is_an_upsert() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();
    let first = engine
        .create("thing", spec(json!({"label": "before"})))
        .await
        .unwrap();
    let id = content::get_i64(&first, "id").unwrap();

    engine
        .create("thing", spec(json!({"id": id, "label": "after"})))
        .await
        .unwrap();
    let rows = engine
        .db()
        .query("SELECT * FROM \"thing\"", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("label"), Some(&json!("after")));
}

#[tokio::test]
async fn update_stamps_updated_at() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();
    let row = engine
        .create("thing", spec(json!({"label": "x"})))
        .await
        .unwrap();
    let id = content::get_i64(&row, "id").unwrap();

    engine
        .update("thing", id, spec(json!({"label": "y"})))
        .await
        .unwrap();
    let stored = engine.db().choose("thing", id).await.unwrap().unwrap();
    assert_eq!(stored.get("label"), Some(&json!("y")));
    assert!(stored.get("updated_at").unwrap().is_string());
}

#[tokio::test]
async fn user_hooks_wrap_content_crud() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "item", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();

    engine
        .add_hook(
            "item",
            HookTiming::BeforeCreate,
            "stamp_status",
            protean::hook_fn(|_, mut env| {
                Box::pin(async move {
                    env.values.insert("status".to_string(), json!(5));
                    Ok(env)
                })
            }),
        )
        .await;

    let row = engine
        .create("item", spec(json!({"label": "hooked"})))
        .await
        .unwrap();
    let stored = engine
        .db()
        .choose("item", content::get_i64(&row, "id").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(content::get_i64(&stored, "status"), Some(5));
}

#[tokio::test]
async fn rally_orders_limits_and_offsets() {
    let engine = engine().await;
    engine
        .create(
            "model",
            spec(json!({"name": "item", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();
    for (label, position) in [("c", 3), ("a", 1), ("b", 2)] {
        engine
            .create("item", spec(json!({"label": label, "position": position})))
            .await
            .unwrap();
    }

    let rows = engine.rally("item", &QueryOpts::default()).await.unwrap();
    let labels: Vec<_> = rows
        .iter()
        .map(|r| content::get_str(r, "label").unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["a", "b", "c"]);

    let paged = engine
        .rally(
            "item",
            &QueryOpts {
                limit: Some(1),
                offset: Some(1),
                ..QueryOpts::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].get("label"), Some(&json!("b")));
}

#[tokio::test]
async fn metamodel_describes_itself() {
    let engine = engine().await;
    let row = engine.db().choose("model", 1).await.unwrap().unwrap();
    let descriptor = engine.invoke_model(&row).await.unwrap();
    assert!(descriptor.fields.iter().any(|f| f.row.name == "name"));
    // registry resolves meta models by slug and by stringified id
    assert_eq!(engine.model("model").await.unwrap().id, 1);
    assert_eq!(engine.model("1").await.unwrap().slug, "model");
}
