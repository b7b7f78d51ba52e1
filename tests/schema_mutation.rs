// Schema-affecting updates: table renames follow model slug changes, column
// renames follow field slug changes, data survives both.

use std::sync::Arc;

use serde_json::{json, Value};

use protean::content::{self, Content};
use protean::db::SqliteBackend;
use protean::Engine;

async fn engine() -> Engine {
    let db = Arc::new(SqliteBackend::in_memory().await.unwrap());
    let engine = Engine::new(db);
    engine.init().await.unwrap();
    engine
}

fn spec(v: Value) -> Content {
    v.as_object().unwrap().clone()
}

#[tokio::test]
async fn renaming_model_and_field_rewrites_the_schema() {
    let engine = engine().await;
    let foo = engine
        .create(
            "model",
            spec(json!({"name": "foo", "fields": [{"name": "bar", "type": "string"}]})),
        )
        .await
        .unwrap();
    let foo_id = content::get_i64(&foo, "id").unwrap();
    engine
        .create("foo", spec(json!({"bar": "keepme"})))
        .await
        .unwrap();

    engine
        .update("model", foo_id, spec(json!({"slug": "baz"})))
        .await
        .unwrap();
    assert!(!engine.db().table_exists("foo").await.unwrap());
    assert!(engine.db().table_exists("baz").await.unwrap());
    assert!(engine.model("foo").await.is_err());
    assert_eq!(engine.model("baz").await.unwrap().id, foo_id);

    let baz = engine.model("baz").await.unwrap();
    let bar_id = baz.field("bar").unwrap().row.id;
    engine
        .update("field", bar_id, spec(json!({"name": "qux"})))
        .await
        .unwrap();

    // column renamed, data preserved
    let rows = engine
        .db()
        .fetch("baz", "qux = %1", &[json!("keepme")])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let baz = engine.model("baz").await.unwrap();
    assert!(baz.field("qux").is_some());
    assert!(baz.field("bar").is_none());
}

#[tokio::test]
async fn renaming_a_part_renames_its_subfields() {
    let engine = engine().await;
    let author = engine
        .create(
            "model",
            spec(json!({"name": "author", "fields": [{"name": "handle", "type": "string"}]})),
        )
        .await
        .unwrap();
    let author_id = content::get_i64(&author, "id").unwrap();
    engine
        .create(
            "model",
            spec(json!({"name": "book", "fields": [
                {"name": "title", "type": "string"},
                {"name": "author", "type": "part", "target_id": author_id}
            ]})),
        )
        .await
        .unwrap();

    let book = engine.model("book").await.unwrap();
    let part_id = book.field("author").unwrap().row.id;
    engine
        .update("field", part_id, spec(json!({"name": "writer"})))
        .await
        .unwrap();

    let book = engine.model("book").await.unwrap();
    assert!(book.field("writer").is_some());
    assert!(book.field("writer_id").is_some());
    assert!(book.field("writer_position").is_some());
    assert!(book.field("author_id").is_none());

    // the renamed subfield columns are live
    engine
        .create("book", spec(json!({"title": "t", "writer_id": 1})))
        .await
        .unwrap();
    let rows = engine
        .db()
        .fetch("book", "writer_id = %1", &[json!(1)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn adding_a_field_to_a_live_model_alters_its_table() {
    let engine = engine().await;
    let thing = engine
        .create(
            "model",
            spec(json!({"name": "thing", "fields": [{"name": "label", "type": "string"}]})),
        )
        .await
        .unwrap();
    let thing_id = content::get_i64(&thing, "id").unwrap();
    engine
        .create("thing", spec(json!({"label": "pre-existing"})))
        .await
        .unwrap();

    engine
        .create(
            "field",
            spec(json!({"name": "extra", "type": "integer", "model_id": thing_id})),
        )
        .await
        .unwrap();

    let thing_model = engine.model("thing").await.unwrap();
    assert!(thing_model.field("extra").is_some());
    engine
        .create("thing", spec(json!({"label": "new", "extra": 9})))
        .await
        .unwrap();
    let rows = engine
        .db()
        .fetch("thing", "extra = %1", &[json!(9)])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}
