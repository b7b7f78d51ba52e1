// Bootstrap - the engine defined in terms of itself.
//
// Two reserved tables, `model` and `field`, describe every model including
// themselves. The built-in hooks registered here are what turns ordinary
// CRUD on those two slugs into DDL and registry mutation: creating a model
// row creates its table, creating a field row adds its columns, and so on.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::content::{self, Content};
use crate::db::{ColumnSpec, ColumnType};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::field::{Field, FieldKind, FieldRow};
use crate::hooks::{HookEnv, HookTiming, Lifecycle};
use crate::slug::slugify;

pub const MODEL_TABLE: &str = "model";
pub const FIELD_TABLE: &str = "field";

/// Guarantee meta tables, meta rows and built-in hooks, then load the
/// registry. Idempotent.
pub async fn install(engine: &Engine) -> EngineResult<()> {
    if !engine.db().table_exists(MODEL_TABLE).await? {
        create_meta_tables(engine).await?;
    }
    let seeded = engine
        .db()
        .query("SELECT id FROM \"model\" LIMIT 1", &[])
        .await?;
    if seeded.is_empty() {
        seed_meta_rows(engine).await?;
        tracing::info!("meta models seeded");
    }
    install_meta_hooks(engine).await;
    engine.invoke_models().await
}

async fn create_meta_tables(engine: &Engine) -> EngineResult<()> {
    let base = [
        ColumnSpec::new("position", ColumnType::Integer { default: None }),
        ColumnSpec::new("status", ColumnType::Integer { default: None }),
        ColumnSpec::new("locale_id", ColumnType::Integer { default: None }),
        ColumnSpec::new("env_id", ColumnType::Integer { default: None }),
        ColumnSpec::new("locked", ColumnType::Boolean),
        ColumnSpec::new("created_at", ColumnType::Timestamp),
        ColumnSpec::new("updated_at", ColumnType::Timestamp),
    ];

    let mut model_columns = vec![
        ColumnSpec::new("name", ColumnType::Varchar(256)),
        ColumnSpec::new("slug", ColumnType::Varchar(256)),
        ColumnSpec::new("description", ColumnType::Text),
        ColumnSpec::new("nested", ColumnType::Boolean),
    ];
    model_columns.extend(base.iter().cloned());
    engine.db().create_table(MODEL_TABLE, &model_columns).await?;

    let mut field_columns = vec![
        ColumnSpec::new("name", ColumnType::Varchar(256)),
        ColumnSpec::new("slug", ColumnType::Varchar(256)),
        ColumnSpec::new("type", ColumnType::Varchar(256)),
        ColumnSpec::new("model_id", ColumnType::Integer { default: None }),
        ColumnSpec::new("model_position", ColumnType::Integer { default: None }),
        ColumnSpec::new("target_id", ColumnType::Integer { default: None }),
        ColumnSpec::new("link_id", ColumnType::Integer { default: None }),
        ColumnSpec::new("dependent", ColumnType::Boolean),
        ColumnSpec::new("editable", ColumnType::Boolean),
        ColumnSpec::new("immutable", ColumnType::Boolean),
    ];
    field_columns.extend(base.iter().cloned());
    engine.db().create_table(FIELD_TABLE, &field_columns).await
}

fn obj(value: Value) -> Content {
    value.as_object().cloned().unwrap_or_default()
}

async fn seed_field(
    engine: &Engine,
    model_id: i64,
    position: i64,
    name: &str,
    kind: &str,
    patch: Value,
) -> EngineResult<i64> {
    let mut values = obj(json!({
        "name": name,
        "slug": slugify(name),
        "type": kind,
        "model_id": model_id,
        "position": position,
        "editable": true,
        "locked": false,
        "dependent": false,
        "immutable": false,
    }));
    for (k, v) in obj(patch) {
        values.insert(k, v);
    }
    let row = engine.db().insert(FIELD_TABLE, &values).await?;
    content::get_i64(&row, "id")
        .ok_or_else(|| EngineError::BadDescriptor(format!("seeded field {} without id", name)))
}

async fn wire_link(engine: &Engine, field_id: i64, link_id: i64) -> EngineResult<()> {
    let mut values = Content::new();
    values.insert("link_id".to_string(), json!(link_id));
    engine
        .db()
        .update(FIELD_TABLE, &values, "id = %1", &[json!(field_id)])
        .await
        .map(|_| ())
}

/// Insert the two self-describing meta models and their field rows. Link
/// pairs are wired after insertion so no fixed ids are assumed and serial
/// sequences stay valid.
async fn seed_meta_rows(engine: &Engine) -> EngineResult<()> {
    let model_row = engine
        .db()
        .insert(
            MODEL_TABLE,
            &obj(json!({
                "name": "Model",
                "slug": "model",
                "description": "entity types, one per table",
                "position": 1,
                "nested": false,
                "locked": true,
            })),
        )
        .await?;
    let model_id = content::get_i64(&model_row, "id")
        .ok_or_else(|| EngineError::BadDescriptor("seeded model without id".to_string()))?;

    let field_row = engine
        .db()
        .insert(
            MODEL_TABLE,
            &obj(json!({
                "name": "Field",
                "slug": "field",
                "description": "typed attributes of models",
                "position": 2,
                "nested": false,
                "locked": true,
            })),
        )
        .await?;
    let field_id = content::get_i64(&field_row, "id")
        .ok_or_else(|| EngineError::BadDescriptor("seeded field model without id".to_string()))?;

    let locked = json!({"editable": false, "locked": true});

    // model's own fields
    seed_field(engine, model_id, 1, "id", "id", locked.clone()).await?;
    let model_name = seed_field(engine, model_id, 2, "name", "string", json!({})).await?;
    let model_slug = seed_field(engine, model_id, 3, "slug", "slug", locked.clone()).await?;
    seed_field(engine, model_id, 4, "description", "text", json!({})).await?;
    seed_field(engine, model_id, 5, "position", "integer", json!({})).await?;
    seed_field(engine, model_id, 6, "nested", "boolean", json!({})).await?;
    seed_field(engine, model_id, 7, "locked", "boolean", json!({})).await?;
    seed_field(engine, model_id, 8, "status", "integer", json!({})).await?;
    seed_field(engine, model_id, 9, "locale_id", "integer", json!({})).await?;
    seed_field(engine, model_id, 10, "env_id", "integer", json!({})).await?;
    seed_field(engine, model_id, 11, "created_at", "timestamp", locked.clone()).await?;
    seed_field(engine, model_id, 12, "updated_at", "timestamp", locked.clone()).await?;
    let model_fields = seed_field(
        engine,
        model_id,
        13,
        "fields",
        "collection",
        json!({"target_id": field_id, "dependent": true}),
    )
    .await?;

    // field's own fields
    seed_field(engine, field_id, 1, "id", "id", locked.clone()).await?;
    let field_name = seed_field(engine, field_id, 2, "name", "string", json!({})).await?;
    let field_slug = seed_field(engine, field_id, 3, "slug", "slug", locked.clone()).await?;
    seed_field(engine, field_id, 4, "type", "string", json!({})).await?;
    seed_field(engine, field_id, 5, "target_id", "integer", json!({})).await?;
    seed_field(engine, field_id, 6, "link_id", "integer", json!({})).await?;
    seed_field(engine, field_id, 7, "dependent", "boolean", json!({})).await?;
    seed_field(engine, field_id, 8, "editable", "boolean", json!({})).await?;
    seed_field(engine, field_id, 9, "immutable", "boolean", json!({})).await?;
    seed_field(engine, field_id, 10, "locked", "boolean", json!({})).await?;
    let field_model = seed_field(
        engine,
        field_id,
        11,
        "model",
        "part",
        json!({"target_id": model_id}),
    )
    .await?;
    seed_field(engine, field_id, 12, "model_id", "integer", locked.clone()).await?;
    seed_field(engine, field_id, 13, "model_position", "integer", locked.clone()).await?;
    seed_field(engine, field_id, 14, "position", "integer", json!({})).await?;
    seed_field(engine, field_id, 15, "status", "integer", json!({})).await?;
    seed_field(engine, field_id, 16, "locale_id", "integer", json!({})).await?;
    seed_field(engine, field_id, 17, "env_id", "integer", json!({})).await?;
    seed_field(engine, field_id, 18, "created_at", "timestamp", locked.clone()).await?;
    seed_field(engine, field_id, 19, "updated_at", "timestamp", locked).await?;

    // slug fields derive from name; the collection/part pair is reciprocal
    wire_link(engine, model_slug, model_name).await?;
    wire_link(engine, field_slug, field_name).await?;
    wire_link(engine, model_fields, field_model).await?;
    wire_link(engine, field_model, model_fields).await?;
    Ok(())
}

/// Provision hook slots and register the built-in interceptors for the two
/// meta slugs. Idempotent: registration upserts by id.
pub async fn install_meta_hooks(engine: &Engine) {
    engine.hooks_provision(MODEL_TABLE).await;
    engine.hooks_provision(FIELD_TABLE).await;

    engine
        .add_hook(MODEL_TABLE, HookTiming::BeforeCreate, "build_table", Arc::new(BuildTable))
        .await;
    engine
        .add_hook(
            MODEL_TABLE,
            HookTiming::BeforeCreate,
            "add_base_fields",
            Arc::new(AddBaseFields),
        )
        .await;
    engine
        .add_hook(MODEL_TABLE, HookTiming::AfterCreate, "invoke", Arc::new(InvokeModel))
        .await;
    engine
        .add_hook(MODEL_TABLE, HookTiming::AfterUpdate, "rename", Arc::new(RenameModel))
        .await;
    engine
        .add_hook(MODEL_TABLE, HookTiming::AfterSave, "invoke_all", Arc::new(InvokeAll))
        .await;
    engine
        .add_hook(MODEL_TABLE, HookTiming::AfterDestroy, "cleanup", Arc::new(CleanupModel))
        .await;

    engine
        .add_hook(
            FIELD_TABLE,
            HookTiming::BeforeSave,
            "check_link_slug",
            Arc::new(CheckLinkSlug),
        )
        .await;
    engine
        .add_hook(FIELD_TABLE, HookTiming::AfterCreate, "add_columns", Arc::new(AddColumns))
        .await;
    engine
        .add_hook(FIELD_TABLE, HookTiming::AfterUpdate, "reify_field", Arc::new(ReifyField))
        .await;
    engine
        .add_hook(
            FIELD_TABLE,
            HookTiming::AfterDestroy,
            "drop_columns",
            Arc::new(DropColumns),
        )
        .await;
}

/// Rebuild one model's descriptor from its row and merge it into the
/// registry, so siblings created later in the same call see it.
async fn refresh_model(engine: &Engine, model_id: i64) -> EngineResult<()> {
    if let Some(row) = engine.db().choose(MODEL_TABLE, model_id).await? {
        let descriptor = engine.invoke_model(&row).await?;
        engine.alter_models(descriptor).await;
    }
    Ok(())
}

async fn load_field(engine: &Engine, row: &Content) -> EngineResult<Field> {
    let field_row = FieldRow::from_content(row)?;
    let link = match field_row.link_id {
        None => None,
        Some(lid) => engine
            .db()
            .choose(FIELD_TABLE, lid)
            .await?
            .map(|c| FieldRow::from_content(&c))
            .transpose()?,
    };
    Ok(Field {
        row: field_row,
        link,
    })
}

// === model hooks ===

/// `before_create/build_table` - CREATE TABLE for the nascent model.
struct BuildTable;

#[async_trait]
impl Lifecycle for BuildTable {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let slug = content::get_str(&env.values, "slug")
            .ok_or_else(|| EngineError::Hook("model create requires a name or slug".to_string()))?;
        tracing::info!(slug, "creating model table");
        engine.db().create_table(slug, &[]).await?;
        Ok(env)
    }
}

/// `before_create/add_base_fields` - append the base field list to the
/// caller's field specs, skipping slugs the caller already declared.
struct AddBaseFields;

#[async_trait]
impl Lifecycle for AddBaseFields {
    async fn call(&self, _engine: &Engine, mut env: HookEnv) -> EngineResult<HookEnv> {
        let mut fields = env
            .spec
            .get("fields")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let declared: Vec<String> = fields
            .iter()
            .filter_map(|f| f.as_object())
            .filter_map(|f| content::get_str(f, "name"))
            .map(slugify)
            .collect();
        for base in base_field_specs() {
            let slug = base
                .get("name")
                .and_then(Value::as_str)
                .map(slugify)
                .unwrap_or_default();
            if !declared.contains(&slug) {
                fields.push(base);
            }
        }
        env.spec.insert("fields".to_string(), Value::Array(fields));
        Ok(env)
    }
}

fn base_field_specs() -> Vec<Value> {
    vec![
        json!({"name": "id", "type": "id", "editable": false, "locked": true}),
        json!({"name": "position", "type": "integer"}),
        json!({"name": "status", "type": "integer"}),
        json!({"name": "locale_id", "type": "integer"}),
        json!({"name": "env_id", "type": "integer"}),
        json!({"name": "locked", "type": "boolean"}),
        json!({"name": "created_at", "type": "timestamp", "editable": false, "locked": true}),
        json!({"name": "updated_at", "type": "timestamp", "editable": false, "locked": true}),
    ]
}

/// `after_create/invoke` - make the new model resolvable, synthesize
/// `parent_id` for nested models, and merge the descriptor.
struct InvokeModel;

#[async_trait]
impl Lifecycle for InvokeModel {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let id = content::get_i64(&env.content, "id")
            .ok_or_else(|| EngineError::Hook("model created without id".to_string()))?;
        // Field creation below resolves the owner through the registry, so
        // merge before synthesizing anything.
        refresh_model(engine, id).await?;
        if content::get_bool(&env.content, "nested") == Some(true) {
            engine
                .create(
                    FIELD_TABLE,
                    obj(json!({
                        "name": "parent_id",
                        "type": "integer",
                        "model_id": id,
                        "editable": false,
                        "locked": true,
                    })),
                )
                .await?;
            refresh_model(engine, id).await?;
        }
        Ok(env)
    }
}

/// `after_update/rename` - a slug change renames the underlying table.
struct RenameModel;

#[async_trait]
impl Lifecycle for RenameModel {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let old = content::get_str(&env.original, "slug").unwrap_or("");
        let new = content::get_str(&env.content, "slug").unwrap_or(old);
        if !old.is_empty() && old != new {
            tracing::info!(old, new, "renaming model table");
            engine.db().rename_table(old, new).await?;
        }
        if let Some(id) = content::get_i64(&env.content, "id") {
            refresh_model(engine, id).await?;
        }
        Ok(env)
    }
}

/// `after_save/invoke_all` - full registry reload.
struct InvokeAll;

#[async_trait]
impl Lifecycle for InvokeAll {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        engine.invoke_models().await?;
        Ok(env)
    }
}

/// `after_destroy/cleanup` - drop the table and evict the model.
struct CleanupModel;

#[async_trait]
impl Lifecycle for CleanupModel {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        if let Some(slug) = content::get_str(&env.content, "slug") {
            tracing::info!(slug, "dropping model table");
            engine.db().drop_table(slug).await?;
        }
        if let Some(id) = content::get_i64(&env.content, "id") {
            engine.registry().evict(id).await;
        }
        engine.invoke_models().await?;
        Ok(env)
    }
}

// === field hooks ===

/// `before_save/check_link_slug` - resolve a `link_slug` spec key to a
/// sibling field id on the same model.
struct CheckLinkSlug;

#[async_trait]
impl Lifecycle for CheckLinkSlug {
    async fn call(&self, engine: &Engine, mut env: HookEnv) -> EngineResult<HookEnv> {
        let Some(link_slug) = content::get_str(&env.spec, "link_slug").map(str::to_string) else {
            return Ok(env);
        };
        let model_id = content::get_i64(&env.spec, "model_id")
            .or_else(|| content::get_i64(&env.original, "model_id"));
        let Some(model_id) = model_id else {
            return Ok(env);
        };
        match engine.model_by_id(model_id).await {
            Ok(model) => match model.field(&link_slug) {
                Some(sibling) => {
                    env.values
                        .insert("link_id".to_string(), json!(sibling.row.id));
                }
                None => {
                    tracing::warn!(%link_slug, model = %model.slug, "link_slug names no sibling field");
                }
            },
            Err(_) => {
                tracing::warn!(%link_slug, model_id, "link_slug on unknown model");
            }
        }
        Ok(env)
    }
}

/// `after_create/add_columns` - apply the new field's DDL and run its
/// reciprocal setup. The serial id column is baked into `create_table`, so
/// the `id` kind adds no DDL here.
struct AddColumns;

#[async_trait]
impl Lifecycle for AddColumns {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let field = load_field(engine, &env.content).await?;
        let model = engine.model_by_id(field.row.model_id).await?;
        if field.row.kind != FieldKind::Id {
            for spec in field.table_additions() {
                engine.db().add_column(&model.slug, &spec).await?;
            }
        }
        field.setup_field(engine).await?;
        refresh_model(engine, model.id).await?;
        Ok(env)
    }
}

/// `after_update/reify_field` - a slug change renames the column(s) and any
/// synthesized subfields.
struct ReifyField;

#[async_trait]
impl Lifecycle for ReifyField {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let old = FieldRow::from_content(&env.original)?;
        let new = FieldRow::from_content(&env.content)?;
        if old.slug == new.slug {
            return Ok(env);
        }
        let model = engine.model_by_id(new.model_id).await?;
        let old_field = Field {
            row: old.clone(),
            link: None,
        };
        let new_field = Field {
            row: new.clone(),
            link: None,
        };
        if old.kind != FieldKind::Id {
            for (from, to) in old_field
                .table_additions()
                .iter()
                .zip(new_field.table_additions().iter())
            {
                engine.db().rename_column(&model.slug, &from.name, &to.name).await?;
            }
        }
        // Part subfields are real field rows; renaming them through the
        // engine renames their columns in turn.
        for (from, to) in old_field
            .subfield_slugs()
            .into_iter()
            .zip(new_field.subfield_slugs())
        {
            let rows = engine
                .db()
                .fetch(
                    FIELD_TABLE,
                    "model_id = %1 AND slug = %2",
                    &[json!(model.id), json!(from)],
                )
                .await?;
            if let Some(aux) = rows.first() {
                if let Some(aux_id) = content::get_i64(aux, "id") {
                    engine
                        .update(FIELD_TABLE, aux_id, obj(json!({"name": to})))
                        .await?;
                }
            }
        }
        refresh_model(engine, model.id).await?;
        Ok(env)
    }
}

/// `after_destroy/drop_columns` - reciprocal teardown then column drops,
/// all best-effort so a partial teardown can complete.
struct DropColumns;

#[async_trait]
impl Lifecycle for DropColumns {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        let field = load_field(engine, &env.content).await?;
        if let Err(e) = field.cleanup_field(engine).await {
            tracing::warn!(field = %field.row.slug, error = %e, "field cleanup incomplete");
        }
        if let Ok(model) = engine.model_by_id(field.row.model_id).await {
            if field.row.kind != FieldKind::Id {
                for spec in field.table_additions() {
                    if let Err(e) = engine.db().drop_column(&model.slug, &spec.name).await {
                        tracing::warn!(
                            table = %model.slug,
                            column = %spec.name,
                            error = %e,
                            "column drop skipped"
                        );
                    }
                }
            }
            if let Err(e) = refresh_model(engine, model.id).await {
                tracing::warn!(model = %model.slug, error = %e, "model refresh skipped");
            }
        }
        Ok(env)
    }
}
