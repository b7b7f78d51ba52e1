// Engine - the CRUD coordinator and public API surface.
//
// Every operation is metadata-driven: the slug resolves to a registry
// descriptor, each field contributes to the write payload, hooks wrap the
// DML, and for the meta models those hooks are what mutates the live SQL
// schema. Recursive paths (collection writes, cascading destroys, nested
// projections) return boxed futures.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::bootstrap;
use crate::config::Config;
use crate::content::{self, Content};
use crate::db::{ident, PostgresBackend, SqlBackend, SqliteBackend};
use crate::error::{EngineError, EngineResult};
use crate::field::{Field, FieldKind, FieldRow};
use crate::hooks::{HookBoard, HookEnv, HookTiming, Lifecycle};
use crate::model::ModelDescriptor;
use crate::registry::ModelRegistry;

/// Nested include tree: which relational fields to expand on read.
#[derive(Debug, Clone, Default)]
pub struct Include {
    children: HashMap<String, Include>,
}

impl Include {
    pub fn new() -> Self {
        Self::default()
    }

    /// Include a relational field without expanding its own relations.
    pub fn with(mut self, slug: impl Into<String>) -> Self {
        self.children.insert(slug.into(), Include::new());
        self
    }

    /// Include a relational field with a nested include tree.
    pub fn nest(mut self, slug: impl Into<String>, sub: Include) -> Self {
        self.children.insert(slug.into(), sub);
        self
    }

    pub fn child(&self, slug: &str) -> Option<&Include> {
        self.children.get(slug)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.children.contains_key(slug)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    pub include: Include,
    pub order_by: Option<String>,
    pub order: Option<Order>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl QueryOpts {
    pub fn including(include: Include) -> Self {
        Self {
            include,
            ..Self::default()
        }
    }
}

pub struct Engine {
    db: Arc<dyn SqlBackend>,
    registry: ModelRegistry,
    hooks: HookBoard,
    page_size: i64,
}

impl Engine {
    pub fn new(db: Arc<dyn SqlBackend>) -> Self {
        Self {
            db,
            registry: ModelRegistry::new(),
            hooks: HookBoard::new(),
            page_size: 30,
        }
    }

    pub fn with_config(db: Arc<dyn SqlBackend>, config: &Config) -> Self {
        let mut engine = Self::new(db);
        engine.page_size = config.query.page_size;
        engine
    }

    pub fn db(&self) -> &Arc<dyn SqlBackend> {
        &self.db
    }

    pub(crate) fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Guarantee the meta tables, meta descriptors and built-in hooks, then
    /// load the registry. Idempotent; call once per handle before use.
    pub async fn init(&self) -> EngineResult<()> {
        bootstrap::install(self).await
    }

    /// Resolve a model by slug or stringified id.
    pub async fn model(&self, key: &str) -> EngineResult<Arc<ModelDescriptor>> {
        self.registry
            .get(key)
            .await
            .ok_or_else(|| EngineError::MissingModel(key.to_string()))
    }

    pub async fn model_by_id(&self, id: i64) -> EngineResult<Arc<ModelDescriptor>> {
        self.registry
            .get_by_id(id)
            .await
            .ok_or_else(|| EngineError::MissingModel(id.to_string()))
    }

    /// Full registry rebuild from the meta tables: every model row, its
    /// field rows, link peers resolved across the whole field set, hook
    /// slots provisioned, then one atomic swap.
    pub async fn invoke_models(&self) -> EngineResult<()> {
        let model_rows = self
            .db
            .query("SELECT * FROM \"model\" ORDER BY id", &[])
            .await?;
        let field_rows = self
            .db
            .query("SELECT * FROM \"field\" ORDER BY id", &[])
            .await?;
        let parsed: Vec<FieldRow> = field_rows
            .iter()
            .map(FieldRow::from_content)
            .collect::<EngineResult<_>>()?;

        let mut models = Vec::with_capacity(model_rows.len());
        for row in &model_rows {
            let model_id = content::get_i64(row, "id").ok_or_else(|| {
                EngineError::BadDescriptor("model row without id".to_string())
            })?;
            let fields: Vec<Field> = parsed
                .iter()
                .filter(|f| f.model_id == model_id)
                .map(|f| Field {
                    row: f.clone(),
                    link: f
                        .link_id
                        .and_then(|lid| parsed.iter().find(|p| p.id == lid))
                        .cloned(),
                })
                .collect();
            let model = ModelDescriptor::from_content(row, fields)?;
            self.hooks.provision(&model.slug).await;
            models.push(Arc::new(model));
        }
        bootstrap::install_meta_hooks(self).await;
        let count = models.len();
        self.registry.swap(models).await;
        tracing::debug!(models = count, "registry reloaded");
        Ok(())
    }

    /// Build a single model descriptor from a `model` table row without
    /// touching the registry.
    pub async fn invoke_model(&self, row: &Content) -> EngineResult<ModelDescriptor> {
        let model_id = content::get_i64(row, "id")
            .ok_or_else(|| EngineError::BadDescriptor("model row without id".to_string()))?;
        let mut field_rows = self
            .db
            .fetch(
                bootstrap::FIELD_TABLE,
                "model_id = %1",
                &[Value::Number(model_id.into())],
            )
            .await?;
        field_rows.sort_by_key(|r| content::get_i64(r, "id").unwrap_or(0));
        let parsed: Vec<FieldRow> = field_rows
            .iter()
            .map(FieldRow::from_content)
            .collect::<EngineResult<_>>()?;

        let mut fields = Vec::with_capacity(parsed.len());
        for field_row in &parsed {
            let link = match field_row.link_id {
                None => None,
                Some(lid) => match parsed.iter().find(|p| p.id == lid) {
                    Some(local) => Some(local.clone()),
                    // Link peers may live on another model.
                    None => self
                        .db
                        .choose(bootstrap::FIELD_TABLE, lid)
                        .await?
                        .map(|c| FieldRow::from_content(&c))
                        .transpose()?,
                },
            };
            fields.push(Field {
                row: field_row.clone(),
                link,
            });
        }
        ModelDescriptor::from_content(row, fields)
    }

    /// Merge one descriptor into the registry.
    pub async fn alter_models(&self, model: ModelDescriptor) {
        self.hooks.provision(&model.slug).await;
        self.registry.merge(Arc::new(model)).await;
    }

    pub async fn add_hook(
        &self,
        slug: &str,
        timing: HookTiming,
        id: &str,
        hook: Arc<dyn Lifecycle>,
    ) {
        self.hooks.add(slug, timing, id, hook).await;
    }

    /// Provision empty hook slots for a slug (`make_lifecycle_hooks`).
    pub(crate) async fn hooks_provision(&self, slug: &str) {
        self.hooks.provision(slug).await;
    }

    /// Fold the env through every interceptor registered for (slug, timing)
    /// in insertion order. Unknown pairs are a no-op.
    pub async fn run_hook(
        &self,
        slug: &str,
        timing: HookTiming,
        mut env: HookEnv,
    ) -> EngineResult<HookEnv> {
        for (id, hook) in self.hooks.snapshot(slug, timing).await {
            env = hook.call(self, env).await.map_err(|e| {
                tracing::warn!(slug, timing = timing.as_str(), hook = %id, error = %e, "hook failed");
                e
            })?;
        }
        Ok(env)
    }

    /// Create a content row. A spec carrying an id is an upsert and defers
    /// to `update`.
    pub fn create<'a>(
        &'a self,
        slug: &'a str,
        spec: Content,
    ) -> BoxFuture<'a, EngineResult<Content>> {
        Box::pin(async move {
            if let Some(id) = content::get_i64(&spec, "id") {
                return self.update(slug, id, spec).await;
            }
            let model = self.model(slug).await?;
            let mut values = Content::new();
            for field in &model.fields {
                if field.row.slug == "updated_at" {
                    continue;
                }
                field.update_values(&spec, &mut values);
            }
            let mut env = HookEnv {
                model: Some(model.clone()),
                spec,
                values,
                ..HookEnv::default()
            };
            env = self.run_hook(&model.slug, HookTiming::BeforeSave, env).await?;
            env = self.run_hook(&model.slug, HookTiming::BeforeCreate, env).await?;

            // Timestamp fields fall back to "now" when nothing supplied a
            // value; SQLite cannot attach a non-constant default to a
            // column added after table creation.
            for field in &model.fields {
                if field.row.kind == FieldKind::Timestamp
                    && field.row.slug != "updated_at"
                    && !env.values.contains_key(&field.row.slug)
                {
                    env.values.insert(
                        field.row.slug.clone(),
                        Value::String(crate::db::CURRENT_TIMESTAMP.to_string()),
                    );
                }
            }

            let mut insert_values = env.values.clone();
            insert_values.remove("updated_at");
            let inserted = self.db.insert(&model.slug, &insert_values).await?;
            env.content = content::merge(&env.spec, &inserted);

            env = self.run_hook(&model.slug, HookTiming::AfterCreate, env).await?;
            let mut post = env.content.clone();
            for field in &model.fields {
                post = field.post_update(self, post).await?;
            }
            env.content = post;
            env = self.run_hook(&model.slug, HookTiming::AfterSave, env).await?;
            Ok(env.content)
        })
    }

    /// Update a content row by id.
    pub fn update<'a>(
        &'a self,
        slug: &'a str,
        id: i64,
        spec: Content,
    ) -> BoxFuture<'a, EngineResult<Content>> {
        Box::pin(async move {
            let model = self.model(slug).await?;
            let original = self
                .db
                .choose(&model.slug, id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("{} {}", model.slug, id)))?;
            let mut values = Content::new();
            for field in &model.fields {
                field.update_values(&spec, &mut values);
            }
            let mut env = HookEnv {
                model: Some(model.clone()),
                spec,
                values,
                content: original.clone(),
                original,
            };
            env = self.run_hook(&model.slug, HookTiming::BeforeSave, env).await?;
            env = self.run_hook(&model.slug, HookTiming::BeforeUpdate, env).await?;

            self.db
                .update(
                    &model.slug,
                    &env.values,
                    "id = %1",
                    &[Value::Number(id.into())],
                )
                .await?;
            let reread = self.db.choose(&model.slug, id).await?.unwrap_or_default();
            env.content = content::merge(&env.spec, &reread);

            env = self.run_hook(&model.slug, HookTiming::AfterUpdate, env).await?;
            let mut post = env.content.clone();
            for field in &model.fields {
                post = field.post_update(self, post).await?;
            }
            env.content = post;
            env = self.run_hook(&model.slug, HookTiming::AfterSave, env).await?;
            Ok(env.content)
        })
    }

    /// Destroy a content row, returning the pre-delete content. Field
    /// `pre_destroy` runs before the DELETE so relational kinds can cascade;
    /// `after_destroy` observes the already-deleted state.
    pub fn destroy<'a>(
        &'a self,
        slug: &'a str,
        id: i64,
    ) -> BoxFuture<'a, EngineResult<Content>> {
        Box::pin(async move {
            let model = self.model(slug).await?;
            let row = self
                .db
                .choose(&model.slug, id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("{} {}", model.slug, id)))?;
            let mut env = HookEnv {
                model: Some(model.clone()),
                spec: row.clone(),
                content: row,
                ..HookEnv::default()
            };
            env = self
                .run_hook(&model.slug, HookTiming::BeforeDestroy, env)
                .await?;
            for field in &model.fields {
                env.content = field.pre_destroy(self, env.content).await?;
            }
            self.db
                .delete(&model.slug, "id = %1", &[Value::Number(id.into())])
                .await?;
            env = self
                .run_hook(&model.slug, HookTiming::AfterDestroy, env)
                .await?;
            Ok(env.content)
        })
    }

    /// Project a row through its model's fields.
    pub fn from<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        row: &'a Content,
        opts: &'a QueryOpts,
    ) -> BoxFuture<'a, EngineResult<Content>> {
        Box::pin(async move {
            let mut out = row.clone();
            for field in &model.fields {
                if matches!(field.row.kind, FieldKind::Image | FieldKind::Link) {
                    continue;
                }
                let value = field.field_from(self, row, opts).await?;
                out.insert(field.row.slug.clone(), value);
            }
            Ok(out)
        })
    }

    /// Display-oriented projection.
    pub fn model_render<'a>(
        &'a self,
        model: &'a ModelDescriptor,
        row: &'a Content,
        opts: &'a QueryOpts,
    ) -> BoxFuture<'a, EngineResult<Content>> {
        Box::pin(async move {
            let mut out = row.clone();
            for field in &model.fields {
                if matches!(field.row.kind, FieldKind::Image | FieldKind::Link) {
                    continue;
                }
                let value = field.render(self, row, opts).await?;
                out.insert(field.row.slug.clone(), value);
            }
            Ok(out)
        })
    }

    /// List rows of a model, projected, with order/limit/offset defaults.
    pub async fn rally(&self, slug: &str, opts: &QueryOpts) -> EngineResult<Vec<Content>> {
        let model = self.model(slug).await?;
        let order_col = opts.order_by.as_deref().unwrap_or("position");
        let order = opts.order.unwrap_or_default();
        let limit = opts.limit.unwrap_or(self.page_size);
        let offset = opts.offset.unwrap_or(0);
        let sql = format!(
            "SELECT * FROM {} ORDER BY {} {} LIMIT {} OFFSET {}",
            ident(&model.slug)?,
            ident(order_col)?,
            order.as_sql(),
            limit,
            offset
        );
        let rows = self.db.query(&sql, &[]).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.from(&model, row, opts).await?);
        }
        Ok(out)
    }

    /// Walk the parent chain of a nested model's row (row included).
    pub async fn progenitors(
        &self,
        slug: &str,
        id: i64,
        opts: &QueryOpts,
    ) -> EngineResult<Vec<Content>> {
        self.lineage(slug, id, opts, "t.id = l.parent_id").await
    }

    /// Walk the descendant tree of a nested model's row (row included).
    pub async fn descendents(
        &self,
        slug: &str,
        id: i64,
        opts: &QueryOpts,
    ) -> EngineResult<Vec<Content>> {
        self.lineage(slug, id, opts, "t.parent_id = l.id").await
    }

    async fn lineage(
        &self,
        slug: &str,
        id: i64,
        opts: &QueryOpts,
        join: &str,
    ) -> EngineResult<Vec<Content>> {
        let model = self.model(slug).await?;
        let rows = if model.nested {
            self.db
                .recursive_query(
                    &model.slug,
                    &["*"],
                    "id = %1",
                    &[Value::Number(id.into())],
                    join,
                )
                .await?
        } else {
            let row = self
                .db
                .choose(&model.slug, id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("{} {}", model.slug, id)))?;
            vec![row]
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.from(&model, row, opts).await?);
        }
        Ok(out)
    }
}

// === Process-default handle ===
//
// All public calls go through an explicit Engine handle; this default exists
// for callers that want one engine per process.

static DEFAULT_ENGINE: OnceCell<Arc<Engine>> = OnceCell::const_new();

/// Build a backend from the configured database URL.
pub async fn backend_from_config(config: &Config) -> EngineResult<Arc<dyn SqlBackend>> {
    let url = &config.database.url;
    if url.starts_with("postgres") {
        Ok(Arc::new(
            PostgresBackend::connect(url, config.database.max_connections).await?,
        ))
    } else {
        Ok(Arc::new(SqliteBackend::connect(url).await?))
    }
}

/// Construct, initialize and store the process-default engine.
pub async fn init_default(config: &Config) -> EngineResult<Arc<Engine>> {
    let db = backend_from_config(config).await?;
    let engine = Arc::new(Engine::with_config(db, config));
    engine.init().await?;
    DEFAULT_ENGINE
        .set(engine.clone())
        .map_err(|_| EngineError::Config("default engine already initialized".to_string()))?;
    Ok(engine)
}

pub fn default_engine() -> EngineResult<Arc<Engine>> {
    DEFAULT_ENGINE.get().cloned().ok_or_else(|| {
        EngineError::Config("default engine not initialized; call init_default first".to_string())
    })
}
