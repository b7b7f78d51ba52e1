//! Lifecycle hooks.
//!
//! Every model slug owns eight named lifecycle points. An interceptor is an
//! async function from environment to environment; `run_hook` folds the
//! registered interceptors over the env in insertion order, so each observes
//! the previous one's output. This is the mechanism that makes the engine
//! reflexive: the built-in `model`/`field` hooks issue DDL and mutate the
//! registry from inside ordinary CRUD calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::content::Content;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::model::ModelDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookTiming {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeSave,
    AfterSave,
    BeforeDestroy,
    AfterDestroy,
}

impl HookTiming {
    pub const ALL: [HookTiming; 8] = [
        HookTiming::BeforeCreate,
        HookTiming::AfterCreate,
        HookTiming::BeforeUpdate,
        HookTiming::AfterUpdate,
        HookTiming::BeforeSave,
        HookTiming::AfterSave,
        HookTiming::BeforeDestroy,
        HookTiming::AfterDestroy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookTiming::BeforeCreate => "before_create",
            HookTiming::AfterCreate => "after_create",
            HookTiming::BeforeUpdate => "before_update",
            HookTiming::AfterUpdate => "after_update",
            HookTiming::BeforeSave => "before_save",
            HookTiming::AfterSave => "after_save",
            HookTiming::BeforeDestroy => "before_destroy",
            HookTiming::AfterDestroy => "after_destroy",
        }
    }
}

/// The environment threaded through a hook chain.
///
/// `spec` is the caller-supplied input, `values` the DML write payload,
/// `content` the row after DML (or the row being destroyed), `original` the
/// pre-update row. Hooks receive the env by value and return a new one.
#[derive(Clone, Default, Debug)]
pub struct HookEnv {
    pub model: Option<Arc<ModelDescriptor>>,
    pub spec: Content,
    pub values: Content,
    pub content: Content,
    pub original: Content,
}

/// A lifecycle interceptor.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv>;
}

struct FnHook<F>(F);

#[async_trait]
impl<F> Lifecycle for FnHook<F>
where
    F: for<'a> Fn(&'a Engine, HookEnv) -> BoxFuture<'a, EngineResult<HookEnv>> + Send + Sync,
{
    async fn call(&self, engine: &Engine, env: HookEnv) -> EngineResult<HookEnv> {
        (self.0)(engine, env).await
    }
}

/// Wrap a closure as a lifecycle interceptor.
pub fn hook_fn<F>(f: F) -> Arc<dyn Lifecycle>
where
    F: for<'a> Fn(&'a Engine, HookEnv) -> BoxFuture<'a, EngineResult<HookEnv>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHook(f))
}

type Slot = Vec<(String, Arc<dyn Lifecycle>)>;

/// Hook storage: slug -> timing -> ordered keyed interceptors.
#[derive(Default)]
pub struct HookBoard {
    inner: RwLock<HashMap<String, HashMap<HookTiming, Slot>>>,
}

impl HookBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision empty interceptor slots for all eight timings. Idempotent.
    pub async fn provision(&self, slug: &str) {
        let mut map = self.inner.write().await;
        let timings = map.entry(slug.to_string()).or_default();
        for timing in HookTiming::ALL {
            timings.entry(timing).or_default();
        }
    }

    /// Upsert an interceptor under its id: a known id is replaced in place
    /// (keeping its position), a new id appends.
    pub async fn add(&self, slug: &str, timing: HookTiming, id: &str, hook: Arc<dyn Lifecycle>) {
        let mut map = self.inner.write().await;
        let slot = map
            .entry(slug.to_string())
            .or_default()
            .entry(timing)
            .or_default();
        if let Some(existing) = slot.iter_mut().find(|(key, _)| key == id) {
            existing.1 = hook;
        } else {
            slot.push((id.to_string(), hook));
        }
    }

    /// A consistent snapshot of the interceptors for (slug, timing); empty
    /// for unknown pairs. `run_hook` iterates the snapshot so registration
    /// during a fold never races the fold.
    pub async fn snapshot(&self, slug: &str, timing: HookTiming) -> Slot {
        self.inner
            .read()
            .await
            .get(slug)
            .and_then(|timings| timings.get(&timing))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Lifecycle> {
        hook_fn(|_, env| Box::pin(async move { Ok(env) }))
    }

    #[tokio::test]
    async fn provision_is_idempotent() {
        let board = HookBoard::new();
        board.provision("model").await;
        board.add("model", HookTiming::BeforeCreate, "one", noop()).await;
        board.provision("model").await;
        assert_eq!(board.snapshot("model", HookTiming::BeforeCreate).await.len(), 1);
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let board = HookBoard::new();
        board.add("model", HookTiming::AfterSave, "a", noop()).await;
        board.add("model", HookTiming::AfterSave, "b", noop()).await;
        board.add("model", HookTiming::AfterSave, "a", noop()).await;
        let slot = board.snapshot("model", HookTiming::AfterSave).await;
        assert_eq!(
            slot.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[tokio::test]
    async fn unknown_pairs_are_empty() {
        let board = HookBoard::new();
        assert!(board.snapshot("ghost", HookTiming::BeforeDestroy).await.is_empty());
    }
}
