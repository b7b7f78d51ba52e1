//! The process-wide model registry.
//!
//! One ordered mapping indexed twice, by slug and by numeric id, to the same
//! descriptor instance. Readers always observe fully constructed
//! descriptors: `swap` replaces the whole map atomically on a full reload
//! and `merge` splices a single rebuilt descriptor in under the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::model::ModelDescriptor;

#[derive(Default)]
struct Maps {
    by_slug: HashMap<String, Arc<ModelDescriptor>>,
    by_id: HashMap<i64, Arc<ModelDescriptor>>,
}

#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<Maps>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a model by slug, falling back to a stringified numeric id.
    /// Lookups accept both uniformly; callers sometimes hold only an id.
    pub async fn get(&self, key: &str) -> Option<Arc<ModelDescriptor>> {
        let maps = self.inner.read().await;
        if let Some(model) = maps.by_slug.get(key) {
            return Some(model.clone());
        }
        key.parse::<i64>().ok().and_then(|id| maps.by_id.get(&id).cloned())
    }

    pub async fn get_by_id(&self, id: i64) -> Option<Arc<ModelDescriptor>> {
        self.inner.read().await.by_id.get(&id).cloned()
    }

    /// Replace the whole registry contents.
    pub async fn swap(&self, models: Vec<Arc<ModelDescriptor>>) {
        let mut maps = Maps::default();
        for model in models {
            maps.by_slug.insert(model.slug.clone(), model.clone());
            maps.by_id.insert(model.id, model);
        }
        *self.inner.write().await = maps;
    }

    /// Merge one descriptor, dropping any stale slug key it previously held.
    pub async fn merge(&self, model: Arc<ModelDescriptor>) {
        let mut maps = self.inner.write().await;
        if let Some(previous) = maps.by_id.get(&model.id) {
            if previous.slug != model.slug {
                let stale_slug = previous.slug.clone();
                maps.by_slug.remove(&stale_slug);
            }
        }
        maps.by_slug.insert(model.slug.clone(), model.clone());
        maps.by_id.insert(model.id, model);
    }

    /// Evict a model from both indexes.
    pub async fn evict(&self, id: i64) {
        let mut maps = self.inner.write().await;
        if let Some(model) = maps.by_id.remove(&id) {
            maps.by_slug.remove(&model.slug);
        }
    }

    pub async fn slugs(&self) -> Vec<String> {
        self.inner.read().await.by_slug.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(id: i64, slug: &str) -> Arc<ModelDescriptor> {
        let row = json!({"id": id, "name": slug, "slug": slug})
            .as_object()
            .unwrap()
            .clone();
        Arc::new(ModelDescriptor::from_content(&row, vec![]).unwrap())
    }

    #[tokio::test]
    async fn resolves_by_slug_and_by_id_string() {
        let registry = ModelRegistry::new();
        registry.swap(vec![model(1, "model"), model(7, "yellow")]).await;
        assert_eq!(registry.get("yellow").await.unwrap().id, 7);
        assert_eq!(registry.get("7").await.unwrap().slug, "yellow");
        assert!(registry.get("zap").await.is_none());
    }

    #[tokio::test]
    async fn merge_drops_stale_slug_after_rename() {
        let registry = ModelRegistry::new();
        registry.swap(vec![model(3, "foo")]).await;
        registry.merge(model(3, "baz")).await;
        assert!(registry.get("foo").await.is_none());
        assert_eq!(registry.get("baz").await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn evict_clears_both_indexes() {
        let registry = ModelRegistry::new();
        registry.swap(vec![model(7, "yellow")]).await;
        registry.evict(7).await;
        assert!(registry.get("yellow").await.is_none());
        assert!(registry.get_by_id(7).await.is_none());
    }
}
