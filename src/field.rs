//! The field-kind protocol.
//!
//! A field is a typed attribute of a model: physical kinds own table
//! columns, relational kinds (`collection`/`part`) own reciprocal wiring and
//! recursive read/write behavior instead. The kind set is closed and
//! dispatch is a match on the tag, so every DDL-generating behavior is
//! enumerable.
//!
//! Constructors never touch the database; all side effects live in
//! `setup_field`/`cleanup_field` and the write-path callbacks.

use serde_json::Value;

use crate::bootstrap::FIELD_TABLE;
use crate::content::{self, Content, PARENT_KEY};
use crate::db::{ident, ColumnSpec, ColumnType, CURRENT_TIMESTAMP};
use crate::engine::{Engine, QueryOpts};
use crate::error::{EngineError, EngineResult};
use crate::slug::slugify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Integer,
    String,
    Slug,
    Text,
    Boolean,
    Timestamp,
    /// Reserved placeholder: no DDL, no read value, reserves `<slug>_id`.
    Image,
    /// Reciprocal has-many half of a `collection`/`part` pair.
    Collection,
    /// Reciprocal belongs-to half; synthesizes `<slug>_id`/`<slug>_position`.
    Part,
    /// Reserved marker kind.
    Link,
}

impl FieldKind {
    pub fn parse(tag: &str) -> EngineResult<Self> {
        match tag {
            "id" => Ok(FieldKind::Id),
            "integer" => Ok(FieldKind::Integer),
            "string" => Ok(FieldKind::String),
            "slug" => Ok(FieldKind::Slug),
            "text" => Ok(FieldKind::Text),
            "boolean" => Ok(FieldKind::Boolean),
            "timestamp" => Ok(FieldKind::Timestamp),
            "image" => Ok(FieldKind::Image),
            "collection" => Ok(FieldKind::Collection),
            "part" => Ok(FieldKind::Part),
            "link" => Ok(FieldKind::Link),
            other => Err(EngineError::BadDescriptor(format!(
                "unknown field kind: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Id => "id",
            FieldKind::Integer => "integer",
            FieldKind::String => "string",
            FieldKind::Slug => "slug",
            FieldKind::Text => "text",
            FieldKind::Boolean => "boolean",
            FieldKind::Timestamp => "timestamp",
            FieldKind::Image => "image",
            FieldKind::Collection => "collection",
            FieldKind::Part => "part",
            FieldKind::Link => "link",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, FieldKind::Collection | FieldKind::Part)
    }
}

/// A field descriptor row, as stored in the `field` meta table.
#[derive(Debug, Clone)]
pub struct FieldRow {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub kind: FieldKind,
    pub model_id: i64,
    pub target_id: Option<i64>,
    pub link_id: Option<i64>,
    pub dependent: bool,
    pub editable: bool,
    pub locked: bool,
    pub immutable: bool,
}

impl FieldRow {
    pub fn from_content(row: &Content) -> EngineResult<Self> {
        let id = content::get_i64(row, "id")
            .ok_or_else(|| EngineError::BadDescriptor("field row without id".to_string()))?;
        let kind = FieldKind::parse(
            content::get_str(row, "type")
                .ok_or_else(|| EngineError::BadDescriptor(format!("field {} without type", id)))?,
        )?;
        let name = content::get_str(row, "name").unwrap_or("").to_string();
        let slug = match content::get_str(row, "slug") {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => slugify(&name),
        };
        Ok(Self {
            id,
            name,
            slug,
            kind,
            model_id: content::get_i64(row, "model_id")
                .ok_or_else(|| EngineError::BadDescriptor(format!("field {} without model", id)))?,
            target_id: content::get_i64(row, "target_id"),
            link_id: content::get_i64(row, "link_id"),
            dependent: content::get_bool(row, "dependent").unwrap_or(false),
            editable: content::get_bool(row, "editable").unwrap_or(true),
            locked: content::get_bool(row, "locked").unwrap_or(false),
            immutable: content::get_bool(row, "immutable").unwrap_or(false),
        })
    }
}

/// A live field instance: the descriptor row plus a copy of its link peer's
/// row for the kinds that carry one (`slug`, `collection`, `part`). Peers
/// are referenced by id and re-resolved on every registry rebuild; an
/// instance never holds a pointer into another descriptor.
#[derive(Debug, Clone)]
pub struct Field {
    pub row: FieldRow,
    pub link: Option<FieldRow>,
}

impl Field {
    /// Column DDL this field appends to its model's table.
    pub fn table_additions(&self) -> Vec<ColumnSpec> {
        let slug = self.row.slug.as_str();
        match self.row.kind {
            FieldKind::Id => vec![ColumnSpec::new(slug, ColumnType::Serial)],
            FieldKind::Integer => {
                vec![ColumnSpec::new(slug, ColumnType::Integer { default: None })]
            }
            FieldKind::String | FieldKind::Slug => {
                vec![ColumnSpec::new(slug, ColumnType::Varchar(256))]
            }
            FieldKind::Text => vec![ColumnSpec::new(slug, ColumnType::Text)],
            FieldKind::Boolean => vec![ColumnSpec::new(slug, ColumnType::Boolean)],
            FieldKind::Timestamp => vec![ColumnSpec::new(slug, ColumnType::Timestamp)],
            FieldKind::Image
            | FieldKind::Link
            | FieldKind::Collection
            | FieldKind::Part => vec![],
        }
    }

    /// Auxiliary field slugs this kind synthesizes.
    pub fn subfield_slugs(&self) -> Vec<String> {
        match self.row.kind {
            FieldKind::Part => vec![
                format!("{}_id", self.row.slug),
                format!("{}_position", self.row.slug),
            ],
            FieldKind::Image => vec![format!("{}_id", self.row.slug)],
            _ => vec![],
        }
    }

    /// Merge this field's contribution to a write payload. Coercion
    /// failures drop the key silently; every arm leaves the accumulator in a
    /// returnable state.
    pub fn update_values(&self, spec: &Content, acc: &mut Content) {
        let slug = self.row.slug.as_str();
        match self.row.kind {
            FieldKind::Integer => match spec.get(slug) {
                Some(Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        acc.insert(slug.to_string(), Value::Number(i.into()));
                    }
                }
                Some(Value::String(s)) => {
                    if let Ok(i) = s.trim().parse::<i64>() {
                        acc.insert(slug.to_string(), Value::Number(i.into()));
                    }
                }
                Some(Value::Null) => {
                    acc.insert(slug.to_string(), Value::Null);
                }
                _ => {}
            },
            FieldKind::Boolean => match spec.get(slug) {
                Some(Value::Bool(b)) => {
                    acc.insert(slug.to_string(), Value::Bool(*b));
                }
                Some(Value::String(s)) => match s.trim() {
                    "true" => {
                        acc.insert(slug.to_string(), Value::Bool(true));
                    }
                    "false" => {
                        acc.insert(slug.to_string(), Value::Bool(false));
                    }
                    _ => {}
                },
                Some(Value::Null) => {
                    acc.insert(slug.to_string(), Value::Null);
                }
                _ => {}
            },
            FieldKind::String | FieldKind::Text => {
                if let Some(v) = spec.get(slug) {
                    acc.insert(slug.to_string(), v.clone());
                }
            }
            FieldKind::Timestamp => {
                if slug == "updated_at" {
                    acc.insert(slug.to_string(), Value::String(CURRENT_TIMESTAMP.to_string()));
                } else if let Some(v) = spec.get(slug) {
                    acc.insert(slug.to_string(), v.clone());
                }
            }
            FieldKind::Slug => {
                let linked = self
                    .link
                    .as_ref()
                    .and_then(|link| spec.get(&link.slug))
                    .and_then(stringify);
                if let Some(source) = linked {
                    acc.insert(slug.to_string(), Value::String(slugify(&source)));
                } else if let Some(own) = spec.get(slug).and_then(stringify) {
                    acc.insert(slug.to_string(), Value::String(slugify(&own)));
                }
            }
            FieldKind::Id
            | FieldKind::Image
            | FieldKind::Link
            | FieldKind::Collection
            | FieldKind::Part => {}
        }
    }

    /// Post-DML write pass. `collection` persists its child submaps now that
    /// the parent id is known; every other kind passes the content through.
    pub async fn post_update(&self, engine: &Engine, content: Content) -> EngineResult<Content> {
        if self.row.kind != FieldKind::Collection {
            return Ok(content);
        }
        let Some(Value::Array(children)) = content.get(&self.row.slug).cloned() else {
            return Ok(content);
        };
        let link = self.link_row()?;
        let target = engine.model_by_id(self.target_id()?).await?;
        let parent_id = content::get_i64(&content, "id").ok_or_else(|| {
            EngineError::Hook(format!("collection {} saved without a parent id", self.row.slug))
        })?;
        let mut persisted = Vec::with_capacity(children.len());
        for child in children {
            let Some(submap) = child.as_object() else {
                continue;
            };
            let mut spec = submap.clone();
            spec.insert(
                format!("{}_id", link.slug),
                Value::Number(parent_id.into()),
            );
            spec.insert(PARENT_KEY.to_string(), Value::Object(content.clone()));
            let mut saved = engine.create(&target.slug, spec).await?;
            saved.remove(PARENT_KEY);
            persisted.push(Value::Object(saved));
        }
        let mut out = content;
        out.insert(self.row.slug.clone(), Value::Array(persisted));
        Ok(out)
    }

    /// Pre-delete pass. A dependent `collection` (on either half of the
    /// pair) destroys its children before the parent row disappears.
    pub async fn pre_destroy(&self, engine: &Engine, content: Content) -> EngineResult<Content> {
        if self.row.kind != FieldKind::Collection {
            return Ok(content);
        }
        let dependent =
            self.row.dependent || self.link.as_ref().is_some_and(|link| link.dependent);
        if !dependent {
            return Ok(content);
        }
        let link = self.link_row()?;
        let target = engine.model_by_id(self.target_id()?).await?;
        let Some(parent_id) = content::get_i64(&content, "id") else {
            return Ok(content);
        };
        let children = engine
            .db()
            .fetch(
                &target.slug,
                &format!("{} = %1", ident(&format!("{}_id", link.slug))?),
                &[Value::Number(parent_id.into())],
            )
            .await?;
        for child in children {
            if let Some(child_id) = content::get_i64(&child, "id") {
                engine.destroy(&target.slug, child_id).await?;
            }
        }
        Ok(content)
    }

    /// Read projection for one field, honoring `opts.include`.
    pub async fn field_from(
        &self,
        engine: &Engine,
        row: &Content,
        opts: &QueryOpts,
    ) -> EngineResult<Value> {
        match self.row.kind {
            FieldKind::Collection => match opts.include.child(&self.row.slug) {
                Some(sub) => {
                    let children = self.fetch_children(engine, row).await?;
                    let target = engine.model_by_id(self.target_id()?).await?;
                    let sub_opts = QueryOpts::including(sub.clone());
                    let mut out = Vec::with_capacity(children.len());
                    for child in &children {
                        out.push(Value::Object(engine.from(&target, child, &sub_opts).await?));
                    }
                    Ok(Value::Array(out))
                }
                None => Ok(Value::Array(vec![])),
            },
            FieldKind::Part => match opts.include.child(&self.row.slug) {
                Some(sub) => {
                    let target = engine.model_by_id(self.target_id()?).await?;
                    let key = format!("{}_id", self.row.slug);
                    match content::get_i64(row, &key) {
                        Some(target_row_id) => {
                            match engine.db().choose(&target.slug, target_row_id).await? {
                                Some(peer) => {
                                    let sub_opts = QueryOpts::including(sub.clone());
                                    Ok(Value::Object(
                                        engine.from(&target, &peer, &sub_opts).await?,
                                    ))
                                }
                                None => Ok(Value::Null),
                            }
                        }
                        None => Ok(Value::Null),
                    }
                }
                None => Ok(Value::Null),
            },
            FieldKind::Image | FieldKind::Link => Ok(Value::Null),
            _ => Ok(row.get(&self.row.slug).cloned().unwrap_or(Value::Null)),
        }
    }

    /// Display projection: timestamps render as strings, relational kinds
    /// recurse through `model_render`.
    pub async fn render(
        &self,
        engine: &Engine,
        row: &Content,
        opts: &QueryOpts,
    ) -> EngineResult<Value> {
        match self.row.kind {
            FieldKind::Timestamp => Ok(match row.get(&self.row.slug) {
                Some(Value::String(s)) => Value::String(s.clone()),
                Some(Value::Null) | None => Value::Null,
                Some(other) => Value::String(other.to_string()),
            }),
            FieldKind::Collection => match opts.include.child(&self.row.slug) {
                Some(sub) => {
                    let children = self.fetch_children(engine, row).await?;
                    let target = engine.model_by_id(self.target_id()?).await?;
                    let sub_opts = QueryOpts::including(sub.clone());
                    let mut out = Vec::with_capacity(children.len());
                    for child in &children {
                        out.push(Value::Object(
                            engine.model_render(&target, child, &sub_opts).await?,
                        ));
                    }
                    Ok(Value::Array(out))
                }
                None => Ok(Value::Array(vec![])),
            },
            FieldKind::Part => match opts.include.child(&self.row.slug) {
                Some(sub) => {
                    let target = engine.model_by_id(self.target_id()?).await?;
                    let key = format!("{}_id", self.row.slug);
                    match content::get_i64(row, &key) {
                        Some(target_row_id) => {
                            match engine.db().choose(&target.slug, target_row_id).await? {
                                Some(peer) => {
                                    let sub_opts = QueryOpts::including(sub.clone());
                                    Ok(Value::Object(
                                        engine.model_render(&target, &peer, &sub_opts).await?,
                                    ))
                                }
                                None => Ok(Value::Null),
                            }
                        }
                        None => Ok(Value::Null),
                    }
                }
                None => Ok(Value::Null),
            },
            _ => self.field_from(engine, row, opts).await,
        }
    }

    /// Build or repair reciprocal structure after this field's row exists.
    /// Idempotent against partial prior setup; failures propagate.
    pub async fn setup_field(&self, engine: &Engine) -> EngineResult<()> {
        match self.row.kind {
            FieldKind::Collection => {
                self.ensure_reciprocal(engine, FieldKind::Part).await
            }
            FieldKind::Part => {
                self.ensure_subfields(engine).await?;
                self.ensure_reciprocal(engine, FieldKind::Collection).await
            }
            _ => Ok(()),
        }
    }

    /// Tear down reciprocal structure before this field's columns drop.
    /// Peers already gone are skipped; the caller treats any error as
    /// best-effort.
    pub async fn cleanup_field(&self, engine: &Engine) -> EngineResult<()> {
        match self.row.kind {
            FieldKind::Part => {
                for sub_slug in self.subfield_slugs() {
                    let rows = engine
                        .db()
                        .fetch(
                            FIELD_TABLE,
                            "model_id = %1 AND slug = %2",
                            &[
                                Value::Number(self.row.model_id.into()),
                                Value::String(sub_slug),
                            ],
                        )
                        .await?;
                    for row in rows {
                        if let Some(sub_id) = content::get_i64(&row, "id") {
                            engine.destroy(FIELD_TABLE, sub_id).await?;
                        }
                    }
                }
                self.destroy_reciprocal(engine).await
            }
            FieldKind::Collection => self.destroy_reciprocal(engine).await,
            _ => Ok(()),
        }
    }

    async fn destroy_reciprocal(&self, engine: &Engine) -> EngineResult<()> {
        let Some(link_id) = self.row.link_id else {
            return Ok(());
        };
        if engine.db().choose(FIELD_TABLE, link_id).await?.is_some() {
            engine.destroy(FIELD_TABLE, link_id).await?;
        }
        Ok(())
    }

    /// Synthesize the `<slug>_id` / `<slug>_position` integer fields of a
    /// `part`, skipping any that already exist.
    async fn ensure_subfields(&self, engine: &Engine) -> EngineResult<()> {
        for sub_slug in self.subfield_slugs() {
            let existing = engine
                .db()
                .fetch(
                    FIELD_TABLE,
                    "model_id = %1 AND slug = %2",
                    &[
                        Value::Number(self.row.model_id.into()),
                        Value::String(sub_slug.clone()),
                    ],
                )
                .await?;
            if !existing.is_empty() {
                continue;
            }
            let mut spec = Content::new();
            spec.insert("name".to_string(), Value::String(sub_slug));
            spec.insert("type".to_string(), Value::String("integer".to_string()));
            spec.insert(
                "model_id".to_string(),
                Value::Number(self.row.model_id.into()),
            );
            spec.insert("editable".to_string(), Value::Bool(false));
            spec.insert("locked".to_string(), Value::Bool(true));
            engine.create(FIELD_TABLE, spec).await?;
        }
        Ok(())
    }

    /// Make sure the opposite half of this reciprocal pair exists and both
    /// `link_id`s point at each other.
    async fn ensure_reciprocal(
        &self,
        engine: &Engine,
        peer_kind: FieldKind,
    ) -> EngineResult<()> {
        let target_id = self.target_id()?;
        let target = engine.model_by_id(target_id).await.map_err(|_| {
            EngineError::ReciprocalSetup(format!(
                "{} {} targets unknown model {}",
                self.row.kind.as_str(),
                self.row.slug,
                target_id
            ))
        })?;

        if let Some(link_id) = self.row.link_id {
            // Peer exists; repair its back-link if a partial setup left it
            // unset.
            let peer = engine.db().choose(FIELD_TABLE, link_id).await?.ok_or_else(|| {
                EngineError::ReciprocalSetup(format!(
                    "field {} links to missing peer {}",
                    self.row.slug, link_id
                ))
            })?;
            if content::get_i64(&peer, "link_id") != Some(self.row.id) {
                let mut values = Content::new();
                values.insert("link_id".to_string(), Value::Number(self.row.id.into()));
                engine
                    .db()
                    .update(FIELD_TABLE, &values, "id = %1", &[Value::Number(link_id.into())])
                    .await?;
            }
            return Ok(());
        }

        // Adopt an existing unlinked peer before synthesizing one.
        let candidates = engine
            .db()
            .fetch(
                FIELD_TABLE,
                "model_id = %1 AND type = %2 AND target_id = %3",
                &[
                    Value::Number(target.id.into()),
                    Value::String(peer_kind.as_str().to_string()),
                    Value::Number(self.row.model_id.into()),
                ],
            )
            .await?;
        let adopted = candidates.into_iter().find(|peer| {
            matches!(content::get_i64(peer, "link_id"), None)
                || content::get_i64(peer, "link_id") == Some(self.row.id)
        });

        let peer_id = match adopted {
            Some(peer) => content::get_i64(&peer, "id").ok_or_else(|| {
                EngineError::ReciprocalSetup(format!(
                    "unreadable peer for {}",
                    self.row.slug
                ))
            })?,
            None => {
                let owner = engine.model_by_id(self.row.model_id).await?;
                let peer_name = match peer_kind {
                    FieldKind::Part => owner.slug.clone(),
                    _ => crate::slug::pluralize(&owner.slug),
                };
                let mut spec = Content::new();
                spec.insert("name".to_string(), Value::String(peer_name));
                spec.insert(
                    "type".to_string(),
                    Value::String(peer_kind.as_str().to_string()),
                );
                spec.insert("model_id".to_string(), Value::Number(target.id.into()));
                spec.insert(
                    "target_id".to_string(),
                    Value::Number(self.row.model_id.into()),
                );
                spec.insert("link_id".to_string(), Value::Number(self.row.id.into()));
                let created = engine.create(FIELD_TABLE, spec).await?;
                content::get_i64(&created, "id").ok_or_else(|| {
                    EngineError::ReciprocalSetup(format!(
                        "reciprocal of {} created without id",
                        self.row.slug
                    ))
                })?
            }
        };

        // Cross-link both halves.
        let mut values = Content::new();
        values.insert("link_id".to_string(), Value::Number(peer_id.into()));
        engine
            .db()
            .update(
                FIELD_TABLE,
                &values,
                "id = %1",
                &[Value::Number(self.row.id.into())],
            )
            .await?;
        let mut back = Content::new();
        back.insert("link_id".to_string(), Value::Number(self.row.id.into()));
        engine
            .db()
            .update(
                FIELD_TABLE,
                &back,
                "id = %1",
                &[Value::Number(peer_id.into())],
            )
            .await?;
        Ok(())
    }

    async fn fetch_children(
        &self,
        engine: &Engine,
        row: &Content,
    ) -> EngineResult<Vec<Content>> {
        let link = self.link_row()?;
        let target = engine.model_by_id(self.target_id()?).await?;
        let Some(parent_id) = content::get_i64(row, "id") else {
            return Ok(vec![]);
        };
        let mut children = engine
            .db()
            .fetch(
                &target.slug,
                &format!("{} = %1", ident(&format!("{}_id", link.slug))?),
                &[Value::Number(parent_id.into())],
            )
            .await?;
        children.sort_by_key(|child| content::get_i64(child, "id").unwrap_or(0));
        Ok(children)
    }

    fn target_id(&self) -> EngineResult<i64> {
        self.row.target_id.ok_or_else(|| {
            EngineError::ReciprocalSetup(format!(
                "{} field {} has no target model",
                self.row.kind.as_str(),
                self.row.slug
            ))
        })
    }

    fn link_row(&self) -> EngineResult<&FieldRow> {
        self.link.as_ref().ok_or_else(|| {
            EngineError::ReciprocalSetup(format!(
                "{} field {} has no link peer",
                self.row.kind.as_str(),
                self.row.slug
            ))
        })
    }
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(slug: &str, kind: FieldKind, link: Option<FieldRow>) -> Field {
        Field {
            row: FieldRow {
                id: 1,
                name: slug.to_string(),
                slug: slug.to_string(),
                kind,
                model_id: 1,
                target_id: None,
                link_id: link.as_ref().map(|l| l.id),
                dependent: false,
                editable: true,
                locked: false,
                immutable: false,
            },
            link,
        }
    }

    fn spec(v: serde_json::Value) -> Content {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn integer_coerces_strings_and_drops_garbage() {
        let f = field("n", FieldKind::Integer, None);
        let mut acc = Content::new();
        f.update_values(&spec(json!({"n": "42"})), &mut acc);
        assert_eq!(acc.get("n"), Some(&json!(42)));

        let mut acc = Content::new();
        f.update_values(&spec(json!({"n": "not a number"})), &mut acc);
        assert!(acc.is_empty());
    }

    #[test]
    fn boolean_parses_strings_and_drops_garbage() {
        let f = field("wibib", FieldKind::Boolean, None);
        let mut acc = Content::new();
        f.update_values(&spec(json!({"wibib": "true"})), &mut acc);
        assert_eq!(acc.get("wibib"), Some(&json!(true)));

        let mut acc = Content::new();
        f.update_values(&spec(json!({"wibib": "not a bool"})), &mut acc);
        assert!(acc.is_empty());
    }

    #[test]
    fn updated_at_always_gets_the_sentinel() {
        let f = field("updated_at", FieldKind::Timestamp, None);
        let mut acc = Content::new();
        f.update_values(&spec(json!({})), &mut acc);
        assert_eq!(acc.get("updated_at"), Some(&json!(CURRENT_TIMESTAMP)));
    }

    #[test]
    fn slug_follows_its_link_first() {
        let link = FieldRow {
            id: 9,
            name: "ibibib".to_string(),
            slug: "ibibib".to_string(),
            kind: FieldKind::String,
            model_id: 1,
            target_id: None,
            link_id: None,
            dependent: false,
            editable: true,
            locked: false,
            immutable: false,
        };
        let f = field("yobob", FieldKind::Slug, Some(link));
        let mut acc = Content::new();
        f.update_values(
            &spec(json!({"ibibib": "OOOOOO mmmmm   ZZZZZZZZZZ"})),
            &mut acc,
        );
        assert_eq!(acc.get("yobob"), Some(&json!("oooooo_mmmmm_zzzzzzzzzz")));

        // no linked value: slugify its own input
        let mut acc = Content::new();
        f.update_values(&spec(json!({"yobob": "Some Title"})), &mut acc);
        assert_eq!(acc.get("yobob"), Some(&json!("some_title")));

        // neither present: untouched
        let mut acc = Content::new();
        f.update_values(&spec(json!({"other": 1})), &mut acc);
        assert!(acc.is_empty());
    }

    #[test]
    fn relational_kinds_leave_the_accumulator_alone() {
        for kind in [
            FieldKind::Id,
            FieldKind::Image,
            FieldKind::Link,
            FieldKind::Collection,
            FieldKind::Part,
        ] {
            let f = field("x", kind, None);
            let mut acc = Content::new();
            f.update_values(&spec(json!({"x": [1, 2]})), &mut acc);
            assert!(acc.is_empty(), "{:?} wrote to the accumulator", kind);
        }
    }

    #[test]
    fn table_additions_per_kind() {
        assert_eq!(
            field("id", FieldKind::Id, None).table_additions(),
            vec![ColumnSpec::new("id", ColumnType::Serial)]
        );
        assert_eq!(
            field("gogon", FieldKind::String, None).table_additions(),
            vec![ColumnSpec::new("gogon", ColumnType::Varchar(256))]
        );
        assert!(field("yellows", FieldKind::Collection, None)
            .table_additions()
            .is_empty());
        assert!(field("pic", FieldKind::Image, None).table_additions().is_empty());
    }

    #[test]
    fn part_synthesizes_two_subfields() {
        let f = field("zap", FieldKind::Part, None);
        assert_eq!(f.subfield_slugs(), vec!["zap_id", "zap_position"]);
        assert_eq!(
            field("pic", FieldKind::Image, None).subfield_slugs(),
            vec!["pic_id"]
        );
    }

    #[test]
    fn field_row_parses_and_defaults() {
        let row = spec(json!({
            "id": 3, "name": "Yellows", "type": "collection",
            "model_id": 5, "target_id": 7, "dependent": 1
        }));
        let parsed = FieldRow::from_content(&row).unwrap();
        assert_eq!(parsed.slug, "yellows");
        assert_eq!(parsed.kind, FieldKind::Collection);
        assert_eq!(parsed.target_id, Some(7));
        assert!(parsed.dependent);
        assert!(parsed.editable);

        let bad = spec(json!({"id": 1, "type": "nope", "model_id": 1}));
        assert!(FieldRow::from_content(&bad).is_err());
    }
}
