//! Model descriptors.
//!
//! A model is a logical entity backed 1:1 by a SQL table named after its
//! slug. Descriptors are built from `model` table rows plus their `field`
//! rows and live in the registry behind `Arc`; readers always hold a fully
//! constructed snapshot.

use crate::content::{self, Content};
use crate::error::{EngineError, EngineResult};
use crate::field::Field;

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub position: i64,
    pub nested: bool,
    pub locked: bool,
    /// Field instances in field-row id order.
    pub fields: Vec<Field>,
}

impl ModelDescriptor {
    pub fn from_content(row: &Content, fields: Vec<Field>) -> EngineResult<Self> {
        let id = content::get_i64(row, "id")
            .ok_or_else(|| EngineError::BadDescriptor("model row without id".to_string()))?;
        let slug = content::get_str(row, "slug")
            .ok_or_else(|| EngineError::BadDescriptor(format!("model {} without slug", id)))?
            .to_string();
        Ok(Self {
            id,
            name: content::get_str(row, "name").unwrap_or(&slug).to_string(),
            slug,
            description: content::get_str(row, "description").unwrap_or("").to_string(),
            position: content::get_i64(row, "position").unwrap_or(0),
            nested: content::get_bool(row, "nested").unwrap_or(false),
            locked: content::get_bool(row, "locked").unwrap_or(false),
            fields,
        })
    }

    /// Look up a field by its slug.
    pub fn field(&self, slug: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.row.slug == slug)
    }

    pub fn field_by_id(&self, id: i64) -> Option<&Field> {
        self.fields.iter().find(|f| f.row.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, FieldRow};
    use serde_json::json;

    fn field(id: i64, slug: &str, kind: FieldKind) -> Field {
        Field {
            row: FieldRow {
                id,
                name: slug.to_string(),
                slug: slug.to_string(),
                kind,
                model_id: 1,
                target_id: None,
                link_id: None,
                dependent: false,
                editable: true,
                locked: false,
                immutable: false,
            },
            link: None,
        }
    }

    #[test]
    fn builds_from_row_and_resolves_fields() {
        let row = json!({"id": 7, "name": "Yellow", "slug": "yellow", "nested": 1})
            .as_object()
            .unwrap()
            .clone();
        let m = ModelDescriptor::from_content(
            &row,
            vec![field(1, "id", FieldKind::Id), field(2, "gogon", FieldKind::String)],
        )
        .unwrap();
        assert_eq!(m.id, 7);
        assert_eq!(m.slug, "yellow");
        assert!(m.nested);
        assert!(m.field("gogon").is_some());
        assert!(m.field_by_id(1).is_some());
        assert!(m.field("missing").is_none());
    }

    #[test]
    fn rejects_rows_without_identity() {
        let row = json!({"name": "x"}).as_object().unwrap().clone();
        assert!(ModelDescriptor::from_content(&row, vec![]).is_err());
    }
}
