// SQL collaborator - the engine's only external dependency.
//
// The engine never writes dialect SQL itself: field kinds emit abstract
// column specs and the coordinator speaks this trait, so the SQLite and
// Postgres backends are interchangeable.

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

use crate::content::Content;
use crate::error::{EngineError, EngineResult};

pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

/// Write-payload sentinel: a value equal to this string is spliced into DML
/// as the SQL `CURRENT_TIMESTAMP` keyword instead of being bound.
pub const CURRENT_TIMESTAMP: &str = "current_timestamp";

/// Abstract column type; each backend renders its own dialect DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    Serial,
    Integer { default: Option<i64> },
    Varchar(u16),
    Text,
    Boolean,
    /// Timezone-aware timestamp, NOT NULL, defaulting to now.
    Timestamp,
}

/// A single column DDL spec contributed by a field kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub ctype: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, ctype: ColumnType) -> Self {
        Self {
            name: name.into(),
            ctype,
        }
    }
}

/// Placeholder dialects for `%N` clause templates.
#[derive(Debug, Clone, Copy)]
pub enum Placeholder {
    /// `$1`, `$2`, ... (Postgres)
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    Question,
}

/// Expand a `%N`-templated clause into the backend's placeholder syntax.
/// Values are always bound, never interpolated.
pub fn clause(template: &str, style: Placeholder) -> String {
    clause_from(template, style, 0)
}

/// As `clause`, shifting every position by `offset`. Used when a WHERE
/// template follows already-bound SET values.
pub(crate) fn clause_from(template: &str, style: Placeholder, offset: usize) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '%' && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            let mut num = String::new();
            while let Some(d) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
                num.push(d);
                chars.next();
            }
            let n: usize = num.parse().unwrap_or(0) + offset;
            match style {
                Placeholder::Dollar => out.push('$'),
                Placeholder::Question => out.push('?'),
            }
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Validate and quote a table or column identifier. Slugified names always
/// pass; anything else is rejected rather than escaped.
pub fn ident(name: &str) -> EngineResult<String> {
    let ok = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !ok {
        return Err(EngineError::Sql(format!("invalid identifier: {:?}", name)));
    }
    Ok(format!("\"{}\"", name))
}

/// Split a write payload into bound and spliced parts. Returns
/// `(column, Some(value))` for bindable values and `(column, None)` for the
/// `current_timestamp` sentinel, which the backend renders as raw SQL.
pub fn write_pairs(values: &Content) -> Vec<(&str, Option<&Value>)> {
    values
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) if s == CURRENT_TIMESTAMP => (k.as_str(), None),
            other => (k.as_str(), Some(other)),
        })
        .collect()
}

/// The SQL collaborator interface consumed by the engine core.
///
/// Templates in `where_template` use positional `%N` placeholders resolved
/// against `args`; backends bind every argument.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Run arbitrary SQL and decode every row into a content map.
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>>;

    /// `SELECT * FROM table WHERE <template>`.
    async fn fetch(
        &self,
        table: &str,
        where_template: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>>;

    /// Fetch a single row by primary key.
    async fn choose(&self, table: &str, id: i64) -> EngineResult<Option<Content>>;

    /// Insert and return the stored row.
    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content>;

    /// Update matching rows, returning the affected count.
    async fn update(
        &self,
        table: &str,
        values: &Content,
        where_template: &str,
        args: &[Value],
    ) -> EngineResult<u64>;

    /// Delete matching rows, returning the affected count.
    async fn delete(&self, table: &str, where_template: &str, args: &[Value])
        -> EngineResult<u64>;

    /// Create a table with a serial `id` primary key plus `extra` columns.
    async fn create_table(&self, name: &str, extra: &[ColumnSpec]) -> EngineResult<()>;

    async fn add_column(&self, table: &str, spec: &ColumnSpec) -> EngineResult<()>;

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()>;

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()>;

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()>;

    /// Tolerant of the table already being absent.
    async fn drop_table(&self, name: &str) -> EngineResult<()>;

    async fn table_exists(&self, name: &str) -> EngineResult<bool>;

    /// Recursive CTE walk over `table`: seed rows matching `base_template`,
    /// then repeatedly join `table t` against the accumulated set `l` on
    /// `recur_join` until fixpoint.
    async fn recursive_query(
        &self,
        table: &str,
        columns: &[&str],
        base_template: &str,
        base_args: &[Value],
        recur_join: &str,
    ) -> EngineResult<Vec<Content>>;
}

/// Shared SELECT-list rendering for the recursive CTE.
pub(crate) fn column_list(columns: &[&str]) -> EngineResult<String> {
    if columns.is_empty() || columns == ["*"] {
        return Ok("*".to_string());
    }
    let quoted: EngineResult<Vec<String>> = columns.iter().map(|c| ident(c)).collect();
    Ok(quoted?.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clause_expands_positional_placeholders() {
        assert_eq!(clause("id = %1", Placeholder::Dollar), "id = $1");
        assert_eq!(clause("id = %1", Placeholder::Question), "id = ?1");
        assert_eq!(
            clause("a = %2 AND b = %1", Placeholder::Dollar),
            "a = $2 AND b = $1"
        );
        assert_eq!(clause("pct = '100%'", Placeholder::Dollar), "pct = '100%'");
    }

    #[test]
    fn ident_rejects_injection() {
        assert!(ident("yellow").is_ok());
        assert!(ident("zap_id").is_ok());
        assert!(ident("bad name").is_err());
        assert!(ident("x\"; drop table y").is_err());
        assert!(ident("").is_err());
    }

    #[test]
    fn write_pairs_isolates_timestamp_sentinel() {
        let mut values = Content::new();
        values.insert("name".into(), json!("x"));
        values.insert("updated_at".into(), json!(CURRENT_TIMESTAMP));
        let pairs = write_pairs(&values);
        let bound: Vec<_> = pairs.iter().filter(|(_, v)| v.is_some()).collect();
        let spliced: Vec<_> = pairs.iter().filter(|(_, v)| v.is_none()).collect();
        assert_eq!(bound.len(), 1);
        assert_eq!(spliced.len(), 1);
        assert_eq!(spliced[0].0, "updated_at");
    }
}
