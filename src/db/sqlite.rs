// SQLite implementation of the SQL collaborator.
//
// The in-memory variant backs the test suite. The pool is capped at a
// single connection: pooled connections to `sqlite::memory:` would each
// open a private database.

use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::content::Content;
use crate::db::{
    clause_from, column_list, ident, write_pairs, ColumnSpec, ColumnType, Placeholder, SqlBackend,
};
use crate::error::{EngineError, EngineResult};

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub async fn connect(url: &str) -> EngineResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| EngineError::Sql(format!("failed to connect to {}: {}", url, e)))?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> EngineResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    fn render_type(ctype: &ColumnType, altering: bool) -> String {
        match ctype {
            ColumnType::Serial => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            ColumnType::Integer { default: None } => "integer".to_string(),
            ColumnType::Integer { default: Some(d) } => format!("integer DEFAULT {}", d),
            ColumnType::Varchar(n) => format!("VARCHAR({})", n),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            // ALTER TABLE ADD COLUMN only admits constant defaults, so an
            // added timestamp column is plain; the engine stamps timestamp
            // fields on insert.
            ColumnType::Timestamp if altering => "TIMESTAMP".to_string(),
            ColumnType::Timestamp => "TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP".to_string(),
        }
    }

    async fn run(&self, sql: &str, args: &[Value]) -> EngineResult<u64> {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Sql(format!("{} ({})", e, sql)))?;
        Ok(result.rows_affected())
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Content {
    let mut out = Content::new();
    for col in row.columns() {
        let i = col.ordinal();
        if let Ok(raw) = row.try_get_raw(i) {
            if raw.is_null() {
                out.insert(col.name().to_string(), Value::Null);
                continue;
            }
        }
        let hint = col.type_info().name().to_uppercase();
        let value = if hint.contains("BOOL") {
            row.try_get::<bool, _>(i)
                .map(Value::Bool)
                .or_else(|_| row.try_get::<i64, _>(i).map(|v| Value::Bool(v != 0)))
                .ok()
        } else if hint.contains("INT") {
            row.try_get::<i64, _>(i).map(|v| Value::Number(v.into())).ok()
        } else if hint.contains("REAL") || hint.contains("FLOA") || hint.contains("DOUB") {
            row.try_get::<f64, _>(i)
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        } else {
            row.try_get::<String, _>(i).map(Value::String).ok()
        };
        let value = value
            .or_else(|| row.try_get::<i64, _>(i).map(|v| Value::Number(v.into())).ok())
            .or_else(|| {
                row.try_get::<f64, _>(i)
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
            })
            .or_else(|| row.try_get::<String, _>(i).map(Value::String).ok())
            .unwrap_or(Value::Null);
        out.insert(col.name().to_string(), value);
    }
    out
}

#[async_trait]
impl SqlBackend for SqliteBackend {
    async fn query(&self, sql: &str, args: &[Value]) -> EngineResult<Vec<Content>> {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_value(query, arg);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EngineError::Sql(format!("{} ({})", e, sql)))?;
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn fetch(
        &self,
        table: &str,
        where_template: &str,
        args: &[Value],
    ) -> EngineResult<Vec<Content>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {}",
            ident(table)?,
            clause_from(where_template, Placeholder::Question, 0)
        );
        self.query(&sql, args).await
    }

    async fn choose(&self, table: &str, id: i64) -> EngineResult<Option<Content>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?1", ident(table)?);
        let mut rows = self.query(&sql, &[Value::Number(id.into())]).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn insert(&self, table: &str, values: &Content) -> EngineResult<Content> {
        let pairs = write_pairs(values);
        let sql = if pairs.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING *", ident(table)?)
        } else {
            let mut cols = Vec::with_capacity(pairs.len());
            let mut slots = Vec::with_capacity(pairs.len());
            let mut n = 0;
            for (col, bound) in &pairs {
                cols.push(ident(col)?);
                match bound {
                    Some(_) => {
                        n += 1;
                        slots.push(format!("?{}", n));
                    }
                    None => slots.push("CURRENT_TIMESTAMP".to_string()),
                }
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                ident(table)?,
                cols.join(", "),
                slots.join(", ")
            )
        };
        let mut query = sqlx::query(&sql);
        for (_, bound) in &pairs {
            if let Some(value) = bound {
                query = bind_value(query, value);
            }
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::Sql(format!("insert into {} failed: {}", table, e)))?;
        Ok(decode_row(&row))
    }

    async fn update(
        &self,
        table: &str,
        values: &Content,
        where_template: &str,
        args: &[Value],
    ) -> EngineResult<u64> {
        let pairs = write_pairs(values);
        if pairs.is_empty() {
            return Ok(0);
        }
        let mut sets = Vec::with_capacity(pairs.len());
        let mut n = 0;
        for (col, bound) in &pairs {
            match bound {
                Some(_) => {
                    n += 1;
                    sets.push(format!("{} = ?{}", ident(col)?, n));
                }
                None => sets.push(format!("{} = CURRENT_TIMESTAMP", ident(col)?)),
            }
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            ident(table)?,
            sets.join(", "),
            clause_from(where_template, Placeholder::Question, n)
        );
        let mut query = sqlx::query(&sql);
        for (_, bound) in &pairs {
            if let Some(value) = bound {
                query = bind_value(query, value);
            }
        }
        for arg in args {
            query = bind_value(query, arg);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Sql(format!("update {} failed: {}", table, e)))?;
        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        table: &str,
        where_template: &str,
        args: &[Value],
    ) -> EngineResult<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            ident(table)?,
            clause_from(where_template, Placeholder::Question, 0)
        );
        self.run(&sql, args).await
    }

    async fn create_table(&self, name: &str, extra: &[ColumnSpec]) -> EngineResult<()> {
        let mut columns = vec![format!(
            "\"id\" {}",
            Self::render_type(&ColumnType::Serial, false)
        )];
        for spec in extra {
            columns.push(format!(
                "{} {}",
                ident(&spec.name)?,
                Self::render_type(&spec.ctype, false)
            ));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            ident(name)?,
            columns.join(", ")
        );
        tracing::debug!(table = name, "create table");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn add_column(&self, table: &str, spec: &ColumnSpec) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            ident(table)?,
            ident(&spec.name)?,
            Self::render_type(&spec.ctype, true)
        );
        tracing::debug!(table, column = %spec.name, "add column");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn rename_column(&self, table: &str, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            ident(table)?,
            ident(old)?,
            ident(new)?
        );
        tracing::debug!(table, old, new, "rename column");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn drop_column(&self, table: &str, name: &str) -> EngineResult<()> {
        let sql = format!("ALTER TABLE {} DROP COLUMN {}", ident(table)?, ident(name)?);
        tracing::debug!(table, column = name, "drop column");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn rename_table(&self, old: &str, new: &str) -> EngineResult<()> {
        let sql = format!("ALTER TABLE {} RENAME TO {}", ident(old)?, ident(new)?);
        tracing::debug!(old, new, "rename table");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn drop_table(&self, name: &str) -> EngineResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", ident(name)?);
        tracing::debug!(table = name, "drop table");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                &[Value::String(name.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn recursive_query(
        &self,
        table: &str,
        columns: &[&str],
        base_template: &str,
        base_args: &[Value],
        recur_join: &str,
    ) -> EngineResult<Vec<Content>> {
        let list = column_list(columns)?;
        let recur_list = if list == "*" {
            "t.*".to_string()
        } else {
            columns
                .iter()
                .map(|c| ident(c).map(|q| format!("t.{}", q)))
                .collect::<EngineResult<Vec<_>>>()?
                .join(", ")
        };
        let sql = format!(
            "WITH RECURSIVE lineage AS (\
             SELECT {list} FROM {table} WHERE {base} \
             UNION ALL \
             SELECT {recur_list} FROM {table} t JOIN lineage l ON {join}\
             ) SELECT * FROM lineage",
            list = list,
            table = ident(table)?,
            base = clause_from(base_template, Placeholder::Question, 0),
            recur_list = recur_list,
            join = recur_join,
        );
        self.query(&sql, base_args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn backend() -> SqliteBackend {
        SqliteBackend::in_memory().await.unwrap()
    }

    fn content(v: serde_json::Value) -> Content {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn create_insert_choose_roundtrip() {
        let db = backend().await;
        db.create_table(
            "things",
            &[
                ColumnSpec::new("name", ColumnType::Varchar(256)),
                ColumnSpec::new("flag", ColumnType::Boolean),
                ColumnSpec::new("created_at", ColumnType::Timestamp),
            ],
        )
        .await
        .unwrap();

        let row = db
            .insert("things", &content(json!({"name": "a", "flag": true})))
            .await
            .unwrap();
        let id = crate::content::get_i64(&row, "id").unwrap();
        assert_eq!(id, 1);
        assert_eq!(row.get("name"), Some(&json!("a")));
        assert_eq!(crate::content::get_bool(&row, "flag"), Some(true));
        // DDL default filled in
        assert!(row.get("created_at").unwrap().is_string());

        let chosen = db.choose("things", id).await.unwrap().unwrap();
        assert_eq!(chosen.get("name"), Some(&json!("a")));
        assert!(db.choose("things", 999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_with_sentinel_and_where_offset() {
        let db = backend().await;
        db.create_table(
            "things",
            &[
                ColumnSpec::new("name", ColumnType::Varchar(256)),
                ColumnSpec::new("updated_at", ColumnType::Timestamp),
            ],
        )
        .await
        .unwrap();
        let row = db
            .insert("things", &content(json!({"name": "a"})))
            .await
            .unwrap();
        let id = crate::content::get_i64(&row, "id").unwrap();

        let affected = db
            .update(
                "things",
                &content(json!({"name": "b", "updated_at": super::super::CURRENT_TIMESTAMP})),
                "id = %1",
                &[json!(id)],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);
        let row = db.choose("things", id).await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&json!("b")));
        assert!(row.get("updated_at").unwrap().is_string());
    }

    #[tokio::test]
    async fn schema_mutation_verbs() {
        let db = backend().await;
        db.create_table("foo", &[ColumnSpec::new("bar", ColumnType::Varchar(256))])
            .await
            .unwrap();
        assert!(db.table_exists("foo").await.unwrap());

        db.add_column("foo", &ColumnSpec::new("extra", ColumnType::Integer { default: None }))
            .await
            .unwrap();
        db.insert("foo", &content(json!({"bar": "x", "extra": 7})))
            .await
            .unwrap();

        db.rename_column("foo", "bar", "qux").await.unwrap();
        let rows = db.fetch("foo", "qux = %1", &[json!("x")]).await.unwrap();
        assert_eq!(rows.len(), 1);

        db.drop_column("foo", "extra").await.unwrap();
        db.rename_table("foo", "baz").await.unwrap();
        assert!(!db.table_exists("foo").await.unwrap());
        assert!(db.table_exists("baz").await.unwrap());

        db.drop_table("baz").await.unwrap();
        // tolerant when already absent
        db.drop_table("baz").await.unwrap();
        assert!(!db.table_exists("baz").await.unwrap());
    }

    #[tokio::test]
    async fn recursive_walks_parent_chain() {
        let db = backend().await;
        db.create_table(
            "tree",
            &[ColumnSpec::new("parent_id", ColumnType::Integer { default: None })],
        )
        .await
        .unwrap();
        let root = db.insert("tree", &Content::new()).await.unwrap();
        let root_id = crate::content::get_i64(&root, "id").unwrap();
        let mid = db
            .insert("tree", &content(json!({"parent_id": root_id})))
            .await
            .unwrap();
        let mid_id = crate::content::get_i64(&mid, "id").unwrap();
        let leaf = db
            .insert("tree", &content(json!({"parent_id": mid_id})))
            .await
            .unwrap();
        let leaf_id = crate::content::get_i64(&leaf, "id").unwrap();

        let up = db
            .recursive_query("tree", &["*"], "id = %1", &[json!(leaf_id)], "t.id = l.parent_id")
            .await
            .unwrap();
        assert_eq!(up.len(), 3);

        let down = db
            .recursive_query("tree", &["*"], "id = %1", &[json!(root_id)], "t.parent_id = l.id")
            .await
            .unwrap();
        assert_eq!(down.len(), 3);
    }
}
