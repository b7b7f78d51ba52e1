// PostgreSQL implementation of the SQL collaborator.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Number, Value};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::content::Content;
use crate::db::{
    clause_from, column_list, ident, write_pairs, ColumnSpec, ColumnType, Placeholder, SqlBackend,
};
use crate::error::{EngineError, EngineResult};

pub struct PostgresBackend {
    pool: PgPool,
}

impl PostgresBackend {
    pub async fn connect(url: &str, max_connections: u32) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| EngineError::Sql(format!("failed to connect to {}: {}", url, e)))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn render_type(ctype: &ColumnType) -> String {
        match ctype {
            ColumnType::Serial => "SERIAL PRIMARY KEY".to_string(),
            ColumnType::Integer { default: None } => "integer".to_string(),
            ColumnType::Integer { default: Some(d) } => format!("integer DEFAULT {}", d),
            ColumnType::Varchar(n) => format!("varchar({})", n),
            ColumnType::Text => "text".to_string(),
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::Timestamp => {
                "timestamp with time zone NOT NULL DEFAULT current_timestamp".to_string()
            }
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
    query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
    value: &'q Value,
) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
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

fn decode_row(row: &PgRow) -> Content {
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
        let value = match hint.as_str() {
            "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).ok(),
            "INT2" => row
                .try_get::<i16, _>(i)
                .map(|v| Value::Number(i64::from(v).into()))
                .ok(),
            "INT4" => row
                .try_get::<i32, _>(i)
                .map(|v| Value::Number(i64::from(v).into()))
                .ok(),
            "INT8" => row.try_get::<i64, _>(i).map(|v| Value::Number(v.into())).ok(),
            "FLOAT4" | "FLOAT8" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            "TIMESTAMPTZ" => row
                .try_get::<DateTime<Utc>, _>(i)
                .map(|t| Value::String(t.to_rfc3339()))
                .ok(),
            "TIMESTAMP" => row
                .try_get::<NaiveDateTime, _>(i)
                .map(|t| Value::String(t.to_string()))
                .ok(),
            _ => row.try_get::<String, _>(i).map(Value::String).ok(),
        };
        let value = value
            .or_else(|| row.try_get::<String, _>(i).map(Value::String).ok())
            .unwrap_or(Value::Null);
        out.insert(col.name().to_string(), value);
    }
    out
}

#[async_trait]
impl SqlBackend for PostgresBackend {
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
            clause_from(where_template, Placeholder::Dollar, 0)
        );
        self.query(&sql, args).await
    }

    async fn choose(&self, table: &str, id: i64) -> EngineResult<Option<Content>> {
        let sql = format!("SELECT * FROM {} WHERE id = $1", ident(table)?);
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
                        slots.push(format!("${}", n));
                    }
                    None => slots.push("current_timestamp".to_string()),
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
                    sets.push(format!("{} = ${}", ident(col)?, n));
                }
                None => sets.push(format!("{} = current_timestamp", ident(col)?)),
            }
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            ident(table)?,
            sets.join(", "),
            clause_from(where_template, Placeholder::Dollar, n)
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
            clause_from(where_template, Placeholder::Dollar, 0)
        );
        self.run(&sql, args).await
    }

    async fn create_table(&self, name: &str, extra: &[ColumnSpec]) -> EngineResult<()> {
        let mut columns = vec![format!("\"id\" {}", Self::render_type(&ColumnType::Serial))];
        for spec in extra {
            columns.push(format!(
                "{} {}",
                ident(&spec.name)?,
                Self::render_type(&spec.ctype)
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
            Self::render_type(&spec.ctype)
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
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", ident(name)?);
        tracing::debug!(table = name, "drop table");
        self.run(&sql, &[]).await.map(|_| ())
    }

    async fn table_exists(&self, name: &str) -> EngineResult<bool> {
        let rows = self
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1",
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
            base = clause_from(base_template, Placeholder::Dollar, 0),
            recur_list = recur_list,
            join = recur_join,
        );
        self.query(&sql, base_args).await
    }
}
