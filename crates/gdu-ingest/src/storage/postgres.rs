//! PostgreSQL record store

use super::{
    insert_columns, qualified_table, table_columns, RecordStore, TableSnapshot, UploadTransaction,
    ID_COLUMN,
};
use crate::config::validate_identifier;
use crate::error::{IngestError, IngestResult};
use crate::schema::FieldKind;
use crate::types::{FileType, HashedRecord, RecordHash, Value};
use async_trait::async_trait;
use sqlx::postgres::Postgres;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, QueryBuilder, Row, Transaction};
use std::collections::HashSet;
use tracing::{debug, info};

/// Bind parameter limit of the PostgreSQL wire protocol
const MAX_BIND_PARAMS: usize = 65_535;

/// Quote a column name; field names are static identifiers, some of them keywords
fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Idempotent DDL for one file type's table
pub fn create_table_sql(schema: &str, file_type: FileType) -> String {
    let mut columns = vec![format!("{ID_COLUMN} BIGSERIAL PRIMARY KEY")];
    columns.extend(
        file_type
            .schema()
            .fields
            .iter()
            .map(|f| format!("{} {}", quote(f.name), f.kind.sql_type())),
    );
    columns.push("source_file TEXT NOT NULL".to_string());
    columns.push("upload_timestamp TIMESTAMPTZ NOT NULL DEFAULT NOW()".to_string());
    columns.push("record_hash CHAR(64) NOT NULL UNIQUE".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        qualified_table(schema, file_type),
        columns.join(",\n    ")
    )
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> IngestResult<Self> {
        let schema = schema.into();
        validate_identifier(&schema)?;
        Ok(Self { pool, schema })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, file_type: FileType) -> IngestResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(qualified_table(&self.schema, file_type))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    fn schema_name(&self) -> &str {
        &self.schema
    }

    async fn ensure_table(&self, file_type: FileType) -> IngestResult<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema))
            .execute(&self.pool)
            .await?;
        sqlx::query(&create_table_sql(&self.schema, file_type))
            .execute(&self.pool)
            .await?;

        info!(
            table = %qualified_table(&self.schema, file_type),
            "Destination table ready"
        );
        Ok(())
    }

    async fn existing_hashes(
        &self,
        file_type: FileType,
        hashes: &[RecordHash],
    ) -> IngestResult<HashSet<RecordHash>> {
        if hashes.is_empty() || !self.table_exists(file_type).await? {
            return Ok(HashSet::new());
        }

        let query = format!(
            "SELECT record_hash FROM {} WHERE record_hash = ANY($1::bpchar[])",
            qualified_table(&self.schema, file_type)
        );
        let wanted: Vec<String> = hashes.iter().map(|h| h.as_str().to_string()).collect();
        let rows = sqlx::query(&query)
            .bind(wanted)
            .fetch_all(&self.pool)
            .await?;

        let mut existing = HashSet::with_capacity(rows.len());
        for row in rows {
            let hash: String = row.try_get("record_hash")?;
            existing.insert(RecordHash::from_hex(hash.trim_end().to_string()));
        }

        debug!(
            file_type = %file_type,
            queried = hashes.len(),
            existing = existing.len(),
            "Checked existing hashes"
        );
        Ok(existing)
    }

    async fn snapshot(&self, file_type: FileType) -> IngestResult<TableSnapshot> {
        let columns: Vec<String> = table_columns(file_type)
            .into_iter()
            .map(str::to_string)
            .collect();

        if !self.table_exists(file_type).await? {
            return Ok(TableSnapshot {
                columns,
                rows: Vec::new(),
            });
        }

        let select = columns
            .iter()
            .map(|c| format!("{}::text", quote(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT {select} FROM {} ORDER BY {ID_COLUMN}",
            qualified_table(&self.schema, file_type)
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value: Option<String> = row.try_get(i)?;
                values.push(value.unwrap_or_default());
            }
            out.push(values);
        }

        Ok(TableSnapshot { columns, rows: out })
    }

    async fn begin(&self) -> IngestResult<Box<dyn UploadTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUploadTransaction {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

struct PgUploadTransaction {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

fn push_value(b: &mut Separated<'_, '_, Postgres, &'static str>, kind: FieldKind, value: &Value) {
    match value {
        Value::Int(v) => {
            b.push_bind(*v);
        }
        Value::Float(v) => {
            b.push_bind(*v);
        }
        Value::Text(s) => {
            b.push_bind(s.clone());
        }
        Value::Null => match kind {
            FieldKind::Integer => {
                b.push_bind(None::<i64>);
            }
            FieldKind::Float => {
                b.push_bind(None::<f64>);
            }
            FieldKind::Text | FieldKind::Chromosome | FieldKind::Allele => {
                b.push_bind(None::<String>);
            }
        },
    }
}

#[async_trait]
impl UploadTransaction for PgUploadTransaction {
    async fn insert(
        &mut self,
        file_type: FileType,
        source_file: &str,
        records: &[HashedRecord],
    ) -> IngestResult<u64> {
        let schema = file_type.schema();
        let names: Vec<String> = insert_columns(file_type).into_iter().map(quote).collect();

        let rows_per_statement = (MAX_BIND_PARAMS / names.len()).max(1);
        let prefix = format!(
            "INSERT INTO {} ({}) ",
            qualified_table(&self.schema, file_type),
            names.join(", ")
        );

        let mut inserted = 0;
        for batch in records.chunks(rows_per_statement) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&prefix);
            query_builder.push_values(batch, |mut b, hashed| {
                for (field, value) in schema.fields.iter().zip(&hashed.record.values) {
                    push_value(&mut b, field.kind, value);
                }
                b.push_bind(source_file.to_string())
                    .push_bind(hashed.hash.as_str().to_string());
            });

            let result = query_builder.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn commit(self: Box<Self>) -> IngestResult<()> {
        self.tx.commit().await.map_err(IngestError::from)
    }

    async fn rollback(self: Box<Self>) -> IngestResult<()> {
        self.tx.rollback().await.map_err(IngestError::from)
    }
}
