//! A PostgreSQL database acting as an organization.
//!
//! Tables are object types, foreign keys are relationship fields. Rows travel
//! as JSON (`row_to_json` on read, `json_populate_record` on write) so no
//! per-column type mapping is needed on this side.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    PgPool, Row,
    postgres::{PgPoolOptions, PgRow},
};
use tracing::{debug, trace};

use crate::{
    MigrateError, Result,
    catalog::Catalog,
    model::{Fields, RelationshipDescriptor, SourceRecord, TargetId},
    store::{CreateOutcome, RecordSource, TargetStore},
};

const MAX_CONNECTIONS: u32 = 32;

const DESCRIBE_FOREIGN_KEYS: &str = r#"
SELECT kcu.column_name::text AS column_name,
       ccu.table_name::text AS target_table,
       (col.is_nullable = 'NO') AS is_required,
       (col.is_generated = 'NEVER') AS is_creatable
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
  ON kcu.constraint_name = tc.constraint_name AND kcu.table_schema = tc.table_schema
JOIN information_schema.constraint_column_usage ccu
  ON ccu.constraint_name = tc.constraint_name AND ccu.constraint_schema = tc.table_schema
JOIN information_schema.columns col
  ON col.table_schema = kcu.table_schema AND col.table_name = kcu.table_name AND col.column_name = kcu.column_name
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1 AND tc.table_name = $2
ORDER BY kcu.column_name, ccu.table_name
"#;

#[derive(Debug, Clone)]
pub struct PostgresOrg {
    pool: PgPool,
    schema: String,
    id_field: String,
}

impl PostgresOrg {
    pub async fn connect(
        db_url: &str,
        schema: &str,
        id_field: &str,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new().acquire_timeout(Duration::from_secs(5)).max_connections(MAX_CONNECTIONS).connect(db_url).await?;
        debug!(schema, "connected to postgres organization");

        Ok(Self::with_pool(pool, schema, id_field))
    }

    pub fn with_pool(
        pool: PgPool,
        schema: &str,
        id_field: &str,
    ) -> Self {
        Self {
            pool,
            schema: schema.to_string(),
            id_field: id_field.to_string(),
        }
    }

    fn table(
        &self,
        object_type: &str,
    ) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(object_type))
    }

    async fn insert_one(
        &self,
        object_type: &str,
        payload: Fields,
    ) -> Result<TargetId> {
        let sql = insert_sql(&self.table(object_type), &self.id_field, &payload);
        let row = sqlx::query(&sql).bind(Value::Object(payload.into_iter().collect()).to_string()).fetch_one(&self.pool).await?;
        Ok(row.try_get::<String, _>(0)?)
    }
}

/// Quote an identifier for interpolation into SQL.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn insert_sql(
    table: &str,
    id_field: &str,
    payload: &Fields,
) -> String {
    let id = quote_ident(id_field);
    if payload.is_empty() {
        return format!("INSERT INTO {table} DEFAULT VALUES RETURNING {id}::text");
    }
    let columns = payload.keys().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    format!("INSERT INTO {table} ({columns}) SELECT {columns} FROM json_populate_record(NULL::{table}, $1::json) RETURNING {id}::text")
}

fn update_sql(
    table: &str,
    id_field: &str,
    fields: &Fields,
) -> String {
    let assignments = fields
        .keys()
        .map(|c| {
            let column = quote_ident(c);
            format!("{column} = src.{column}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {table} AS dst SET {assignments} FROM json_populate_record(NULL::{table}, $1::json) AS src WHERE dst.{}::text = $2",
        quote_ident(id_field)
    )
}

fn row_to_record(
    object_type: &str,
    id: &str,
    row: &PgRow,
) -> Result<SourceRecord> {
    let text = row.try_get::<String, _>(0)?;
    let fields = match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => map.into_iter().collect::<Fields>(),
        other => return Err(MigrateError::Convert(format!("expected a JSON object row, got {}", other))),
    };

    Ok(SourceRecord {
        object_type: object_type.to_string(),
        source_id: id.to_string(),
        fields,
    })
}

#[async_trait]
impl Catalog for PostgresOrg {
    async fn describe_relationships(
        &self,
        object_type: &str,
    ) -> Result<Vec<RelationshipDescriptor>> {
        trace!("postgres::describe_relationships({})", object_type);
        let rows = sqlx::query(DESCRIBE_FOREIGN_KEYS)
            .bind(&self.schema)
            .bind(object_type)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::Catalog(e.to_string()))?;

        let mut descriptors: Vec<RelationshipDescriptor> = Vec::new();
        for row in rows {
            let column = row.try_get::<String, _>("column_name")?;
            let target = row.try_get::<String, _>("target_table")?;
            let is_required = row.try_get::<bool, _>("is_required")?;
            let is_creatable = row.try_get::<bool, _>("is_creatable")?;

            // composite or repeated constraints on one column widen its targets
            match descriptors.iter_mut().find(|d| d.field_name == column) {
                Some(descriptor) => {
                    descriptor.target_object_types.insert(target);
                }
                None => {
                    let mut descriptor = RelationshipDescriptor::new(column, [target]);
                    descriptor.is_required = is_required;
                    descriptor.is_creatable = is_creatable;
                    descriptors.push(descriptor);
                }
            }
        }
        Ok(descriptors)
    }
}

#[async_trait]
impl RecordSource for PostgresOrg {
    async fn fetch_by_id(
        &self,
        object_type: &str,
        id: &str,
    ) -> Result<Option<SourceRecord>> {
        trace!("postgres::fetch_by_id({}, {})", object_type, id);
        let sql = format!("SELECT row_to_json(t)::text FROM {} AS t WHERE t.{}::text = $1", self.table(object_type), quote_ident(&self.id_field));
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await.map_err(|e| MigrateError::Source(e.to_string()))?;

        row.map(|row| row_to_record(object_type, id, &row)).transpose()
    }
}

#[async_trait]
impl TargetStore for PostgresOrg {
    async fn create_many(
        &self,
        object_type: &str,
        payloads: Vec<Fields>,
    ) -> Result<Vec<CreateOutcome>> {
        trace!("postgres::create_many({}, {})", object_type, payloads.len());
        let mut outcomes = Vec::with_capacity(payloads.len());
        // one statement per row keeps every row's outcome separate
        for payload in payloads {
            match self.insert_one(object_type, payload).await {
                Ok(id) => outcomes.push(Ok(id)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => outcomes.push(Err(e.to_string())),
            }
        }
        Ok(outcomes)
    }

    async fn update_by_id(
        &self,
        object_type: &str,
        target_id: &str,
        fields: Fields,
    ) -> Result<()> {
        trace!("postgres::update_by_id({}, {})", object_type, target_id);
        if fields.is_empty() {
            return Ok(());
        }
        let sql = update_sql(&self.table(object_type), &self.id_field, &fields);
        let done = sqlx::query(&sql).bind(Value::Object(fields.into_iter().collect()).to_string()).bind(target_id).execute(&self.pool).await?;

        if done.rows_affected() == 0 {
            return Err(MigrateError::Store(format!("{} {} does not exist", object_type, target_id)));
        }
        Ok(())
    }

    async fn query_by_field(
        &self,
        object_type: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<TargetId>> {
        trace!("postgres::query_by_field({}, {}, {})", object_type, field, value);
        let sql = format!(
            "SELECT {id}::text FROM {table} WHERE {field}::text = $1 LIMIT 1",
            id = quote_ident(&self.id_field),
            table = self.table(object_type),
            field = quote_ident(field)
        );
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;

        Ok(row.map(|row| row.try_get::<String, _>(0)).transpose()?)
    }
}
