//! PostgreSQL storage implementation

use crate::error::{StorageError, StorageResult};
use crate::record::Record;
use crate::traits::*;
use crate::unit_of_work::{Mutation, StoredRecord, UnitOfWork};
use async_trait::async_trait;
use pubflow_types::{
    ContentItem, ContentItemId, HierarchyField, HierarchyFieldValue, LiveHierarchy,
    PublicationRequest, PublicationRequestId, PublicationStatus, ReductionStatus, ReductionTask,
    ReductionTaskId, SelectionGroup, SelectionGroupId,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgConnection, PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

/// PostgreSQL-backed storage
///
/// Every entity lives in its own table with the record serialized into a
/// JSONB `data` column. `version` is a real column so conditional updates are
/// a single `UPDATE ... WHERE version = $n`.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

const TABLES: [&str; 6] = [
    ContentItem::ENTITY,
    SelectionGroup::ENTITY,
    ReductionTask::ENTITY,
    PublicationRequest::ENTITY,
    HierarchyField::ENTITY,
    HierarchyFieldValue::ENTITY,
];

impl PostgresTaskStore {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.initialize_schema().await?;
        tracing::info!(max_connections, tables = TABLES.len(), "PostgreSQL task store ready");
        Ok(store)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        for table in TABLES {
            let create = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID PRIMARY KEY,
                    owner_id UUID NOT NULL,
                    status TEXT,
                    version BIGINT NOT NULL,
                    data JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                "#
            );
            let owner_index =
                format!("CREATE INDEX IF NOT EXISTS {table}_owner ON {table}(owner_id);");
            let status_index =
                format!("CREATE INDEX IF NOT EXISTS {table}_status ON {table}(status, created_at);");

            tracing::debug!(table, "Ensuring table exists");
            for stmt in [create, owner_index, status_index] {
                sqlx::query(&stmt)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Query(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn connection(&self) -> StorageResult<sqlx::pool::PoolConnection<sqlx::Postgres>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    async fn fetch_one<T: Record>(&self, id: Uuid) -> StorageResult<Option<T>> {
        let query = format!("SELECT data, version FROM {} WHERE id = $1", T::ENTITY);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        row.map(|r| decode_row(&r)).transpose()
    }

    async fn fetch_where<T: Record>(
        &self,
        clause: &str,
        bind: impl FnOnce(
            sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> StorageResult<Vec<T>> {
        let query = format!(
            "SELECT data, version FROM {} WHERE {} ORDER BY created_at",
            T::ENTITY,
            clause
        );
        let rows = bind(sqlx::query(&query))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        rows.iter().map(decode_row).collect()
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| StorageError::InvalidData(format!("json serialize error: {}", e)))
}

fn decode_row<T: Record>(row: &PgRow) -> StorageResult<T> {
    let data: Value = row
        .try_get("data")
        .map_err(|e| StorageError::Query(e.to_string()))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| StorageError::Query(e.to_string()))?;

    let mut record: T = serde_json::from_value(data)
        .map_err(|e| StorageError::InvalidData(format!("json deserialize error: {}", e)))?;
    // The version column is authoritative.
    record.set_version(version as u64);
    Ok(record)
}

async fn insert_record<T: Record>(conn: &mut PgConnection, mut record: T) -> StorageResult<T> {
    record.set_version(1);
    let query = format!(
        "INSERT INTO {} (id, owner_id, status, version, data) VALUES ($1, $2, $3, $4, $5)",
        T::ENTITY
    );
    sqlx::query(&query)
        .bind(record.key())
        .bind(record.owner())
        .bind(record.status_label())
        .bind(record.version() as i64)
        .bind(to_json(&record)?)
        .execute(conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StorageError::Duplicate(format!("{} {}", T::ENTITY, record.key()))
            }
            other => StorageError::Query(other.to_string()),
        })?;
    Ok(record)
}

async fn update_record<T: Record>(conn: &mut PgConnection, mut record: T) -> StorageResult<T> {
    let expected = record.version();
    record.set_version(expected + 1);

    let query = format!(
        r#"
        UPDATE {}
        SET owner_id = $2, status = $3, version = $4, data = $5, updated_at = now()
        WHERE id = $1 AND version = $6
        "#,
        T::ENTITY
    );
    let result = sqlx::query(&query)
        .bind(record.key())
        .bind(record.owner())
        .bind(record.status_label())
        .bind(record.version() as i64)
        .bind(to_json(&record)?)
        .bind(expected as i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

    if result.rows_affected() == 1 {
        return Ok(record);
    }

    // Nothing matched: either the row is gone or somebody else won the race.
    let query = format!("SELECT version FROM {} WHERE id = $1", T::ENTITY);
    let current: Option<i64> = sqlx::query_scalar(&query)
        .bind(record.key())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;

    match current {
        Some(actual) => Err(StorageError::Conflict {
            entity: T::ENTITY,
            id: record.key().to_string(),
            expected,
            actual: actual as u64,
        }),
        None => Err(StorageError::NotFound(format!("{} {}", T::ENTITY, record.key()))),
    }
}

async fn delete_record(conn: &mut PgConnection, entity: &'static str, key: Uuid) -> StorageResult<()> {
    if !TABLES.contains(&entity) {
        return Err(StorageError::InvalidData(format!("unknown entity {}", entity)));
    }
    let query = format!("DELETE FROM {} WHERE id = $1", entity);
    sqlx::query(&query)
        .bind(key)
        .execute(conn)
        .await
        .map_err(|e| StorageError::Query(e.to_string()))?;
    Ok(())
}

async fn apply_mutation(conn: &mut PgConnection, mutation: Mutation) -> StorageResult<()> {
    match mutation {
        Mutation::Insert(record) => match record {
            StoredRecord::ContentItem(r) => insert_record(conn, r).await.map(drop),
            StoredRecord::SelectionGroup(r) => insert_record(conn, r).await.map(drop),
            StoredRecord::ReductionTask(r) => insert_record(conn, r).await.map(drop),
            StoredRecord::PublicationRequest(r) => insert_record(conn, r).await.map(drop),
            StoredRecord::HierarchyField(r) => insert_record(conn, r).await.map(drop),
            StoredRecord::HierarchyFieldValue(r) => insert_record(conn, r).await.map(drop),
        },
        Mutation::Update(record) => match record {
            StoredRecord::ContentItem(r) => update_record(conn, r).await.map(drop),
            StoredRecord::SelectionGroup(r) => update_record(conn, r).await.map(drop),
            StoredRecord::ReductionTask(r) => update_record(conn, r).await.map(drop),
            StoredRecord::PublicationRequest(r) => update_record(conn, r).await.map(drop),
            StoredRecord::HierarchyField(r) => update_record(conn, r).await.map(drop),
            StoredRecord::HierarchyFieldValue(r) => update_record(conn, r).await.map(drop),
        },
        Mutation::Delete { entity, key } => delete_record(conn, entity, key).await,
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn commit(&self, work: UnitOfWork) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mutations = work.len();
        for mutation in work.into_mutations() {
            // Dropping `tx` on the error path rolls the transaction back.
            if let Err(e) = apply_mutation(&mut tx, mutation).await {
                tracing::warn!(mutations, error = %e, "Unit of work rolled back");
                return Err(e);
            }
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;
        tracing::debug!(mutations, "Unit of work committed");
        Ok(())
    }
}

#[async_trait]
impl ContentStorage for PostgresTaskStore {
    async fn get_content_item(&self, id: &ContentItemId) -> StorageResult<Option<ContentItem>> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn insert_content_item(&self, item: ContentItem) -> StorageResult<ContentItem> {
        let mut conn = self.connection().await?;
        insert_record(&mut conn, item).await
    }

    async fn update_content_item(&self, item: ContentItem) -> StorageResult<ContentItem> {
        let mut conn = self.connection().await?;
        update_record(&mut conn, item).await
    }
}

#[async_trait]
impl SelectionGroupStorage for PostgresTaskStore {
    async fn get_selection_group(
        &self,
        id: &SelectionGroupId,
    ) -> StorageResult<Option<SelectionGroup>> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_selection_groups(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<SelectionGroup>> {
        let owner = *content_item_id.as_uuid();
        let mut groups: Vec<SelectionGroup> = self
            .fetch_where("owner_id = $1", |q| q.bind(owner))
            .await?;
        groups.sort_by(|a, b| (!a.is_master, &a.name).cmp(&(!b.is_master, &b.name)));
        Ok(groups)
    }

    async fn insert_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup> {
        let mut conn = self.connection().await?;
        insert_record(&mut conn, group).await
    }

    async fn update_selection_group(&self, group: SelectionGroup) -> StorageResult<SelectionGroup> {
        let mut conn = self.connection().await?;
        update_record(&mut conn, group).await
    }
}

#[async_trait]
impl HierarchyStorage for PostgresTaskStore {
    async fn load_hierarchy(&self, content_item_id: &ContentItemId) -> StorageResult<LiveHierarchy> {
        let owner = *content_item_id.as_uuid();
        let mut fields: Vec<HierarchyField> = self
            .fetch_where("owner_id = $1", |q| q.bind(owner))
            .await?;
        fields.sort_by(|a, b| a.name.cmp(&b.name));

        let field_ids: Vec<Uuid> = fields.iter().map(|f| *f.id.as_uuid()).collect();
        let mut values: Vec<HierarchyFieldValue> = self
            .fetch_where("owner_id = ANY($1)", |q| q.bind(field_ids))
            .await?;
        values.sort_by(|a, b| (a.field_id, &a.value).cmp(&(b.field_id, &b.value)));

        Ok(LiveHierarchy { fields, values })
    }
}

#[async_trait]
impl ReductionTaskStorage for PostgresTaskStore {
    async fn get_task(&self, id: &ReductionTaskId) -> StorageResult<Option<ReductionTask>> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_tasks_by_status(
        &self,
        statuses: &[ReductionStatus],
    ) -> StorageResult<Vec<ReductionTask>> {
        let labels: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        self.fetch_where("status = ANY($1)", |q| q.bind(labels))
            .await
    }

    async fn list_tasks_for_request(
        &self,
        request_id: &PublicationRequestId,
    ) -> StorageResult<Vec<ReductionTask>> {
        let request = request_id.as_uuid().to_string();
        self.fetch_where("data->>'publication_request_id' = $1", |q| q.bind(request))
            .await
    }

    async fn list_tasks_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<ReductionTask>> {
        let owner = *content_item_id.as_uuid();
        self.fetch_where("owner_id = $1", |q| q.bind(owner)).await
    }

    async fn insert_task(&self, task: ReductionTask) -> StorageResult<ReductionTask> {
        let mut conn = self.connection().await?;
        insert_record(&mut conn, task).await
    }

    async fn update_task(&self, task: ReductionTask) -> StorageResult<ReductionTask> {
        let mut conn = self.connection().await?;
        update_record(&mut conn, task).await
    }
}

#[async_trait]
impl PublicationStorage for PostgresTaskStore {
    async fn get_request(
        &self,
        id: &PublicationRequestId,
    ) -> StorageResult<Option<PublicationRequest>> {
        self.fetch_one(*id.as_uuid()).await
    }

    async fn list_requests_by_status(
        &self,
        statuses: &[PublicationStatus],
    ) -> StorageResult<Vec<PublicationRequest>> {
        let labels: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        self.fetch_where("status = ANY($1)", |q| q.bind(labels))
            .await
    }

    async fn list_requests_for_content_item(
        &self,
        content_item_id: &ContentItemId,
    ) -> StorageResult<Vec<PublicationRequest>> {
        let owner = *content_item_id.as_uuid();
        self.fetch_where("owner_id = $1", |q| q.bind(owner)).await
    }

    async fn insert_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest> {
        let mut conn = self.connection().await?;
        insert_record(&mut conn, request).await
    }

    async fn update_request(&self, request: PublicationRequest) -> StorageResult<PublicationRequest> {
        let mut conn = self.connection().await?;
        update_record(&mut conn, request).await
    }
}
