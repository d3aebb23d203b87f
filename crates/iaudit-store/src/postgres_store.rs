use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iaudit_domain::{
    ExistsStatus, Id, InstanceDelete, InstanceExists, InstanceReconcile, InstanceUsage, Lifecycle,
    RawData, RequestTracker, Timing,
};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::store::{NewInstanceExists, NewRawData, Store};

// DDL — idempotent; run at every startup via migrate(). Each table keeps a
// few indexed columns for the range/uniqueness queries the trait needs and
// stores the full row as JSONB, the same split the rest of the entity store
// uses for its nested/variant-shaped state.
const MIGRATIONS: &str = r#"
CREATE TABLE IF NOT EXISTS raw_data (
    id   BIGSERIAL PRIMARY KEY,
    data JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS lifecycles (
    id          BIGSERIAL PRIMARY KEY,
    instance_id TEXT NOT NULL UNIQUE,
    data        JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS timings (
    id           BIGSERIAL PRIMARY KEY,
    lifecycle_id BIGINT NOT NULL,
    name         TEXT NOT NULL,
    data         JSONB NOT NULL,
    UNIQUE (lifecycle_id, name)
);

CREATE TABLE IF NOT EXISTS request_trackers (
    id         BIGSERIAL PRIMARY KEY,
    request_id TEXT NOT NULL,
    data       JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_request_trackers_request_id ON request_trackers (request_id);

CREATE TABLE IF NOT EXISTS instance_usage (
    id          BIGSERIAL PRIMARY KEY,
    instance_id TEXT NOT NULL,
    request_id  TEXT NOT NULL,
    launched_at TIMESTAMPTZ,
    data        JSONB NOT NULL,
    UNIQUE (instance_id, request_id)
);
CREATE INDEX IF NOT EXISTS idx_instance_usage_instance_launch ON instance_usage (instance_id, launched_at);

CREATE TABLE IF NOT EXISTS instance_delete (
    id          BIGSERIAL PRIMARY KEY,
    instance_id TEXT NOT NULL,
    deleted_at  TIMESTAMPTZ NOT NULL,
    data        JSONB NOT NULL,
    UNIQUE (instance_id, deleted_at)
);
CREATE INDEX IF NOT EXISTS idx_instance_delete_instance_deleted ON instance_delete (instance_id, deleted_at);

CREATE TABLE IF NOT EXISTS instance_exists (
    id                  BIGSERIAL PRIMARY KEY,
    message_id          TEXT NOT NULL UNIQUE,
    instance_id         TEXT NOT NULL,
    status              TEXT NOT NULL,
    audit_period_ending TIMESTAMPTZ NOT NULL,
    data                JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_instance_exists_pending
    ON instance_exists (audit_period_ending) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS instance_reconcile (
    id          BIGSERIAL PRIMARY KEY,
    instance_id TEXT NOT NULL,
    launched_at TIMESTAMPTZ,
    data        JSONB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_instance_reconcile_instance_launch ON instance_reconcile (instance_id, launched_at);
"#;

/// Persistent [`Store`] backed by PostgreSQL.
///
/// All tables are created automatically on first connect via [`PostgresStore::connect`].
/// Each entity keeps a few indexed columns for uniqueness/range filtering and
/// the full row serialized as JSONB, so a store-level schema change never
/// requires a migration for fields the query surface above doesn't filter on.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| StoreError::Database(format!("connect: {e}")))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(MIGRATIONS)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration: {e}")))?;
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(v).map_err(StoreError::Serialization)
}

fn from_json<T: serde::de::DeserializeOwned>(v: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(v).map_err(StoreError::Serialization)
}

fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref dbe) = e {
        if dbe.is_unique_violation() {
            return StoreError::DuplicateMessageId(dbe.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_raw(&self, raw: NewRawData) -> Result<RawData, StoreError> {
        let row: (i64,) = sqlx::query_as("INSERT INTO raw_data (data) VALUES ('{}'::jsonb) RETURNING id")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let id = row.0;
        let full = RawData {
            id,
            deployment: raw.deployment,
            when: raw.when,
            host: raw.host,
            service: raw.service,
            routing_key: raw.routing_key,
            event: raw.event,
            request_id: raw.request_id,
            instance_id: raw.instance_id,
            json: raw.json,
            state: raw.state,
            old_task: raw.old_task,
        };
        sqlx::query("UPDATE raw_data SET data = $2::jsonb WHERE id = $1")
            .bind(id)
            .bind(to_json(&full)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(full)
    }

    async fn get_raw(&self, id: Id) -> Result<Option<RawData>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM raw_data WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn get_or_create_lifecycle(&self, instance_id: &str) -> Result<(Lifecycle, bool), StoreError> {
        let existing: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM lifecycles WHERE instance_id = $1")
                .bind(instance_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        if let Some((v,)) = existing {
            return Ok((from_json(v)?, false));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO lifecycles (instance_id, data) VALUES ($1, '{}'::jsonb)
             ON CONFLICT (instance_id) DO UPDATE SET instance_id = EXCLUDED.instance_id
             RETURNING id",
        )
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let lifecycle = Lifecycle {
            id: row.0,
            instance_id: instance_id.to_string(),
            last_raw_id: 0,
            last_state: "active".to_string(),
            last_task_state: String::new(),
        };
        self.save_lifecycle(&lifecycle).await?;
        Ok((lifecycle, true))
    }

    async fn save_lifecycle(&self, lifecycle: &Lifecycle) -> Result<(), StoreError> {
        sqlx::query("UPDATE lifecycles SET data = $2::jsonb WHERE id = $1")
            .bind(lifecycle.id)
            .bind(to_json(lifecycle)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_or_create_timing(&self, lifecycle_id: Id, name: &str) -> Result<(Timing, bool), StoreError> {
        let existing: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM timings WHERE lifecycle_id = $1 AND name = $2 ORDER BY id LIMIT 1")
                .bind(lifecycle_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        if let Some((v,)) = existing {
            return Ok((from_json(v)?, false));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO timings (lifecycle_id, name, data) VALUES ($1, $2, '{}'::jsonb)
             ON CONFLICT (lifecycle_id, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING id",
        )
        .bind(lifecycle_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let timing = Timing {
            id: row.0,
            lifecycle_id,
            name: name.to_string(),
            start_raw_id: None,
            start_when: None,
            end_raw_id: None,
            end_when: None,
            diff: None,
        };
        self.save_timing(&timing).await?;
        Ok((timing, true))
    }

    async fn save_timing(&self, timing: &Timing) -> Result<(), StoreError> {
        sqlx::query("UPDATE timings SET data = $2::jsonb WHERE id = $1")
            .bind(timing.id)
            .bind(to_json(timing)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_request_tracker(
        &self,
        request_id: &str,
        lifecycle_id: Id,
        start: rust_decimal::Decimal,
    ) -> Result<RequestTracker, StoreError> {
        let row: (i64,) = sqlx::query_as("INSERT INTO request_trackers (request_id, data) VALUES ($1, '{}'::jsonb) RETURNING id")
            .bind(request_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        let tracker = RequestTracker {
            id: row.0,
            request_id: request_id.to_string(),
            lifecycle_id,
            start,
            last_timing_id: None,
            duration: rust_decimal::Decimal::ZERO,
        };
        self.save_request_tracker(&tracker).await?;
        Ok(tracker)
    }

    async fn find_request_trackers(&self, request_id: &str) -> Result<Vec<RequestTracker>, StoreError> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM request_trackers WHERE request_id = $1")
                .bind(request_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn save_request_tracker(&self, tracker: &RequestTracker) -> Result<(), StoreError> {
        sqlx::query("UPDATE request_trackers SET data = $2::jsonb WHERE id = $1")
            .bind(tracker.id)
            .bind(to_json(tracker)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_or_create_instance_usage(
        &self,
        instance_id: &str,
        request_id: &str,
    ) -> Result<(InstanceUsage, bool), StoreError> {
        let existing: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM instance_usage WHERE instance_id = $1 AND request_id = $2")
                .bind(instance_id)
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        if let Some((v,)) = existing {
            return Ok((from_json(v)?, false));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO instance_usage (instance_id, request_id, data) VALUES ($1, $2, '{}'::jsonb)
             ON CONFLICT (instance_id, request_id) DO UPDATE SET instance_id = EXCLUDED.instance_id
             RETURNING id",
        )
        .bind(instance_id)
        .bind(request_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let usage = InstanceUsage {
            id: row.0,
            instance_id: instance_id.to_string(),
            request_id: request_id.to_string(),
            launched_at: None,
            instance_type_id: None,
            tenant: String::new(),
            image: Default::default(),
        };
        self.save_instance_usage(&usage).await?;
        Ok((usage, true))
    }

    async fn save_instance_usage(&self, usage: &InstanceUsage) -> Result<(), StoreError> {
        sqlx::query("UPDATE instance_usage SET data = $2::jsonb, launched_at = $3 WHERE id = $1")
            .bind(usage.id)
            .bind(to_json(usage)?)
            .bind(usage.launched_at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_instance_usage(&self, id: Id) -> Result<Option<InstanceUsage>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM instance_usage WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn find_instance_usage_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceUsage>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM instance_usage WHERE instance_id = $1 AND launched_at BETWEEN $2 AND $3",
        )
        .bind(instance_id)
        .bind(range.0)
        .bind(range.1)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn get_or_create_instance_delete(
        &self,
        instance_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<(InstanceDelete, bool), StoreError> {
        let existing: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM instance_delete WHERE instance_id = $1 AND deleted_at = $2")
                .bind(instance_id)
                .bind(deleted_at)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        if let Some((v,)) = existing {
            return Ok((from_json(v)?, false));
        }
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO instance_delete (instance_id, deleted_at, data) VALUES ($1, $2, '{}'::jsonb)
             ON CONFLICT (instance_id, deleted_at) DO UPDATE SET instance_id = EXCLUDED.instance_id
             RETURNING id",
        )
        .bind(instance_id)
        .bind(deleted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let delete = InstanceDelete { id: row.0, instance_id: instance_id.to_string(), launched_at: None, deleted_at };
        self.save_instance_delete(&delete).await?;
        Ok((delete, true))
    }

    async fn save_instance_delete(&self, delete: &InstanceDelete) -> Result<(), StoreError> {
        sqlx::query("UPDATE instance_delete SET data = $2::jsonb WHERE id = $1")
            .bind(delete.id)
            .bind(to_json(delete)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn get_instance_delete(&self, id: Id) -> Result<Option<InstanceDelete>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM instance_delete WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn find_instance_delete_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceDelete>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM instance_delete WHERE instance_id = $1 AND deleted_at BETWEEN $2 AND $3",
        )
        .bind(instance_id)
        .bind(range.0)
        .bind(range.1)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn find_instance_delete_before(
        &self,
        instance_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<InstanceDelete>, StoreError> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT data FROM instance_delete WHERE instance_id = $1 AND deleted_at <= $2")
                .bind(instance_id)
                .bind(before)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn create_instance_exists(&self, exists: NewInstanceExists) -> Result<InstanceExists, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO instance_exists (message_id, instance_id, status, audit_period_ending, data)
             VALUES ($1, $2, 'pending', $3, '{}'::jsonb) RETURNING id",
        )
        .bind(&exists.message_id)
        .bind(&exists.instance_id)
        .bind(exists.audit_period_ending)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        let full = InstanceExists {
            id: row.0,
            message_id: exists.message_id,
            instance_id: exists.instance_id,
            launched_at: exists.launched_at,
            deleted_at: exists.deleted_at,
            audit_period_beginning: exists.audit_period_beginning,
            audit_period_ending: exists.audit_period_ending,
            instance_type_id: exists.instance_type_id,
            tenant: exists.tenant,
            image: exists.image,
            usage_id: exists.usage_id,
            delete_id: exists.delete_id,
            raw_id: exists.raw_id,
            status: ExistsStatus::Pending,
            fail_reason: None,
        };
        self.save_instance_exists(&full).await?;
        Ok(full)
    }

    async fn get_instance_exists(&self, id: Id) -> Result<Option<InstanceExists>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as("SELECT data FROM instance_exists WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn find_pending_exists(
        &self,
        ending_max: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InstanceExists>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM instance_exists WHERE status = 'pending' AND audit_period_ending <= $1
             ORDER BY id LIMIT $2",
        )
        .bind(ending_max)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }

    async fn try_begin_verification(&self, id: Id) -> Result<Option<InstanceExists>, StoreError> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "UPDATE instance_exists SET status = 'verifying',
                data = jsonb_set(data, '{status}', '\"verifying\"')
             WHERE id = $1 AND status = 'pending'
             RETURNING data",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|(v,)| from_json(v)).transpose()
    }

    async fn save_instance_exists(&self, exists: &InstanceExists) -> Result<(), StoreError> {
        sqlx::query("UPDATE instance_exists SET data = $2::jsonb, status = $3 WHERE id = $1")
            .bind(exists.id)
            .bind(to_json(exists)?)
            .bind(exists.status.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn find_reconcile_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceReconcile>, StoreError> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            "SELECT data FROM instance_reconcile WHERE instance_id = $1 AND launched_at BETWEEN $2 AND $3",
        )
        .bind(instance_id)
        .bind(range.0)
        .bind(range.1)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(|(v,)| from_json(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    async fn test_store() -> Option<PostgresStore> {
        let url = env::var("TEST_POSTGRES_URL").ok()?;
        Some(PostgresStore::connect(&url).await.expect("connect"))
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn create_and_fetch_raw_round_trips() {
        let Some(store) = test_store().await else { return };
        let raw = store
            .create_raw(NewRawData {
                deployment: "dep1".into(),
                when: rust_decimal::Decimal::new(1_359_117_503_000_000, 6),
                host: "compute1".into(),
                service: "compute".into(),
                routing_key: "compute.instance.create.start".into(),
                event: "compute.instance.create.start".into(),
                request_id: Some("req-1".into()),
                instance_id: Some("inst-1".into()),
                json: "{}".into(),
                state: None,
                old_task: None,
            })
            .await
            .unwrap();
        let fetched = store.get_raw(raw.id).await.unwrap().unwrap();
        assert_eq!(fetched.instance_id.as_deref(), Some("inst-1"));
    }

    #[tokio::test]
    #[ignore = "requires TEST_POSTGRES_URL"]
    async fn try_begin_verification_is_atomic_in_postgres() {
        let Some(store) = test_store().await else { return };
        let exists = store
            .create_instance_exists(NewInstanceExists {
                message_id: uuid::Uuid::new_v4().to_string(),
                instance_id: "inst-pg".into(),
                launched_at: Utc::now(),
                deleted_at: None,
                audit_period_beginning: Utc::now(),
                audit_period_ending: Utc::now(),
                instance_type_id: "1".into(),
                tenant: "T1".into(),
                image: Default::default(),
                usage_id: None,
                delete_id: None,
                raw_id: 1,
            })
            .await
            .unwrap();
        let first = store.try_begin_verification(exists.id).await.unwrap();
        let second = store.try_begin_verification(exists.id).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }
}
