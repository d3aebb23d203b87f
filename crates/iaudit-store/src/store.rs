use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iaudit_domain::{
    Id, InstanceDelete, InstanceExists, InstanceReconcile, InstanceUsage, Lifecycle, RawData,
    RequestTracker, Timing,
};

use crate::error::StoreError;

/// Fields needed to create a RawData row. `id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewRawData {
    pub deployment: String,
    pub when: rust_decimal::Decimal,
    pub host: String,
    pub service: String,
    pub routing_key: String,
    pub event: String,
    pub request_id: Option<String>,
    pub instance_id: Option<String>,
    pub json: String,
    pub state: Option<String>,
    pub old_task: Option<String>,
}

/// Fields needed to create an InstanceExists row.
#[derive(Debug, Clone)]
pub struct NewInstanceExists {
    pub message_id: String,
    pub instance_id: String,
    pub launched_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub audit_period_beginning: DateTime<Utc>,
    pub audit_period_ending: DateTime<Utc>,
    pub instance_type_id: String,
    pub tenant: String,
    pub image: iaudit_domain::OsImage,
    pub usage_id: Option<Id>,
    pub delete_id: Option<Id>,
    pub raw_id: Id,
}

/// Component B. The sole mutation boundary over the derived entities in §3;
/// no other component writes to the underlying database directly. Range
/// queries on decimal/timestamp fields are inclusive-start, inclusive-end.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn create_raw(&self, raw: NewRawData) -> Result<RawData, StoreError>;
    async fn get_raw(&self, id: Id) -> Result<Option<RawData>, StoreError>;

    /// Find-or-create by `instance_id`. Returns `(row, created)`.
    async fn get_or_create_lifecycle(&self, instance_id: &str) -> Result<(Lifecycle, bool), StoreError>;
    async fn save_lifecycle(&self, lifecycle: &Lifecycle) -> Result<(), StoreError>;

    /// Find-or-create by `(lifecycle_id, name)`. Ties broken by earliest id
    /// per §4.E; never creates a duplicate for an existing key.
    async fn get_or_create_timing(&self, lifecycle_id: Id, name: &str) -> Result<(Timing, bool), StoreError>;
    async fn save_timing(&self, timing: &Timing) -> Result<(), StoreError>;

    async fn create_request_tracker(
        &self,
        request_id: &str,
        lifecycle_id: Id,
        start: rust_decimal::Decimal,
    ) -> Result<RequestTracker, StoreError>;
    async fn find_request_trackers(&self, request_id: &str) -> Result<Vec<RequestTracker>, StoreError>;
    async fn save_request_tracker(&self, tracker: &RequestTracker) -> Result<(), StoreError>;

    /// Find-or-create by `(instance_id, request_id)`.
    async fn get_or_create_instance_usage(
        &self,
        instance_id: &str,
        request_id: &str,
    ) -> Result<(InstanceUsage, bool), StoreError>;
    async fn save_instance_usage(&self, usage: &InstanceUsage) -> Result<(), StoreError>;
    async fn get_instance_usage(&self, id: Id) -> Result<Option<InstanceUsage>, StoreError>;
    /// Usages for `instance_id` whose `launched_at` falls in `[range.0, range.1]`.
    async fn find_instance_usage_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceUsage>, StoreError>;

    /// Find-or-create by `(instance_id, deleted_at)`.
    async fn get_or_create_instance_delete(
        &self,
        instance_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<(InstanceDelete, bool), StoreError>;
    async fn save_instance_delete(&self, delete: &InstanceDelete) -> Result<(), StoreError>;
    async fn get_instance_delete(&self, id: Id) -> Result<Option<InstanceDelete>, StoreError>;
    async fn find_instance_delete_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceDelete>, StoreError>;
    /// Deletes for `instance_id` with `deleted_at <= before`, used by
    /// `_verify_for_delete`'s "found a delete we didn't know about" check.
    async fn find_instance_delete_before(
        &self,
        instance_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<InstanceDelete>, StoreError>;

    /// Fails with [`StoreError::DuplicateMessageId`] if `message_id` already exists.
    async fn create_instance_exists(&self, exists: NewInstanceExists) -> Result<InstanceExists, StoreError>;
    async fn get_instance_exists(&self, id: Id) -> Result<Option<InstanceExists>, StoreError>;
    /// Rows with `status = PENDING` and `audit_period_ending <= ending_max`, oldest first.
    async fn find_pending_exists(
        &self,
        ending_max: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InstanceExists>, StoreError>;
    /// Atomically flips `PENDING -> VERIFYING` and returns the row, or `None`
    /// if another worker already claimed it. This is the store-boundary
    /// atomicity the concurrency model (§5) relies on.
    async fn try_begin_verification(&self, id: Id) -> Result<Option<InstanceExists>, StoreError>;
    async fn save_instance_exists(&self, exists: &InstanceExists) -> Result<(), StoreError>;

    /// Read-only: reconcile rows for `instance_id` whose `launched_at` falls
    /// in `[range.0, range.1]`.
    async fn find_reconcile_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceReconcile>, StoreError>;
}
