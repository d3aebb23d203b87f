use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iaudit_domain::{
    ExistsStatus, Id, InstanceDelete, InstanceExists, InstanceReconcile, InstanceUsage, Lifecycle,
    RawData, RequestTracker, Timing,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{NewInstanceExists, NewRawData, Store};

#[derive(Default)]
struct Inner {
    next_id: i64,
    raws: HashMap<Id, RawData>,
    lifecycles: HashMap<Id, Lifecycle>,
    lifecycle_by_instance: HashMap<String, Id>,
    timings: HashMap<Id, Timing>,
    timing_by_key: HashMap<(Id, String), Id>,
    trackers: HashMap<Id, RequestTracker>,
    trackers_by_request: HashMap<String, Vec<Id>>,
    usages: HashMap<Id, InstanceUsage>,
    usage_by_key: HashMap<(String, String), Id>,
    deletes: HashMap<Id, InstanceDelete>,
    delete_by_key: HashMap<(String, DateTime<Utc>), Id>,
    exists: HashMap<Id, InstanceExists>,
    exists_by_message_id: HashMap<String, Id>,
    reconciles: Vec<InstanceReconcile>,
}

impl Inner {
    fn alloc_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process [`Store`] for tests and single-node development. Mirrors the
/// aggregator's uniqueness constraints (§5) with plain `HashMap` keys instead
/// of database unique indexes.
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { inner: Arc::new(RwLock::new(Inner::default())) }
    }

    /// Seed the read-only reconcile table. Production deployments populate
    /// this out-of-band; tests call this directly.
    pub async fn seed_reconcile(&self, rows: Vec<InstanceReconcile>) {
        self.inner.write().await.reconciles = rows;
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_raw(&self, raw: NewRawData) -> Result<RawData, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner.alloc_id();
        let row = RawData {
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
        inner.raws.insert(id, row.clone());
        Ok(row)
    }

    async fn get_raw(&self, id: Id) -> Result<Option<RawData>, StoreError> {
        Ok(self.inner.read().await.raws.get(&id).cloned())
    }

    async fn get_or_create_lifecycle(&self, instance_id: &str) -> Result<(Lifecycle, bool), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(&id) = inner.lifecycle_by_instance.get(instance_id) {
            return Ok((inner.lifecycles[&id].clone(), false));
        }
        let id = inner.alloc_id();
        let row = Lifecycle {
            id,
            instance_id: instance_id.to_string(),
            last_raw_id: 0,
            last_state: "active".to_string(),
            last_task_state: String::new(),
        };
        inner.lifecycle_by_instance.insert(instance_id.to_string(), id);
        inner.lifecycles.insert(id, row.clone());
        Ok((row, true))
    }

    async fn save_lifecycle(&self, lifecycle: &Lifecycle) -> Result<(), StoreError> {
        self.inner.write().await.lifecycles.insert(lifecycle.id, lifecycle.clone());
        Ok(())
    }

    async fn get_or_create_timing(&self, lifecycle_id: Id, name: &str) -> Result<(Timing, bool), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (lifecycle_id, name.to_string());
        if let Some(&id) = inner.timing_by_key.get(&key) {
            return Ok((inner.timings[&id].clone(), false));
        }
        let id = inner.alloc_id();
        let row = Timing {
            id,
            lifecycle_id,
            name: name.to_string(),
            start_raw_id: None,
            start_when: None,
            end_raw_id: None,
            end_when: None,
            diff: None,
        };
        inner.timing_by_key.insert(key, id);
        inner.timings.insert(id, row.clone());
        Ok((row, true))
    }

    async fn save_timing(&self, timing: &Timing) -> Result<(), StoreError> {
        self.inner.write().await.timings.insert(timing.id, timing.clone());
        Ok(())
    }

    async fn create_request_tracker(
        &self,
        request_id: &str,
        lifecycle_id: Id,
        start: rust_decimal::Decimal,
    ) -> Result<RequestTracker, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner.alloc_id();
        let row = RequestTracker {
            id,
            request_id: request_id.to_string(),
            lifecycle_id,
            start,
            last_timing_id: None,
            duration: rust_decimal::Decimal::ZERO,
        };
        inner.trackers.insert(id, row.clone());
        inner.trackers_by_request.entry(request_id.to_string()).or_default().push(id);
        Ok(row)
    }

    async fn find_request_trackers(&self, request_id: &str) -> Result<Vec<RequestTracker>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .trackers_by_request
            .get(request_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.trackers.get(id).cloned())
            .collect())
    }

    async fn save_request_tracker(&self, tracker: &RequestTracker) -> Result<(), StoreError> {
        self.inner.write().await.trackers.insert(tracker.id, tracker.clone());
        Ok(())
    }

    async fn get_or_create_instance_usage(
        &self,
        instance_id: &str,
        request_id: &str,
    ) -> Result<(InstanceUsage, bool), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (instance_id.to_string(), request_id.to_string());
        if let Some(&id) = inner.usage_by_key.get(&key) {
            return Ok((inner.usages[&id].clone(), false));
        }
        let id = inner.alloc_id();
        let row = InstanceUsage {
            id,
            instance_id: instance_id.to_string(),
            request_id: request_id.to_string(),
            launched_at: None,
            instance_type_id: None,
            tenant: String::new(),
            image: Default::default(),
        };
        inner.usage_by_key.insert(key, id);
        inner.usages.insert(id, row.clone());
        Ok((row, true))
    }

    async fn save_instance_usage(&self, usage: &InstanceUsage) -> Result<(), StoreError> {
        self.inner.write().await.usages.insert(usage.id, usage.clone());
        Ok(())
    }

    async fn get_instance_usage(&self, id: Id) -> Result<Option<InstanceUsage>, StoreError> {
        Ok(self.inner.read().await.usages.get(&id).cloned())
    }

    async fn find_instance_usage_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceUsage>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .usages
            .values()
            .filter(|u| {
                u.instance_id == instance_id
                    && u.launched_at.is_some_and(|la| la >= range.0 && la <= range.1)
            })
            .cloned()
            .collect())
    }

    async fn get_or_create_instance_delete(
        &self,
        instance_id: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<(InstanceDelete, bool), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (instance_id.to_string(), deleted_at);
        if let Some(&id) = inner.delete_by_key.get(&key) {
            return Ok((inner.deletes[&id].clone(), false));
        }
        let id = inner.alloc_id();
        let row = InstanceDelete { id, instance_id: instance_id.to_string(), launched_at: None, deleted_at };
        inner.delete_by_key.insert(key, id);
        inner.deletes.insert(id, row.clone());
        Ok((row, true))
    }

    async fn save_instance_delete(&self, delete: &InstanceDelete) -> Result<(), StoreError> {
        self.inner.write().await.deletes.insert(delete.id, delete.clone());
        Ok(())
    }

    async fn get_instance_delete(&self, id: Id) -> Result<Option<InstanceDelete>, StoreError> {
        Ok(self.inner.read().await.deletes.get(&id).cloned())
    }

    async fn find_instance_delete_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceDelete>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .deletes
            .values()
            .filter(|d| d.instance_id == instance_id && d.deleted_at >= range.0 && d.deleted_at <= range.1)
            .cloned()
            .collect())
    }

    async fn find_instance_delete_before(
        &self,
        instance_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Vec<InstanceDelete>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .deletes
            .values()
            .filter(|d| d.instance_id == instance_id && d.deleted_at <= before)
            .cloned()
            .collect())
    }

    async fn create_instance_exists(&self, exists: NewInstanceExists) -> Result<InstanceExists, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.exists_by_message_id.contains_key(&exists.message_id) {
            return Err(StoreError::DuplicateMessageId(exists.message_id));
        }
        let id = inner.alloc_id();
        let row = InstanceExists {
            id,
            message_id: exists.message_id.clone(),
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
        inner.exists_by_message_id.insert(exists.message_id, id);
        inner.exists.insert(id, row.clone());
        Ok(row)
    }

    async fn get_instance_exists(&self, id: Id) -> Result<Option<InstanceExists>, StoreError> {
        Ok(self.inner.read().await.exists.get(&id).cloned())
    }

    async fn find_pending_exists(
        &self,
        ending_max: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InstanceExists>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<InstanceExists> = inner
            .exists
            .values()
            .filter(|e| e.status == ExistsStatus::Pending && e.audit_period_ending <= ending_max)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.id);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn try_begin_verification(&self, id: Id) -> Result<Option<InstanceExists>, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.exists.get_mut(&id) {
            Some(row) if row.status == ExistsStatus::Pending => {
                row.status = ExistsStatus::Verifying;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn save_instance_exists(&self, exists: &InstanceExists) -> Result<(), StoreError> {
        self.inner.write().await.exists.insert(exists.id, exists.clone());
        Ok(())
    }

    async fn find_reconcile_in_range(
        &self,
        instance_id: &str,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<Vec<InstanceReconcile>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .reconciles
            .iter()
            .filter(|r| {
                r.instance_id == instance_id && r.launched_at.is_some_and(|la| la >= range.0 && la <= range.1)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn get_or_create_lifecycle_is_idempotent() {
        let store = InMemoryStore::new();
        let (a, created_a) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        let (b, created_b) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn get_or_create_timing_keyed_by_lifecycle_and_name() {
        let store = InMemoryStore::new();
        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        let (t1, created1) = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap();
        let (t2, created2) = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap();
        let (t3, created3) = store.get_or_create_timing(lifecycle.id, "compute.instance.delete").await.unwrap();
        assert!(created1 && !created2 && created3);
        assert_eq!(t1.id, t2.id);
        assert_ne!(t1.id, t3.id);
    }

    #[tokio::test]
    async fn try_begin_verification_only_succeeds_once() {
        let store = InMemoryStore::new();
        let row = store
            .create_instance_exists(NewInstanceExists {
                message_id: "m-1".into(),
                instance_id: "inst-1".into(),
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

        let first = store.try_begin_verification(row.id).await.unwrap();
        let second = store.try_begin_verification(row.id).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let store = InMemoryStore::new();
        let new_exists = || NewInstanceExists {
            message_id: "dup".into(),
            instance_id: "inst-1".into(),
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
        };
        store.create_instance_exists(new_exists()).await.unwrap();
        let err = store.create_instance_exists(new_exists()).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMessageId(_)));
    }

    #[tokio::test]
    async fn find_instance_usage_in_range_matches_inclusive_bounds() {
        let store = InMemoryStore::new();
        let (mut usage, _) = store.get_or_create_instance_usage("inst-1", "req-1").await.unwrap();
        let launched = Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap();
        usage.launched_at = Some(launched);
        store.save_instance_usage(&usage).await.unwrap();

        let found = store
            .find_instance_usage_in_range("inst-1", (launched, launched + chrono::Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
