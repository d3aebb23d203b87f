//! Component E: per-instance Lifecycle and per-event-name Timing rows.

use iaudit_domain::RawData;
use iaudit_store::Store;
use tracing::debug;

use crate::error::AggregateError;
use crate::kpi;

enum EventShape {
    Start(String),
    End(String),
    Update,
    Other,
}

/// Bare `compute.instance.update` is the KPI-start trigger; a `.start`/`.end`
/// suffix names a Timing; anything else only touches the Lifecycle.
fn classify(event: &str) -> EventShape {
    if event == "compute.instance.update" {
        EventShape::Update
    } else if let Some(name) = event.strip_suffix(".start") {
        EventShape::Start(name.to_string())
    } else if let Some(name) = event.strip_suffix(".end") {
        EventShape::End(name.to_string())
    } else {
        EventShape::Other
    }
}

/// Entry point. Skips when `raw.instance_id` is absent — an event with no
/// instance has nothing to aggregate a lifecycle onto.
pub async fn aggregate_lifecycle(store: &dyn Store, raw: &RawData) -> Result<(), AggregateError> {
    let Some(instance_id) = raw.instance_id.as_deref() else { return Ok(()) };

    let (mut lifecycle, created) = store.get_or_create_lifecycle(instance_id).await?;
    lifecycle.last_raw_id = raw.id;
    lifecycle.last_state = raw.state.clone().unwrap_or_else(|| "active".to_string());
    lifecycle.last_task_state = raw.old_task.clone().unwrap_or_default();
    store.save_lifecycle(&lifecycle).await?;
    if created {
        debug!(instance_id, lifecycle_id = lifecycle.id, "created lifecycle");
    }

    match classify(&raw.event) {
        EventShape::Start(name) => {
            // Tie-break for multiple matching Timings: earliest id, never a
            // duplicate — `get_or_create_timing` already enforces this at the
            // store boundary.
            let (mut timing, _) = store.get_or_create_timing(lifecycle.id, &name).await?;
            timing.start_raw_id = Some(raw.id);
            timing.start_when = Some(raw.when);
            store.save_timing(&timing).await?;
        }
        EventShape::End(name) => {
            let (mut timing, _) = store.get_or_create_timing(lifecycle.id, &name).await?;
            timing.close(raw.id, raw.when);
            store.save_timing(&timing).await?;
            kpi::update_kpi(store, &timing, raw).await?;
        }
        EventShape::Update => {
            kpi::start_kpi_tracking(store, &lifecycle, raw).await?;
        }
        EventShape::Other => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaudit_store::InMemoryStore;
    use rust_decimal::Decimal;

    fn raw(id: i64, event: &str, when: Decimal, state: Option<&str>) -> RawData {
        RawData {
            id,
            deployment: "dep1".into(),
            when,
            host: "compute.node-1".into(),
            service: "compute".into(),
            routing_key: event.into(),
            event: event.into(),
            request_id: Some("req-1".into()),
            instance_id: Some("inst-1".into()),
            json: "{}".into(),
            state: state.map(str::to_string),
            old_task: None,
        }
    }

    #[tokio::test]
    async fn start_then_end_populates_diff() {
        let store = InMemoryStore::new();
        aggregate_lifecycle(&store, &raw(1, "compute.instance.create.start", Decimal::new(100, 0), Some("building")))
            .await
            .unwrap();
        aggregate_lifecycle(&store, &raw(2, "compute.instance.create.end", Decimal::new(160, 0), Some("active")))
            .await
            .unwrap();

        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        assert_eq!(lifecycle.last_state, "active");
        assert_eq!(lifecycle.last_raw_id, 2);

        let (timing, created) = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap();
        assert!(!created);
        assert_eq!(timing.diff, Some(Decimal::new(60, 0)));
    }

    #[tokio::test]
    async fn out_of_order_end_leaves_start_side_absent() {
        let store = InMemoryStore::new();
        aggregate_lifecycle(&store, &raw(1, "compute.instance.create.end", Decimal::new(160, 0), Some("active")))
            .await
            .unwrap();

        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        let (timing, _) = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap();
        assert!(timing.start_when.is_none());
        assert!(timing.diff.is_none());
        assert_eq!(timing.end_when, Some(Decimal::new(160, 0)));
    }

    #[tokio::test]
    async fn missing_state_defaults_to_active_and_task_state_to_empty() {
        let store = InMemoryStore::new();
        aggregate_lifecycle(&store, &raw(1, "compute.instance.reboot", Decimal::new(1, 0), None)).await.unwrap();
        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        assert_eq!(lifecycle.last_state, "active");
        assert_eq!(lifecycle.last_task_state, "");
    }

    #[tokio::test]
    async fn a_single_instance_never_yields_more_than_one_lifecycle() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            aggregate_lifecycle(&store, &raw(i, "compute.instance.update", Decimal::new(i, 0), None)).await.unwrap();
        }
        let (a, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        let (b, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        assert_eq!(a.id, b.id);
    }
}
