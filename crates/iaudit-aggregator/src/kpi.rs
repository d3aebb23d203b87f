//! Component G: per-request latency tracking, rooted at the API-host
//! `update` event and closed out whenever a timing record closes.

use iaudit_domain::{Lifecycle, RawData, Timing};
use iaudit_store::Store;
use tracing::debug;

use crate::error::AggregateError;

/// Fires only for `compute.instance.update` events coming from the `api`
/// service (§4.G). Creates one tracker per `request_id`; a missing
/// `request_id` means there's nothing to key the tracker by, so it's skipped.
pub async fn start_kpi_tracking(
    store: &dyn Store,
    lifecycle: &Lifecycle,
    raw: &RawData,
) -> Result<(), AggregateError> {
    if raw.event != "compute.instance.update" || raw.service != "api" {
        return Ok(());
    }
    let Some(request_id) = raw.request_id.as_deref() else { return Ok(()) };
    store.create_request_tracker(request_id, lifecycle.id, raw.when).await?;
    debug!(request_id, lifecycle_id = lifecycle.id, "started kpi tracking");
    Ok(())
}

/// Closes out every tracker for `raw.request_id` against `timing`. A
/// request with no tracker (no prior API-host `update` event) is a no-op,
/// not an error — most events never go through the API host at all.
pub async fn update_kpi(store: &dyn Store, timing: &Timing, raw: &RawData) -> Result<(), AggregateError> {
    let Some(request_id) = raw.request_id.as_deref() else { return Ok(()) };
    let trackers = store.find_request_trackers(request_id).await?;
    for mut tracker in trackers {
        tracker.last_timing_id = Some(timing.id);
        tracker.duration = raw.when - tracker.start;
        store.save_request_tracker(&tracker).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaudit_store::InMemoryStore;
    use rust_decimal::Decimal;

    fn raw(event: &str, service: &str, request_id: Option<&str>, when: Decimal) -> RawData {
        RawData {
            id: 1,
            deployment: "dep1".into(),
            when,
            host: "api.host-1".into(),
            service: service.into(),
            routing_key: event.into(),
            event: event.into(),
            request_id: request_id.map(str::to_string),
            instance_id: Some("inst-1".into()),
            json: "{}".into(),
            state: None,
            old_task: None,
        }
    }

    #[tokio::test]
    async fn start_kpi_tracking_requires_update_event_from_api_service() {
        let store = InMemoryStore::new();
        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();

        start_kpi_tracking(&store, &lifecycle, &raw("compute.instance.update", "compute", Some("req-1"), Decimal::ZERO))
            .await
            .unwrap();
        assert!(store.find_request_trackers("req-1").await.unwrap().is_empty());

        start_kpi_tracking(&store, &lifecycle, &raw("compute.instance.create.start", "api", Some("req-1"), Decimal::ZERO))
            .await
            .unwrap();
        assert!(store.find_request_trackers("req-1").await.unwrap().is_empty());

        start_kpi_tracking(&store, &lifecycle, &raw("compute.instance.update", "api", Some("req-1"), Decimal::ZERO))
            .await
            .unwrap();
        assert_eq!(store.find_request_trackers("req-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_kpi_sets_duration_and_is_noop_without_a_tracker() {
        let store = InMemoryStore::new();
        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        let timing = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap().0;

        // No tracker yet — no-op.
        update_kpi(&store, &timing, &raw("compute.instance.create.end", "compute", Some("req-1"), Decimal::new(100, 0)))
            .await
            .unwrap();

        start_kpi_tracking(&store, &lifecycle, &raw("compute.instance.update", "api", Some("req-1"), Decimal::new(40, 0)))
            .await
            .unwrap();
        update_kpi(&store, &timing, &raw("compute.instance.create.end", "compute", Some("req-1"), Decimal::new(100, 0)))
            .await
            .unwrap();

        let tracker = &store.find_request_trackers("req-1").await.unwrap()[0];
        assert_eq!(tracker.duration, Decimal::new(60, 0));
        assert_eq!(tracker.last_timing_id, Some(timing.id));
    }
}
