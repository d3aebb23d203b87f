//! Component D: the raw recorder. The single entry point that ties parsing,
//! raw persistence, and lifecycle/usage aggregation together.

use iaudit_parser::{Envelope, ParserRegistry};
use iaudit_store::{NewRawData, Store};

use crate::error::AggregateError;
use crate::{lifecycle, usage};

/// Parses `raw_json`, records it, and updates the derived Lifecycle/Timing/
/// Usage/Delete/Exists rows. An unrecognized routing key is dropped by the
/// registry (§4.C) before anything is written. Any failure here propagates —
/// per §7's propagation policy the aggregator never swallows store errors.
pub async fn process_raw(
    store: &dyn Store,
    registry: &ParserRegistry,
    deployment: &str,
    raw_json: &str,
) -> Result<(), AggregateError> {
    let Some(fields) = registry.dispatch(deployment, raw_json)? else { return Ok(()) };
    let envelope = Envelope::parse(raw_json)?;

    let raw = store
        .create_raw(NewRawData {
            deployment: fields.deployment,
            when: fields.when,
            host: fields.host,
            service: fields.service,
            routing_key: fields.routing_key,
            event: fields.event,
            request_id: fields.request_id,
            instance_id: fields.instance_id,
            json: fields.json,
            state: fields.state,
            old_task: fields.old_task,
        })
        .await?;

    lifecycle::aggregate_lifecycle(store, &raw).await?;
    usage::aggregate_usage(store, &raw, &envelope).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iaudit_store::InMemoryStore;

    #[tokio::test]
    async fn new_launch_end_to_end_populates_usage_lifecycle_and_timing() {
        let store = InMemoryStore::new();
        let registry = ParserRegistry::with_defaults();
        let json = r#"["compute.instance.create.start", {
            "message_id": "m-1",
            "event_type": "compute.instance.create.start",
            "timestamp": "2013-01-25 13:38:23.000000",
            "publisher_id": "compute.node-1",
            "_context_request_id": "req-1",
            "payload": {
                "instance_id": "inst-1",
                "state": "building",
                "tenant_id": "T1",
                "instance_type_id": "1",
                "launched_at": "2013-01-25 13:38:23.000000"
            }
        }]"#;

        process_raw(&store, &registry, "dep1", json).await.unwrap();

        let (lifecycle, _) = store.get_or_create_lifecycle("inst-1").await.unwrap();
        assert_eq!(lifecycle.last_state, "building");

        let (timing, created) = store.get_or_create_timing(lifecycle.id, "compute.instance.create").await.unwrap();
        assert!(!created);
        assert!(timing.start_when.is_some());

        let (usage, usage_created) = store.get_or_create_instance_usage("inst-1", "req-1").await.unwrap();
        assert!(!usage_created);
        assert_eq!(usage.tenant, "T1");
        assert!(usage.launched_at.is_some());
    }

    #[tokio::test]
    async fn unknown_routing_key_writes_nothing() {
        let store = InMemoryStore::new();
        let registry = ParserRegistry::with_defaults();
        process_raw(&store, &registry, "dep1", r#"["monitor.info", {"event_type": "monitor.info"}]"#)
            .await
            .unwrap();
        assert!(store.get_raw(1).await.unwrap().is_none());
    }
}
