use iaudit_domain::{parse_timestamp, to_decimal};
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ParseError;
use crate::fields::RawFields;

/// Extracts the canonical field set from one kind of notification. A given
/// routing key is bound to exactly one handler in the [`registry`](crate::registry).
pub trait NotificationHandler: Send + Sync + 'static {
    fn parse(&self, deployment: &str, env: &Envelope, raw_json: &str) -> Result<RawFields, ParseError>;
}

/// Handles the `compute.instance.*` family plus `compute.instance.exists`
/// and `compute.instance.update`. These share one envelope shape: top-level
/// `message_id`/`event_type`/`timestamp`/`publisher_id`/`_context_request_id`/
/// `_context_timestamp`, and instance-specific fields nested under `payload`.
pub struct ComputeInstanceHandler;

impl NotificationHandler for ComputeInstanceHandler {
    fn parse(&self, deployment: &str, env: &Envelope, raw_json: &str) -> Result<RawFields, ParseError> {
        let event = env
            .payload_str("event_type")
            .ok_or_else(|| ParseError::MissingField("event_type".into()))?
            .to_string();

        let when_str = env
            .payload_str("timestamp")
            .or_else(|| env.payload_str("_context_timestamp"))
            .ok_or_else(|| ParseError::MissingField("timestamp".into()))?;
        let when_dt = parse_timestamp(when_str)
            .map_err(|e| ParseError::InvalidTimestamp { field: "timestamp".into(), source: e })?;
        let when = to_decimal(when_dt);

        let publisher_id = env.payload_str("publisher_id").unwrap_or_default();
        let service = publisher_id.split('.').next().unwrap_or_default().to_string();
        let host = publisher_id.to_string();
        let request_id = env.payload_str("_context_request_id").map(str::to_string);

        let inner = env.payload.get("payload");
        let instance_id = inner_str(inner, "instance_id");
        let state = inner_str(inner, "state");
        let old_task = inner_str(inner, "old_task_state");

        Ok(RawFields {
            deployment: deployment.to_string(),
            when,
            host,
            service,
            routing_key: env.routing_key.clone(),
            json: raw_json.to_string(),
            event,
            instance_id,
            request_id,
            state,
            old_task,
        })
    }
}

fn inner_str(inner: Option<&Value>, key: &str) -> Option<String> {
    inner.and_then(|p| p.get(key)).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: &str) -> Envelope {
        Envelope::parse(json).unwrap()
    }

    #[test]
    fn extracts_canonical_fields_from_start_event() {
        let json = r#"["compute.instance.create.start", {
            "message_id": "m-1",
            "event_type": "compute.instance.create.start",
            "timestamp": "2013-01-25 13:38:23.000000",
            "publisher_id": "compute.node-1",
            "_context_request_id": "req-1",
            "payload": {"instance_id": "inst-1", "state": "building", "old_task_state": "spawning"}
        }]"#;
        let fields = ComputeInstanceHandler.parse("dep1", &envelope(json), json).unwrap();
        assert_eq!(fields.instance_id.as_deref(), Some("inst-1"));
        assert_eq!(fields.request_id.as_deref(), Some("req-1"));
        assert_eq!(fields.service, "compute");
        assert_eq!(fields.host, "compute.node-1");
        assert_eq!(fields.event, "compute.instance.create.start");
    }

    #[test]
    fn falls_back_to_context_timestamp_and_accepts_t_separated_form() {
        let json = r#"["compute.instance.update", {
            "event_type": "compute.instance.update",
            "_context_timestamp": "2013-01-25T13:38:23.500000",
            "publisher_id": "api.host-1",
            "payload": {"instance_id": "inst-1"}
        }]"#;
        let fields = ComputeInstanceHandler.parse("dep1", &envelope(json), json).unwrap();
        assert_eq!(fields.service, "api");
    }

    #[test]
    fn missing_event_type_is_a_parse_error() {
        let json = r#"["compute.instance.create.start", {"payload": {}}]"#;
        assert!(ComputeInstanceHandler.parse("dep1", &envelope(json), json).is_err());
    }
}
