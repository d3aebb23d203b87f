//! Rewrites a verified `InstanceExists`'s original notification envelope into
//! the "verified.old" shape republished downstream (§4.I).

use iaudit_domain::InstanceExists;
use iaudit_parser::Envelope;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PublishError;

/// The routing key(s) to publish the rewritten envelope under. One outbound
/// message is sent per key, all sharing the same rewritten body (§4.I "one or
/// more configured routing keys").
pub struct Outbound {
    pub routing_keys: Vec<String>,
    pub body: Vec<u8>,
}

/// `raw_json` is the verbatim `[routing_key, payload]` array that produced
/// `exists`. Rewrites `payload.event_type`, then `payload.original_message_id`,
/// then a fresh `payload.message_id`, in that order (§4.I, §9 "preserved
/// verbatim").
pub fn build_outbound(raw_json: &str, exists: &InstanceExists, configured_routing_keys: &[String]) -> Result<Outbound, PublishError> {
    let envelope = Envelope::parse(raw_json).map_err(|e| PublishError::Envelope(e.to_string()))?;
    let Envelope { routing_key: original_routing_key, mut payload } = envelope;

    let obj = payload
        .as_object_mut()
        .ok_or_else(|| PublishError::Envelope("payload is not a JSON object".into()))?;

    let original_message_id = obj.get("message_id").cloned().unwrap_or(Value::Null);
    obj.insert("event_type".into(), Value::String("compute.instance.exists.verified.old".into()));
    obj.insert("original_message_id".into(), original_message_id);
    obj.insert("message_id".into(), Value::String(Uuid::new_v4().to_string()));

    let routing_keys = if configured_routing_keys.is_empty() {
        vec![original_routing_key.clone()]
    } else {
        configured_routing_keys.to_vec()
    };
    let body = serde_json::to_vec(&Value::Array(vec![Value::String(original_routing_key), payload]))
        .map_err(|e| PublishError::Envelope(e.to_string()))?;

    let _ = exists; // kept for symmetry with the Publisher trait's signature
    Ok(Outbound { routing_keys, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use iaudit_domain::{ExistsStatus, OsImage};

    fn sample_exists() -> InstanceExists {
        InstanceExists {
            id: 1,
            message_id: "m-1".into(),
            instance_id: "inst-1".into(),
            launched_at: Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap(),
            deleted_at: None,
            audit_period_beginning: Utc.with_ymd_and_hms(2013, 1, 25, 13, 38, 23).unwrap(),
            audit_period_ending: Utc.with_ymd_and_hms(2013, 1, 26, 13, 38, 23).unwrap(),
            instance_type_id: "1".into(),
            tenant: "T1".into(),
            image: OsImage::default(),
            usage_id: None,
            delete_id: None,
            raw_id: 1,
            status: ExistsStatus::Verified,
            fail_reason: None,
        }
    }

    #[test]
    fn rewrites_event_type_and_message_id_and_defaults_to_original_routing_key() {
        let raw = r#"["compute.instance.exists", {"message_id": "orig-1", "tenant_id": "T1"}]"#;
        let outbound = build_outbound(raw, &sample_exists(), &[]).unwrap();
        assert_eq!(outbound.routing_keys, vec!["compute.instance.exists".to_string()]);

        let decoded: Value = serde_json::from_slice(&outbound.body).unwrap();
        let arr = decoded.as_array().unwrap();
        assert_eq!(arr[0], "compute.instance.exists");
        let payload = &arr[1];
        assert_eq!(payload["event_type"], "compute.instance.exists.verified.old");
        assert_eq!(payload["original_message_id"], "orig-1");
        assert_ne!(payload["message_id"], "orig-1");
        assert_eq!(payload["tenant_id"], "T1");
    }

    #[test]
    fn uses_all_configured_routing_keys_when_present() {
        let raw = r#"["compute.instance.exists", {"message_id": "orig-1"}]"#;
        let outbound = build_outbound(raw, &sample_exists(), &["monitor.exists.verified".into(), "billing.exists".into()]).unwrap();
        assert_eq!(outbound.routing_keys, vec!["monitor.exists.verified".to_string(), "billing.exists".to_string()]);
    }

    #[test]
    fn rejects_non_array_envelope() {
        let raw = r#"{"message_id": "orig-1"}"#;
        assert!(build_outbound(raw, &sample_exists(), &[]).is_err());
    }
}
