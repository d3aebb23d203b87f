use serde_json::Value;

use crate::error::ParseError;

/// The wire shape of an incoming notification: `[routing_key, payload]`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub routing_key: String,
    pub payload: Value,
}

impl Envelope {
    /// Parse the raw JSON string. Payload fields are consumed lazily by the
    /// handler, not validated here — an envelope with an unrecognized
    /// `routing_key` is still a well-formed envelope (§4.C: unknown routing
    /// keys are silently ignored by the dispatcher, not rejected here).
    pub fn parse(raw_json: &str) -> Result<Self, ParseError> {
        let value: Value =
            serde_json::from_str(raw_json).map_err(|e| ParseError::MalformedEnvelope(e.to_string()))?;
        let arr = value
            .as_array()
            .ok_or_else(|| ParseError::MalformedEnvelope("envelope is not a 2-element array".into()))?;
        let [routing_key, payload] = <[Value; 2]>::try_from(arr.clone())
            .map_err(|_| ParseError::MalformedEnvelope("envelope must have exactly 2 elements".into()))?;
        let routing_key = routing_key
            .as_str()
            .ok_or_else(|| ParseError::MalformedEnvelope("routing_key is not a string".into()))?
            .to_string();
        Ok(Envelope { routing_key, payload })
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_element_array() {
        let json = r#"["compute.instance.create.start", {"message_id": "m-1"}]"#;
        let env = Envelope::parse(json).unwrap();
        assert_eq!(env.routing_key, "compute.instance.create.start");
        assert_eq!(env.payload_str("message_id"), Some("m-1"));
    }

    #[test]
    fn rejects_non_array_envelope() {
        assert!(Envelope::parse(r#"{"not": "an array"}"#).is_err());
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Envelope::parse(r#"["only.one.element"]"#).is_err());
    }
}
