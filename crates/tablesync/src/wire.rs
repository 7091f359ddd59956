// Versioned wire format for operations exchanged between replicas

use crate::error::ValidationError;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

pub const WIRE_VERSION: u16 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    version: u16,
    operation: &'a Operation,
}

// Version is checked before the operation body is interpreted
#[derive(Deserialize)]
struct RawEnvelope {
    version: u16,
    operation: serde_json::Value,
}

/// Serialize an operation into a wire frame
pub fn encode(operation: &Operation) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&Envelope {
        version: WIRE_VERSION,
        operation,
    })
}

/// Parse a wire frame. Structural validation is left to the engine.
pub fn decode(frame: &[u8]) -> Result<Operation, ValidationError> {
    let raw: RawEnvelope =
        serde_json::from_slice(frame).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    if raw.version != WIRE_VERSION {
        return Err(ValidationError::UnsupportedVersion(raw.version));
    }

    serde_json::from_value(raw.operation).map_err(|e| ValidationError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ActorId, CausalClock};
    use crate::operation::{EntityId, Payload, Zone};
    use crate::stamp::OpId;

    fn sample() -> Operation {
        let actor = ActorId(2);
        Operation {
            id: OpId::new(actor, 1),
            actor,
            target: EntityId::new("card-7"),
            payload: Payload::MoveEntity {
                from_zone: Zone::Hand,
                to_zone: Zone::Graveyard,
            },
            causal_snapshot: CausalClock::new().incremented(actor),
            issued_at: 1_700_000_000_000,
            resolved_by: None,
        }
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["operation"]["payload"]["kind"], "move_entity");
        assert_eq!(value["operation"]["payload"]["to_zone"], "graveyard");
        assert_eq!(value["operation"]["causal_snapshot"]["2"], 1);
        assert!(value["operation"].get("resolved_by").is_none());

        assert_eq!(decode(&frame).unwrap(), sample());
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let frame = br#"{"version": 7, "operation": {}}"#;
        assert_eq!(decode(frame), Err(ValidationError::UnsupportedVersion(7)));
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        let mut value = serde_json::to_value(&sample()).unwrap();
        value["payload"]["to_zone"] = "sideboard".into();
        let unknown_zone = serde_json::json!({"version": 1, "operation": value});

        let mut value = serde_json::to_value(&sample()).unwrap();
        value["payload"] = serde_json::json!({
            "kind": "adjust_counter",
            "counter_name": "charge",
            "delta": 1.5
        });
        let fractional = serde_json::json!({"version": 1, "operation": value});

        for frame in [
            serde_json::to_vec(&unknown_zone).unwrap(),
            serde_json::to_vec(&fractional).unwrap(),
            b"not json".to_vec(),
            br#"{"operation": {}}"#.to_vec(),
        ] {
            assert!(matches!(decode(&frame), Err(ValidationError::Malformed(_))));
        }
    }
}
