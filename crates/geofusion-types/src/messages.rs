//! Push-channel envelopes delivered to connected observers.
//!
//! Three kinds exist, discriminated by the `action` field:
//!
//! | `action` | Sent when |
//! |----------|-----------|
//! | `initial_state` | once, to a newly connected observer |
//! | `event_batch` | once per affected layer, after every commit |
//! | `risk_update` | after every commit, carrying the new risk snapshot |

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::EventType;
use crate::structs::{Event, RiskLevel};

/// A message on the observer push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "action", rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum OutboundMessage {
    /// Full state for a late-joining observer.
    InitialState {
        /// Every retained event across all layers.
        data: Vec<Event>,
        /// Current risk snapshot.
        risk: RiskLevel,
        /// Names of all layers.
        layers: Vec<EventType>,
    },
    /// The full current contents of one layer after a commit.
    EventBatch {
        /// The layer that changed.
        layer: EventType,
        /// Current contents of that layer.
        data: Vec<Event>,
        /// Risk snapshot computed by the same commit.
        risk: RiskLevel,
    },
    /// A new risk snapshot.
    RiskUpdate {
        /// The new snapshot.
        risk: RiskLevel,
    },
}

impl OutboundMessage {
    /// The `action` discriminator.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "initial_state",
            Self::EventBatch { .. } => "event_batch",
            Self::RiskUpdate { .. } => "risk_update",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_action_tag() {
        let msg = OutboundMessage::RiskUpdate {
            risk: RiskLevel::nominal(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "risk_update");
        assert_eq!(json["risk"]["level"], 1);
        assert_eq!(msg.kind(), "risk_update");
    }

    #[test]
    fn event_batch_names_layer() {
        let msg = OutboundMessage::EventBatch {
            layer: EventType::Cyber,
            data: Vec::new(),
            risk: RiskLevel::nominal(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "event_batch");
        assert_eq!(json["layer"], "cyber");
    }
}
