use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named occurrence that starts new runs of every definition whose
/// trigger set contains the event's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique id of this event instance
    pub id: String,

    /// Event name, e.g. `"employee.hired"`
    pub name: String,

    /// Optional payload carried into the run's initial variables
    pub payload: Option<serde_json::Value>,

    /// Time the event was created
    pub created_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// Create a new event
    pub fn new(name: &str, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_construction() {
        let event = TriggerEvent::new("employee.hired", Some(serde_json::json!({"name": "A"})));
        assert_eq!(event.name, "employee.hired");
        assert!(event.payload.is_some());
        assert!(!event.id.is_empty());
    }
}
