//! Build event stream types
//!
//! Events are an append-only stream per build, keyed by `(build_id,
//! event_id)`. Consumers tail by `event_id > last_seen` and are woken by a
//! notification on the `build_events_{build_id}` channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::plan::PlanId;

/// One persisted event in a build's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    pub build_id: Uuid,
    pub event_id: i64,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
}

/// Event kinds. Step-scoped events carry their origin plan id in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Log,
    Status,
    Initialize,
    Start,
    Finish,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Log => "log",
            EventType::Status => "status",
            EventType::Initialize => "initialize",
            EventType::Start => "start",
            EventType::Finish => "finish",
            EventType::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "log" => Some(EventType::Log),
            "status" => Some(EventType::Status),
            "initialize" => Some(EventType::Initialize),
            "start" => Some(EventType::Start),
            "finish" => Some(EventType::Finish),
            "error" => Some(EventType::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The step a step-scoped event originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventOrigin {
    pub plan_id: PlanId,
    pub step_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_round_trip() {
        for t in [
            EventType::Log,
            EventType::Status,
            EventType::Initialize,
            EventType::Start,
            EventType::Finish,
            EventType::Error,
        ] {
            assert_eq!(EventType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(EventType::from_str("bogus"), None);
    }
}
