//! # models::event
//!
//! Dose events kept by the ledger. Independent of the glucose pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Bolus,
    Basal,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Bolus => "bolus",
            EventKind::Basal => "basal",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bolus" => Some(EventKind::Bolus),
            "basal" => Some(EventKind::Basal),
            _ => None,
        }
    }
}

/// A stored insulin dose. Created by append, removed by delete, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id:   Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub dose: i64,
    pub ts:   DateTime<Utc>,
}

/// Request body of `POST /events`.
///
/// `dose` is typed `i64` so `"5"` or `5.5` fail deserialisation and come back
/// as validation errors.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub dose: i64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// Assigns an id and, when the caller gave none, the server timestamp.
    pub fn into_event(self, now: DateTime<Utc>) -> Event {
        Event {
            id:   Uuid::new_v4(),
            kind: self.kind,
            dose: self.dose,
            ts:   self.timestamp.unwrap_or(now),
        }
    }
}

/// Range/limit filter for ledger queries. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        self.since.map_or(true, |s| event.ts >= s) && self.until.map_or(true, |u| event.ts <= u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_event_rejects_unknown_type() {
        let err = serde_json::from_str::<NewEvent>(r#"{"type":"snack","dose":5}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_new_event_rejects_string_dose() {
        let err = serde_json::from_str::<NewEvent>(r#"{"type":"bolus","dose":"5"}"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<NewEvent>(r#"{"type":"bolus","dose":5.5}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_event_serialises_kind_as_type() {
        let now = Utc::now();
        let event = NewEvent { kind: EventKind::Basal, dose: 12, timestamp: None }.into_event(now);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "basal");
        assert_eq!(json["dose"], 12);
        assert_eq!(event.ts, now);
    }
}
