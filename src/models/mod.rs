//! Domain models shared by the relay: glucose readings and dose events.

pub mod event;
pub mod reading;

pub use event::{Event, EventFilter, EventKind, NewEvent};
pub use reading::{mmol_to_mgdl, HistoryPoint, LatestPayload, Reading, Trend};
