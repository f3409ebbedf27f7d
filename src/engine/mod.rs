//! Fetch coordination and history windowing for the glucose pipeline.

pub mod coordinator;
pub mod window;

pub use coordinator::{CoordinatorConfig, CoordinatorStatus, FetchCoordinator, Latest, StaleReason};
pub use window::build_window;
