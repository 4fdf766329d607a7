//! Test support for jobgate: an in-memory store, a recording work handler
//! and engine fixtures.

pub mod fixtures;
pub mod handler;
pub mod store;

pub use fixtures::*;
pub use handler::{HandlerBehavior, RecordingHandler};
pub use store::InMemoryJobStore;
