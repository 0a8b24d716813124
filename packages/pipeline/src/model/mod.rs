// packages/pipeline/src/model/mod.rs
//! Event data model
//!
//! - **PageContext**: the external request events belong to
//! - **Event**: one captured call
//! - **ParamMap / ParamValue**: ordered, possibly nested call arguments
//! - **ObjectRef**: opaque reference to a live object, rendered on demand

pub mod event;
pub mod page;
pub mod params;

// Re-export commonly used types
pub use event::{Event, StackFrame, INTERCEPTION_FRAMES};
pub use page::PageContext;
pub use params::{ObjectRef, ObjectSnapshot, ParamMap, ParamValue};
