//! Plan evaluation against a queryable.
//!
//! The interpreter walks a compiled plan tree depth-first and runs its
//! leaf statements against one [`Queryable`]; the batch executor layers
//! the multi/compacted batch policies on top.
//!
//! [`Queryable`]: request_engine_adapters::Queryable

pub mod batch;
pub mod error;
pub mod interpreter;
pub mod observer;
mod value;

pub use batch::execute_batch;
pub use error::InterpretError;
pub use interpreter::{interpret, ExecutionContext};
pub use observer::{QueryEvent, QueryObserver, QueryTarget};
