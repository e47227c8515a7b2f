#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! The execution-trace engine.
//!
//! [`DebugApi`] re-executes transactions, blocks and block ranges under a
//! configurable tracer, regenerating pruned historical state on demand and
//! streaming chain-trace results in strict height order.

mod call_guard;
mod chain;
mod debug;
mod error;
mod result;
mod state;

pub use call_guard::TracingCallGuard;
pub use debug::DebugApi;
pub use error::{DebugApiError, NotFoundKind};
