#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! RPC interface of the `debug` trace namespace.

mod debug;

pub use debug::{DebugApiServer, StdTraceOptions, TraceOptions};
