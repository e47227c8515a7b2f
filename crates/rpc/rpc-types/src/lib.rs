#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Types returned by and accepted by the `debug` trace RPC namespace.

mod config;
mod trace;

pub use config::{ForkOverrides, LogConfig, StdTraceOptions, TraceOptions};
pub use trace::{BlockTraceResult, DefaultFrame, StructLog, TraceFrame, TraceResult};
