#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]

//! Message execution for the retrace trace engine.
//!
//! The engine executes transaction payloads as programs of a small
//! stack-machine instruction set with deterministic gas accounting. Tracers
//! observe execution through opcode-level callbacks and can be stopped
//! asynchronously; the interpreter honors a stop at the next instruction
//! boundary.

mod env;
mod error;
mod executor;
mod interpreter;
pub mod tracers;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use env::{BlockEnv, CfgEnv};
pub use error::{BlockExecutionError, EvmError};
pub use executor::{execute, execute_block, ExecutionResult, CALLDATA_GAS, INTRINSIC_GAS};
pub use interpreter::{Halt, OpCode};
