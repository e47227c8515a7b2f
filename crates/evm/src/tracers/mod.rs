//! The tracer abstraction.
//!
//! A [`Tracer`] observes message execution through opcode-level callbacks
//! and produces a per-transaction artifact. The variants:
//!
//! - [`Tracer::Noop`] discards all callbacks.
//! - [`Tracer::Struct`] records struct logs for the default frame.
//! - [`Tracer::Scripted`] drives a user-registered [`ScriptedTracer`] and can
//!   be stopped asynchronously through its [`StopSignal`]; the interpreter
//!   observes the stop at the next instruction boundary.
//! - [`Tracer::Json`] streams one JSON object per step to a writer, used by
//!   the standard trace-to-file path.

use crate::OpCode;
use parking_lot::Mutex;
use retrace_primitives::{Address, BlockHash, TxHash, B256, U256};
use std::{collections::BTreeMap, sync::Arc};

mod deadline;
mod json;
mod logger;
mod registry;

pub use deadline::Deadline;
pub use json::JsonLogger;
pub use logger::StructLogger;
pub use registry::{ScriptedTracer, ScriptedTracerFactory, TracerError, TracerRegistry};

/// The stop reason set by an expired trace deadline.
pub const EXECUTION_TIMEOUT: &str = "execution timeout";

/// The context of the transaction being traced.
#[derive(Clone, Debug, Default)]
pub struct TxContext {
    /// Hash of the enclosing block.
    pub block_hash: BlockHash,
    /// Index of the transaction within the block.
    pub tx_index: usize,
    /// Hash of the transaction.
    pub tx_hash: TxHash,
}

/// A sticky, thread-safe cancellation flag for one tracer run.
///
/// The first stop wins; later stops are ignored.
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    reason: Arc<Mutex<Option<String>>>,
}

impl StopSignal {
    /// Creates an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the run to stop with the given reason. Idempotent.
    pub fn stop(&self, reason: impl Into<String>) {
        let mut guard = self.reason.lock();
        if guard.is_none() {
            *guard = Some(reason.into());
        }
    }

    /// The stop reason, once set.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Returns `true` once a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.reason.lock().is_some()
    }
}

/// One opcode-level step, passed to tracer callbacks by the interpreter.
#[derive(Debug)]
pub struct Step<'a> {
    /// Program counter.
    pub pc: u64,
    /// The opcode about to execute.
    pub op: OpCode,
    /// Gas remaining before this step.
    pub gas: u64,
    /// Cost of this step.
    pub cost: u64,
    /// Call depth.
    pub depth: u64,
    /// The stack, bottom first.
    pub stack: &'a [U256],
    /// Current memory contents.
    pub memory: &'a [u8],
    /// Storage slots read or written so far by this run.
    pub storage: &'a BTreeMap<B256, U256>,
}

/// A tracer observing one message application.
pub enum Tracer {
    /// Discards all callbacks.
    Noop,
    /// The struct logger behind the default frame.
    Struct(StructLogger),
    /// A user-registered scripted tracer with its stop signal.
    Scripted {
        /// The scripted tracer observing the callbacks.
        tracer: Box<dyn ScriptedTracer>,
        /// The signal a deadline or a caller stops the run with.
        signal: StopSignal,
    },
    /// Streams steps as JSON objects to a writer.
    Json(JsonLogger),
}

impl Tracer {
    /// A tracer that discards everything.
    pub const fn noop() -> Self {
        Self::Noop
    }

    /// A struct logger with the given options.
    pub fn struct_logger(config: retrace_rpc_types::LogConfig) -> Self {
        Self::Struct(StructLogger::new(config))
    }

    /// A scripted tracer stoppable through `signal`.
    pub fn scripted(tracer: Box<dyn ScriptedTracer>, signal: StopSignal) -> Self {
        Self::Scripted { tracer, signal }
    }

    /// A JSON stream logger.
    pub fn json(logger: JsonLogger) -> Self {
        Self::Json(logger)
    }

    /// The sticky stop reason, if this tracer can be stopped and was.
    pub fn interrupted(&self) -> Option<String> {
        match self {
            Self::Scripted { signal, .. } => signal.reason(),
            _ => None,
        }
    }

    /// Called once before execution starts.
    pub fn capture_start(
        &mut self,
        from: Address,
        to: Address,
        create: bool,
        input: &[u8],
        gas: u64,
        value: U256,
    ) {
        match self {
            Self::Noop | Self::Struct(_) | Self::Json(_) => {}
            Self::Scripted { tracer, .. } => {
                tracer.capture_start(from, to, create, input, gas, value)
            }
        }
    }

    /// Called before every executed instruction.
    pub fn capture_state(&mut self, step: &Step<'_>) {
        match self {
            Self::Noop => {}
            Self::Struct(logger) => logger.capture_state(step),
            Self::Scripted { tracer, .. } => tracer.capture_state(step),
            Self::Json(logger) => logger.capture_state(step),
        }
    }

    /// Called when the executing instruction fails.
    pub fn capture_fault(&mut self, err: &str) {
        match self {
            Self::Noop => {}
            Self::Struct(logger) => logger.capture_fault(err),
            Self::Scripted { tracer, .. } => tracer.capture_fault(err),
            Self::Json(logger) => logger.capture_fault(err),
        }
    }

    /// Called once after execution finished.
    pub fn capture_end(&mut self, output: &[u8], gas_used: u64, err: Option<&str>) {
        match self {
            Self::Noop | Self::Struct(_) => {}
            Self::Scripted { tracer, .. } => tracer.capture_end(output, gas_used, err),
            Self::Json(logger) => logger.capture_end(output, gas_used, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signal_is_sticky_and_first_wins() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        signal.stop("first");
        signal.stop("second");
        assert_eq!(signal.reason().as_deref(), Some("first"));

        let clone = signal.clone();
        assert!(clone.is_stopped());
    }
}
