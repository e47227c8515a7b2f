use retrace_primitives::{BlockHash, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One opcode-level step recorded by the struct logger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLog {
    /// Program counter.
    pub pc: u64,
    /// The executed opcode.
    pub op: String,
    /// Remaining gas before executing the op.
    pub gas: u64,
    /// Cost of executing the op.
    #[serde(rename = "gasCost")]
    pub gas_cost: u64,
    /// Current call depth.
    pub depth: u64,
    /// Error raised by this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The stack before executing the op, bottom first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<U256>>,
    /// Memory before executing the op, as hex words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<String>>,
    /// Storage slots of the executing contract read or written so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<B256, U256>>,
}

/// The result frame of the default struct-log tracer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultFrame {
    /// Whether the transaction failed (reverted or halted exceptionally).
    pub failed: bool,
    /// Gas used by the transaction.
    pub gas: u64,
    /// Output of the transaction, hex encoded without prefix. Holds the
    /// revert payload when the transaction reverted.
    pub return_value: String,
    /// The recorded opcode steps.
    pub struct_logs: Vec<StructLog>,
}

/// The artifact produced by tracing one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceFrame {
    /// The struct-log tracer's frame.
    Default(DefaultFrame),
    /// The opaque artifact of a scripted tracer.
    Custom(serde_json::Value),
}

impl Default for TraceFrame {
    fn default() -> Self {
        Self::Default(DefaultFrame::default())
    }
}

impl From<DefaultFrame> for TraceFrame {
    fn from(frame: DefaultFrame) -> Self {
        Self::Default(frame)
    }
}

impl From<serde_json::Value> for TraceFrame {
    fn from(value: serde_json::Value) -> Self {
        Self::Custom(value)
    }
}

impl TraceFrame {
    /// Returns the default frame, if this is one.
    pub fn into_default_frame(self) -> Option<DefaultFrame> {
        match self {
            Self::Default(frame) => Some(frame),
            Self::Custom(_) => None,
        }
    }
}

/// The result of tracing a single transaction: the artifact, or the error
/// the tracer run produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceResult {
    /// The trace succeeded.
    Success {
        /// The artifact produced by the tracer.
        result: TraceFrame,
    },
    /// The trace failed.
    Error {
        /// The failure produced by the tracer run.
        error: String,
    },
}

impl TraceResult {
    /// Wraps a frame into a success result.
    pub fn success(result: impl Into<TraceFrame>) -> Self {
        Self::Success { result: result.into() }
    }

    /// Wraps an error message into a failure result.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error { error: error.into() }
    }

    /// Returns `true` for failure results.
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns the frame of a success result.
    pub fn into_frame(self) -> Option<TraceFrame> {
        match self {
            Self::Success { result } => Some(result),
            Self::Error { .. } => None,
        }
    }
}

/// The results of tracing a single block when an entire chain is being
/// traced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTraceResult {
    /// Block number corresponding to this trace.
    pub block: u64,
    /// Block hash corresponding to this trace.
    pub hash: BlockHash,
    /// One entry per transaction, in block order. Entries after a failed
    /// transaction are `None`.
    pub traces: Vec<Option<TraceResult>>,
}
