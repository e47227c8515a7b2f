use retrace_primitives::TxHash;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Extra parameters for the trace methods.
///
/// Struct-logger options are historically embedded in the main object, hence
/// the flatten.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceOptions {
    /// The struct-logger options.
    #[serde(default, flatten)]
    pub log_config: LogConfig,
    /// Selects a scripted tracer by registered name. When unset, the struct
    /// logger is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracer: Option<String>,
    /// Overrides the scripted tracer's default 5 second deadline; a duration
    /// string such as `"500ms"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// The maximum number of ancestor blocks to re-execute when regenerating
    /// historical state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reexec: Option<u64>,
}

impl TraceOptions {
    /// Selects the given scripted tracer.
    pub fn with_tracer(mut self, tracer: impl Into<String>) -> Self {
        self.tracer = Some(tracer.into());
        self
    }

    /// Sets the scripted tracer deadline.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(format!("{}ms", duration.as_millis()));
        self
    }

    /// Sets the re-execution limit.
    pub const fn with_reexec(mut self, reexec: u64) -> Self {
        self.reexec = Some(reexec);
        self
    }

    /// Sets the struct-logger options.
    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }
}

/// Options of the struct logger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// Disable stack capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_stack: Option<bool>,
    /// Disable memory capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_memory: Option<bool>,
    /// Disable storage capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_storage: Option<bool>,
    /// Future-fork activations applied to the traced block only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ForkOverrides>,
}

impl LogConfig {
    /// Returns `true` if stack capture is enabled.
    pub fn is_stack_enabled(&self) -> bool {
        !self.disable_stack.unwrap_or(false)
    }

    /// Returns `true` if memory capture is enabled.
    pub fn is_memory_enabled(&self) -> bool {
        !self.disable_memory.unwrap_or(false)
    }

    /// Returns `true` if storage capture is enabled.
    pub fn is_storage_enabled(&self) -> bool {
        !self.disable_storage.unwrap_or(false)
    }
}

/// Fork activations a trace may turn on for the traced block.
///
/// Only the specified block is executed under the override; the blocks
/// replayed to reach its state are not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkOverrides {
    /// Activate the berlin gas schedule from this height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<u64>,
}

/// Extra parameters for the standard-JSON trace-to-file method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StdTraceOptions {
    /// The struct-logger options.
    #[serde(default, flatten)]
    pub log_config: LogConfig,
    /// The maximum number of ancestor blocks to re-execute when regenerating
    /// historical state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reexec: Option<u64>,
    /// When set, only the matching transaction is traced and execution stops
    /// right after it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
}
