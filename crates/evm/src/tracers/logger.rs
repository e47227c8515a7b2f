use crate::tracers::Step;
use retrace_primitives::hex;
use retrace_rpc_types::{LogConfig, StructLog};

/// Records opcode-level struct logs for the default trace frame.
///
/// The run's output and gas usage live in the execution result; this only
/// accumulates the per-step logs.
#[derive(Debug, Default)]
pub struct StructLogger {
    config: LogConfig,
    logs: Vec<StructLog>,
}

impl StructLogger {
    /// Creates a logger with the given capture options.
    pub fn new(config: LogConfig) -> Self {
        Self { config, logs: Vec::new() }
    }

    pub(crate) fn capture_state(&mut self, step: &Step<'_>) {
        let log = StructLog {
            pc: step.pc,
            op: step.op.to_string(),
            gas: step.gas,
            gas_cost: step.cost,
            depth: step.depth,
            error: None,
            stack: self.config.is_stack_enabled().then(|| step.stack.to_vec()),
            memory: self.config.is_memory_enabled().then(|| format_memory(step.memory)),
            storage: self.config.is_storage_enabled().then(|| step.storage.clone()),
        };
        self.logs.push(log);
    }

    pub(crate) fn capture_fault(&mut self, err: &str) {
        if let Some(last) = self.logs.last_mut() {
            last.error = Some(err.to_string());
        }
    }

    /// The recorded logs.
    pub fn into_struct_logs(self) -> Vec<StructLog> {
        self.logs
    }
}

/// Memory as 32-byte hex words, the format struct logs use.
fn format_memory(memory: &[u8]) -> Vec<String> {
    memory.chunks(32).map(hex::encode).collect()
}
