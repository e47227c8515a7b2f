use crate::tracers::Step;
use retrace_primitives::hex;
use retrace_rpc_types::{LogConfig, StructLog};
use std::io::Write;
use tracing::warn;

/// Streams one JSON object per executed opcode to a writer, followed by a
/// summary object, the standard trace format of the dump-to-file path.
pub struct JsonLogger {
    config: LogConfig,
    writer: Box<dyn Write + Send>,
    failed: bool,
}

impl JsonLogger {
    /// Creates a logger writing to `writer` with the given capture options.
    pub fn new(config: LogConfig, writer: Box<dyn Write + Send>) -> Self {
        Self { config, writer, failed: false }
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
            memory: self
                .config
                .is_memory_enabled()
                .then(|| step.memory.chunks(32).map(hex::encode).collect()),
            storage: self.config.is_storage_enabled().then(|| step.storage.clone()),
        };
        self.write_line(&log);
    }

    pub(crate) fn capture_fault(&mut self, err: &str) {
        self.write_line(&serde_json::json!({ "error": err }));
    }

    pub(crate) fn capture_end(&mut self, output: &[u8], gas_used: u64, err: Option<&str>) {
        let mut summary = serde_json::json!({
            "output": hex::encode_prefixed(output),
            "gasUsed": format!("{gas_used:#x}"),
        });
        if let Some(err) = err {
            summary["error"] = serde_json::Value::String(err.to_string());
        }
        self.write_line(&summary);
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    fn write_line<T: serde::Serialize>(&mut self, value: &T) {
        if self.failed {
            return
        }
        let result = serde_json::to_writer(&mut self.writer, value)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(err) = result {
            warn!(target: "evm::tracers", %err, "standard trace write failed");
            self.failed = true;
        }
    }
}

impl std::fmt::Debug for JsonLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLogger").field("failed", &self.failed).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OpCode;
    use retrace_primitives::U256;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn streams_steps_and_summary() {
        let buf = SharedBuf::default();
        let mut logger = JsonLogger::new(LogConfig::default(), Box::new(buf.clone()));

        let stack = vec![U256::from(1u64)];
        let storage = BTreeMap::new();
        logger.capture_state(&Step {
            pc: 0,
            op: OpCode::Push1,
            gas: 100,
            cost: 3,
            depth: 1,
            stack: &stack,
            memory: &[],
            storage: &storage,
        });
        logger.capture_end(b"\xab", 21_016, None);
        logger.flush().unwrap();

        let written = buf.0.lock().unwrap().clone();
        let lines: Vec<&str> =
            std::str::from_utf8(&written).unwrap().lines().collect();
        assert_eq!(lines.len(), 2);
        let step: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(step["op"], "PUSH1");
        let summary: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(summary["output"], "0xab");
        assert_eq!(summary["gasUsed"], "0x5218");
    }
}
