use crate::tracers::{Step, StopSignal, TxContext};
use parking_lot::RwLock;
use retrace_primitives::{Address, U256};
use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

/// A user-supplied tracer observing execution callbacks and yielding an
/// opaque artifact.
///
/// This is the embeddable-interpreter seam: implementations are registered
/// by name in a [`TracerRegistry`] and constructed per traced transaction
/// with the transaction context and the stop signal of the run.
pub trait ScriptedTracer: Send {
    /// Called once before execution starts.
    fn capture_start(
        &mut self,
        _from: Address,
        _to: Address,
        _create: bool,
        _input: &[u8],
        _gas: u64,
        _value: U256,
    ) {
    }

    /// Called before every executed instruction.
    fn capture_state(&mut self, _step: &Step<'_>) {}

    /// Called when the executing instruction fails.
    fn capture_fault(&mut self, _err: &str) {}

    /// Called once after execution finished.
    fn capture_end(&mut self, _output: &[u8], _gas_used: u64, _err: Option<&str>) {}

    /// Produces the final artifact. Only called after the run completed or
    /// was stopped.
    fn into_result(self: Box<Self>) -> Result<serde_json::Value, TracerError>;
}

/// Builds a [`ScriptedTracer`] for one traced transaction.
pub trait ScriptedTracerFactory: Send + Sync {
    /// Creates the tracer for the given transaction context. The signal is
    /// the run's cancellation flag; long-running tracers should observe it.
    fn create(&self, ctx: &TxContext, signal: StopSignal) -> Box<dyn ScriptedTracer>;
}

impl<F> ScriptedTracerFactory for F
where
    F: Fn(&TxContext, StopSignal) -> Box<dyn ScriptedTracer> + Send + Sync,
{
    fn create(&self, ctx: &TxContext, signal: StopSignal) -> Box<dyn ScriptedTracer> {
        self(ctx, signal)
    }
}

/// Errors produced by scripted tracers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TracerError {
    /// No tracer is registered under the requested name.
    #[error("unknown tracer: {0}")]
    UnknownTracer(String),
    /// The tracer failed to produce its artifact.
    #[error("tracer failed: {0}")]
    Failed(String),
}

/// The registry of named scripted tracers.
///
/// Ships the built-in `opcodeCount` tracer; callers register additional
/// factories under their own names.
pub struct TracerRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ScriptedTracerFactory>>>,
}

impl TracerRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self { factories: RwLock::new(HashMap::new()) }
    }

    /// A registry with the built-in tracers registered.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register("opcodeCount", Arc::new(new_opcode_count_tracer));
        registry
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register(&self, name: impl Into<String>, factory: Arc<dyn ScriptedTracerFactory>) {
        self.factories.write().insert(name.into(), factory);
    }

    /// Constructs the named tracer for a transaction.
    pub fn create(
        &self,
        name: &str,
        ctx: &TxContext,
        signal: StopSignal,
    ) -> Result<Box<dyn ScriptedTracer>, TracerError> {
        let factory = self
            .factories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TracerError::UnknownTracer(name.to_string()))?;
        Ok(factory.create(ctx, signal))
    }
}

impl Default for TracerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TracerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.factories.read().keys().cloned().collect();
        f.debug_struct("TracerRegistry").field("tracers", &names).finish()
    }
}

fn new_opcode_count_tracer(_ctx: &TxContext, _signal: StopSignal) -> Box<dyn ScriptedTracer> {
    Box::new(OpcodeCountTracer::default())
}

/// Counts executed opcodes by mnemonic.
#[derive(Debug, Default)]
struct OpcodeCountTracer {
    counts: BTreeMap<&'static str, u64>,
}

impl ScriptedTracer for OpcodeCountTracer {
    fn capture_state(&mut self, step: &Step<'_>) {
        *self.counts.entry(step.op.as_str()).or_default() += 1;
    }

    fn into_result(self: Box<Self>) -> Result<serde_json::Value, TracerError> {
        serde_json::to_value(self.counts)
            .map_err(|err| TracerError::Failed(err.to_string()))
    }
}
