//! `debug` API implementation: per-transaction and per-block tracing.

use crate::{
    error::{DebugApiError, NotFoundKind},
    result::internal_rpc_err,
    state::{compute_state_at, replay_transactions_until},
    TracingCallGuard,
};
use async_trait::async_trait;
use jsonrpsee::{
    core::{RpcResult, SubscriptionResult},
    PendingSubscriptionSink,
};
use parking_lot::Mutex;
use retrace_evm::{
    execute,
    tracers::{Deadline, JsonLogger, StopSignal, Tracer, TracerRegistry, TxContext},
    BlockEnv, CfgEnv,
};
use retrace_primitives::{
    alloy_rlp::{self, Decodable, Encodable},
    hex, Block, BlockNumberOrTag, Bytes, ChainSpec, Message, SealedBlock, TxHash, B256,
};
use retrace_provider::{
    BlockReader, ChainSpecProvider, Consensus, StateProviderFactory,
};
use retrace_rpc_api::DebugApiServer;
use retrace_rpc_types::{DefaultFrame, StdTraceOptions, TraceFrame, TraceOptions, TraceResult};
use retrace_state::StateDb;
use std::{io::BufWriter, num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::sync::{AcquireError, OwnedSemaphorePermit};
use tracing::{info, warn};

/// The amount of time a single transaction can execute under a scripted
/// tracer before being forcefully aborted.
pub(crate) const DEFAULT_TRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// The number of blocks the tracer is willing to go back and re-execute to
/// produce missing historical state.
pub(crate) const DEFAULT_TRACE_REEXEC: u64 = 128;

/// `debug` API implementation.
///
/// This type provides the functionality for handling `debug` related
/// requests.
pub struct DebugApi<Provider> {
    inner: Arc<DebugApiInner<Provider>>,
}

struct DebugApiInner<Provider> {
    /// The collaborator that resolves blocks, state and the chain spec.
    provider: Provider,
    /// Validates headers before a block is traced.
    consensus: Arc<dyn Consensus>,
    /// Named scripted tracers.
    tracer_registry: Arc<TracerRegistry>,
    // restrict the number of concurrent tracing calls
    tracing_call_guard: TracingCallGuard,
}

// === impl DebugApi ===

impl<Provider> DebugApi<Provider> {
    /// Create a new instance of the [`DebugApi`].
    pub fn new(
        provider: Provider,
        consensus: Arc<dyn Consensus>,
        tracer_registry: Arc<TracerRegistry>,
        tracing_call_guard: TracingCallGuard,
    ) -> Self {
        let inner = Arc::new(DebugApiInner {
            provider,
            consensus,
            tracer_registry,
            tracing_call_guard,
        });
        Self { inner }
    }

    /// The configured tracer registry.
    pub fn tracer_registry(&self) -> &Arc<TracerRegistry> {
        &self.inner.tracer_registry
    }
}

impl<Provider> DebugApi<Provider>
where
    Provider: BlockReader + StateProviderFactory + ChainSpecProvider + Clone + 'static,
{
    /// Executes the closure on a new blocking task.
    pub(crate) async fn on_blocking_task<F, R>(&self, f: F) -> Result<R, DebugApiError>
    where
        F: FnOnce(Self) -> Result<R, DebugApiError> + Send + 'static,
        R: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|err| DebugApiError::Internal(err.to_string()))?
    }

    /// Acquires a permit to execute a tracing call.
    async fn acquire_trace_permit(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.inner.tracing_call_guard.clone().acquire_owned().await
    }

    /// The configured provider.
    pub fn provider(&self) -> &Provider {
        &self.inner.provider
    }

    /// Resolves a block id against the canonical chain.
    pub(crate) fn block_by_id(
        &self,
        block_id: BlockNumberOrTag,
    ) -> Result<SealedBlock, DebugApiError> {
        self.provider().block_by_number_or_tag(block_id)?.ok_or_else(|| {
            DebugApiError::NotFound { kind: NotFoundKind::Block, id: block_id.to_string() }
        })
    }

    /// Replays a block and returns the trace of each transaction.
    pub async fn debug_trace_block(
        &self,
        block_id: BlockNumberOrTag,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        let block = self.block_by_id(block_id)?;
        self.trace_block_with(block, opts).await
    }

    /// Replays the block with the given hash and returns the trace of each
    /// transaction.
    pub async fn debug_trace_block_by_hash(
        &self,
        hash: B256,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        let block = self
            .provider()
            .block_by_hash(hash)?
            .ok_or_else(|| DebugApiError::NotFound {
                kind: NotFoundKind::Block,
                id: hash.to_string(),
            })?;
        self.trace_block_with(block, opts).await
    }

    /// Replays an RLP-encoded block and returns the trace of each
    /// transaction.
    ///
    /// The parent of this block must be present, or it will fail.
    pub async fn debug_trace_raw_block(
        &self,
        rlp_block: Bytes,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        let block = Block::decode(&mut rlp_block.as_ref())
            .map_err(|err| DebugApiError::DecodeFailed(err.to_string()))?;
        self.trace_block_with(block.seal_slow(), opts).await
    }

    /// Reads an RLP-encoded block from the local filesystem and traces it.
    pub async fn debug_trace_block_from_file(
        &self,
        path: &str,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        let blob = std::fs::read(path)
            .map_err(|err| DebugApiError::DecodeFailed(format!("could not read file: {err}")))?;
        self.debug_trace_raw_block(blob.into(), opts).await
    }

    async fn trace_block_with(
        &self,
        block: SealedBlock,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        self.on_blocking_task(move |this| this.trace_block_sync(block, opts)).await
    }

    /// Traces all transactions of the block against its parent state, with
    /// bounded intra-block parallelism.
    ///
    /// Workers trace each transaction against their own copy of the
    /// snapshot while the driver fast-forwards the shared one untraced, so
    /// transaction `i + 1` is traced on the exact post-`i` state. Driver
    /// failures abort the whole call; per-transaction tracer failures are
    /// reported in-band.
    fn trace_block_sync(
        &self,
        block: SealedBlock,
        opts: TraceOptions,
    ) -> Result<Vec<TraceResult>, DebugApiError> {
        self.inner.consensus.validate_header(&block.header)?;
        let parent = self.provider().block_by_hash(block.parent_hash)?.ok_or_else(|| {
            DebugApiError::NotFound {
                kind: NotFoundKind::Parent,
                id: block.parent_hash.to_string(),
            }
        })?;

        let reexec = opts.reexec.unwrap_or(DEFAULT_TRACE_REEXEC);
        let mut state = compute_state_at(self.provider(), &parent, reexec, None)?;

        if block.body.is_empty() {
            return Ok(Vec::new())
        }

        let chain_spec = self.provider().chain_spec();
        let cfg = CfgEnv::new(chain_spec.clone());
        let block_env = BlockEnv::new(&block.header);
        let delete_empty = chain_spec.is_spurious_dragon_active_at_block(block.number);
        let registry = self.inner.tracer_registry.clone();

        let threads = available_parallelism().min(block.body.len());
        let results = Mutex::new(vec![None::<TraceResult>; block.body.len()]);
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<TxTraceTask>(block.body.len());
        let mut failed = None;

        std::thread::scope(|scope| {
            for _ in 0..threads {
                let jobs_rx = jobs_rx.clone();
                let results = &results;
                let block = &block;
                let cfg = &cfg;
                let block_env = &block_env;
                let opts = &opts;
                let registry = &registry;
                scope.spawn(move || {
                    // fetch and execute the next transaction trace tasks
                    while let Ok(mut task) = jobs_rx.recv() {
                        let tx = &block.body[task.index];
                        let traced = tx.as_message(block.base_fee_per_gas).map_err(Into::into).and_then(
                            |message| {
                                let tx_ctx = TxContext {
                                    block_hash: block.hash(),
                                    tx_index: task.index,
                                    tx_hash: tx.hash(),
                                };
                                trace_transaction_in_env(
                                    &message,
                                    tx_ctx,
                                    cfg,
                                    block_env,
                                    &mut task.state,
                                    opts,
                                    registry,
                                )
                            },
                        );
                        let entry = match traced {
                            Ok(frame) => TraceResult::success(frame),
                            Err(err) => TraceResult::error(err.to_string()),
                        };
                        results.lock()[task.index] = Some(entry);
                    }
                });
            }

            // feed the transactions into the tracers and fast-forward the
            // driver snapshot past each of them
            for (index, tx) in block.body.iter().enumerate() {
                if jobs_tx.send(TxTraceTask { state: state.copy(), index }).is_err() {
                    failed =
                        Some(DebugApiError::Internal("trace workers exited early".to_string()));
                    break
                }

                let advanced = tx
                    .as_message(block.base_fee_per_gas)
                    .map_err(DebugApiError::from)
                    .and_then(|message| {
                        state.prepare(tx.hash(), index);
                        execute(&message, &mut state, &cfg, &block_env, &mut Tracer::noop())
                            .map_err(DebugApiError::from_evm)
                    });
                if let Err(err) = advanced {
                    failed = Some(err);
                    break
                }
                state.finalise(delete_empty);
            }
            drop(jobs_tx);
        });

        if let Some(err) = failed {
            return Err(err)
        }
        results
            .into_inner()
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| DebugApiError::Internal("missing trace result".to_string()))
            })
            .collect()
    }

    /// Re-executes the transaction in the exact conditions it was included
    /// under and returns the tracer artifact.
    pub async fn debug_trace_transaction(
        &self,
        tx_hash: TxHash,
        opts: TraceOptions,
    ) -> Result<TraceFrame, DebugApiError> {
        let (tx, meta) = self.provider().transaction_by_hash(tx_hash)?.ok_or_else(|| {
            DebugApiError::NotFound { kind: NotFoundKind::Transaction, id: tx_hash.to_string() }
        })?;
        // it shouldn't happen in practice
        if meta.block_number == 0 {
            return Err(DebugApiError::NotTraceable)
        }
        let block = self.provider().block_by_hash(meta.block_hash)?.ok_or_else(|| {
            DebugApiError::NotFound {
                kind: NotFoundKind::Block,
                id: meta.block_hash.to_string(),
            }
        })?;

        self.on_blocking_task(move |this| {
            let parent =
                this.provider().block_by_hash(block.parent_hash)?.ok_or_else(|| {
                    DebugApiError::NotFound {
                        kind: NotFoundKind::Parent,
                        id: block.parent_hash.to_string(),
                    }
                })?;
            let reexec = opts.reexec.unwrap_or(DEFAULT_TRACE_REEXEC);
            let mut state = compute_state_at(this.provider(), &parent, reexec, None)?;

            let cfg = CfgEnv::new(this.provider().chain_spec());
            let block_env = BlockEnv::new(&block.header);
            // replay all transactions prior to the targeted one
            replay_transactions_until(&mut state, &cfg, &block_env, &block, meta.index)?;

            let message = tx.as_message(block.base_fee_per_gas)?;
            let tx_ctx = TxContext {
                block_hash: meta.block_hash,
                tx_index: meta.index,
                tx_hash,
            };
            trace_transaction_in_env(
                &message,
                tx_ctx,
                &cfg,
                &block_env,
                &mut state,
                &opts,
                &this.inner.tracer_registry,
            )
        })
        .await
    }

    /// Traces the block into one standard-JSON dump file per traced
    /// transaction and returns the file names.
    pub async fn debug_standard_trace_block_to_file(
        &self,
        block_hash: B256,
        opts: StdTraceOptions,
    ) -> Result<Vec<String>, DebugApiError> {
        let block = self
            .provider()
            .block_by_hash(block_hash)?
            .ok_or_else(|| DebugApiError::NotFound {
                kind: NotFoundKind::Block,
                id: block_hash.to_string(),
            })?;
        self.on_blocking_task(move |this| this.standard_trace_block_to_file_sync(block, opts))
            .await
    }

    fn standard_trace_block_to_file_sync(
        &self,
        block: SealedBlock,
        opts: StdTraceOptions,
    ) -> Result<Vec<String>, DebugApiError> {
        // if we're tracing a single transaction, make sure it's present
        if let Some(target) = opts.tx_hash {
            if !block.body.iter().any(|tx| tx.hash() == target) {
                return Err(DebugApiError::NotFound {
                    kind: NotFoundKind::Transaction,
                    id: target.to_string(),
                })
            }
        }
        self.inner.consensus.validate_header(&block.header)?;
        let parent = self.provider().block_by_hash(block.parent_hash)?.ok_or_else(|| {
            DebugApiError::NotFound {
                kind: NotFoundKind::Parent,
                id: block.parent_hash.to_string(),
            }
        })?;
        let reexec = opts.reexec.unwrap_or(DEFAULT_TRACE_REEXEC);
        let mut state = compute_state_at(self.provider(), &parent, reexec, None)?;

        // the caller may wish to enable a future fork when executing this
        // block; such overrides apply to the traced block only, never to the
        // blocks replayed to reach its state, so the shared spec is deep
        // copied first
        let chain_spec = self.provider().chain_spec();
        let chain_spec = match opts.log_config.overrides.and_then(|o| o.berlin_block) {
            Some(berlin_block) => {
                let mut copy: ChainSpec = (*chain_spec).clone();
                copy.berlin_block = Some(berlin_block);
                Arc::new(copy)
            }
            None => chain_spec,
        };
        let cfg = CfgEnv::new(chain_spec.clone());
        let block_env = BlockEnv::new(&block.header);
        let delete_empty = chain_spec.is_spurious_dragon_active_at_block(block.number);
        let block_hash = block.hash();

        let mut dumps = Vec::new();
        for (index, tx) in block.body.iter().enumerate() {
            let message = tx.as_message(block.base_fee_per_gas)?;
            let tx_hash = tx.hash();
            let traced = opts.tx_hash.is_none_or(|target| target == tx_hash);

            state.prepare(tx_hash, index);
            let executed = if traced {
                // generate a unique temporary file to dump it into
                let prefix = format!(
                    "block_0x{}-{}-0x{}-",
                    hex::encode(&block_hash[..4]),
                    index,
                    hex::encode(&tx_hash[..4])
                );
                let (file, path) = tempfile::Builder::new()
                    .prefix(&prefix)
                    .tempfile()
                    .and_then(|file| file.keep().map_err(Into::into))
                    .map_err(|err| DebugApiError::Internal(err.to_string()))?;
                dumps.push(path.display().to_string());

                let writer = BufWriter::new(file);
                let mut tracer = Tracer::json(JsonLogger::new(
                    opts.log_config.clone(),
                    Box::new(writer),
                ));
                let executed = execute(&message, &mut state, &cfg, &block_env, &mut tracer);
                // flush and close the dump before surfacing any error
                if let Tracer::Json(mut logger) = tracer {
                    let _ = logger.flush();
                }
                info!(target: "rpc::debug", file = %path.display(), "Wrote standard trace");
                executed
            } else {
                execute(&message, &mut state, &cfg, &block_env, &mut Tracer::noop())
            };
            executed.map_err(DebugApiError::from_evm)?;
            state.finalise(delete_empty);

            // if we've traced the transaction we were looking for, abort
            if Some(tx_hash) == opts.tx_hash {
                break
            }
        }
        Ok(dumps)
    }
}

/// A single transaction trace task within a block trace.
struct TxTraceTask {
    /// Intermediate state snapshot prepped for tracing.
    state: StateDb,
    /// Transaction offset in the block.
    index: usize,
}

/// Applies one message under the tracer selected by `opts` and formats the
/// tracer's artifact.
///
/// A scripted tracer runs under a deadline (default 5s) that stops it with
/// an execution timeout; the deadline is always disarmed before returning.
pub(crate) fn trace_transaction_in_env(
    message: &Message,
    tx_ctx: TxContext,
    cfg: &CfgEnv,
    block_env: &BlockEnv,
    state: &mut StateDb,
    opts: &TraceOptions,
    registry: &TracerRegistry,
) -> Result<TraceFrame, DebugApiError> {
    let mut deadline = None;
    let mut tracer = match &opts.tracer {
        Some(name) => {
            let timeout = match &opts.timeout {
                Some(timeout) => humantime::parse_duration(timeout)
                    .map_err(|err| DebugApiError::InvalidTimeout(err.to_string()))?,
                None => DEFAULT_TRACE_TIMEOUT,
            };
            let signal = StopSignal::new();
            let scripted = registry.create(name, &tx_ctx, signal.clone())?;
            deadline = Some(Deadline::start(timeout, signal.clone()));
            Tracer::scripted(scripted, signal)
        }
        None => Tracer::struct_logger(opts.log_config.clone()),
    };

    // clear out per-transaction transient state before tracing
    state.prepare(tx_ctx.tx_hash, tx_ctx.tx_index);

    // run with base-fee enforcement disabled so historical transactions
    // replay under any fee conditions
    let cfg = cfg.clone().with_no_base_fee();
    let executed = execute(message, state, &cfg, block_env, &mut tracer);
    drop(deadline);
    let result = executed.map_err(DebugApiError::from_evm)?;

    // depending on the tracer type, format and return the output
    match tracer {
        Tracer::Struct(logger) => Ok(DefaultFrame {
            failed: result.failed(),
            gas: result.gas_used,
            return_value: hex::encode(&result.output),
            struct_logs: logger.into_struct_logs(),
        }
        .into()),
        Tracer::Scripted { tracer, .. } => Ok(TraceFrame::Custom(tracer.into_result()?)),
        Tracer::Noop => Ok(DefaultFrame {
            failed: result.failed(),
            gas: result.gas_used,
            return_value: hex::encode(&result.output),
            struct_logs: Vec::new(),
        }
        .into()),
        Tracer::Json(_) => {
            Err(DebugApiError::Internal("json logger is reserved for file dumps".to_string()))
        }
    }
}

pub(crate) fn available_parallelism() -> usize {
    std::thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

#[async_trait]
impl<Provider> DebugApiServer for DebugApi<Provider>
where
    Provider: BlockReader + StateProviderFactory + ChainSpecProvider + Clone + 'static,
{
    /// Handler for `debug_getRawHeader`
    async fn raw_header(&self, block_id: BlockNumberOrTag) -> RpcResult<Bytes> {
        let header = self.provider().block_by_number_or_tag(block_id).map_err(DebugApiError::from)?;

        let mut res = Vec::new();
        if let Some(block) = header {
            (*block.header).encode(&mut res);
        }
        Ok(res.into())
    }

    /// Handler for `debug_getRawBlock`
    async fn raw_block(&self, block_id: BlockNumberOrTag) -> RpcResult<Bytes> {
        let block = self.provider().block_by_number_or_tag(block_id).map_err(DebugApiError::from)?;

        let mut res = Vec::new();
        if let Some(block) = block {
            block.unseal().encode(&mut res);
        }
        Ok(res.into())
    }

    /// Handler for `debug_getRawTransaction`
    async fn raw_transaction(&self, hash: TxHash) -> RpcResult<Bytes> {
        let tx = self.provider().transaction_by_hash(hash).map_err(DebugApiError::from)?;
        Ok(tx.map(|(tx, _)| alloy_rlp::encode(&tx).into()).unwrap_or_default())
    }

    /// Handler for `debug_subscribeTraceChain`
    async fn trace_chain(
        &self,
        pending: PendingSubscriptionSink,
        start: BlockNumberOrTag,
        end: BlockNumberOrTag,
        opts: Option<TraceOptions>,
    ) -> SubscriptionResult {
        let stream = match self.debug_trace_chain(start, end, opts.unwrap_or_default()).await {
            Ok(stream) => stream,
            Err(err) => {
                pending.reject(err).await;
                return Ok(())
            }
        };
        let sink = pending.accept().await?;
        tokio::spawn(async move {
            let result = crate::chain::pipe_to_subscription(sink, stream).await;
            if let Err(err) = result {
                warn!(target: "rpc::debug", %err, "Trace chain subscription ended with error");
            }
        });
        Ok(())
    }

    /// Handler for `debug_traceBlockByNumber`
    async fn trace_block_by_number(
        &self,
        block: BlockNumberOrTag,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_trace_block(self, block, opts.unwrap_or_default()).await?)
    }

    /// Handler for `debug_traceBlockByHash`
    async fn trace_block_by_hash(
        &self,
        block: B256,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_trace_block_by_hash(self, block, opts.unwrap_or_default()).await?)
    }

    /// Handler for `debug_traceBlock`
    async fn trace_block(
        &self,
        rlp_block: Bytes,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_trace_raw_block(self, rlp_block, opts.unwrap_or_default()).await?)
    }

    /// Handler for `debug_traceBlockFromFile`
    async fn trace_block_from_file(
        &self,
        path: String,
        opts: Option<TraceOptions>,
    ) -> RpcResult<Vec<TraceResult>> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_trace_block_from_file(self, &path, opts.unwrap_or_default()).await?)
    }

    /// Handler for `debug_traceTransaction`
    async fn trace_transaction(
        &self,
        tx_hash: TxHash,
        opts: Option<TraceOptions>,
    ) -> RpcResult<TraceFrame> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_trace_transaction(self, tx_hash, opts.unwrap_or_default()).await?)
    }

    /// Handler for `debug_standardTraceBlockToFile`
    async fn standard_trace_block_to_file(
        &self,
        block: B256,
        opts: Option<StdTraceOptions>,
    ) -> RpcResult<Vec<String>> {
        let _permit = self.acquire_trace_permit().await.map_err(|_| {
            internal_rpc_err("tracing is shutting down")
        })?;
        Ok(Self::debug_standard_trace_block_to_file(self, block, opts.unwrap_or_default())
            .await?)
    }
}

impl<Provider> std::fmt::Debug for DebugApi<Provider> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugApi").finish_non_exhaustive()
    }
}

impl<Provider> Clone for DebugApi<Provider> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}
