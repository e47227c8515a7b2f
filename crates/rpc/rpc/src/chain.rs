//! The chain trace pipeline.
//!
//! Three concurrent roles stream a block range's traces in height order:
//! a feeder regenerates the parent state of each block and hands
//! [`BlockTraceTask`]s to a bounded worker pool; workers trace every
//! transaction of their block sequentially; a receiver reorders completed
//! blocks and emits them on the outbound stream. Trie roots pinned for a
//! task travel as drop-safe debt handles, so the feeder can return every
//! pin on any exit path — completion, failure, or subscriber cancellation.

use crate::{
    debug::{available_parallelism, trace_transaction_in_env, DebugApi, DEFAULT_TRACE_REEXEC},
    error::{DebugApiError, NotFoundKind},
    state::{compute_state_at, PROGRESS_LOG_INTERVAL},
};
use crossbeam_channel::SendTimeoutError;
use futures::{Stream, StreamExt};
use jsonrpsee::{server::SubscriptionMessage, SubscriptionSink};
use parking_lot::Mutex;
use retrace_evm::{tracers::TxContext, BlockEnv, CfgEnv};
use retrace_primitives::{BlockNumberOrTag, SealedBlock, B256};
use retrace_provider::{BlockReader, ChainSpecProvider, StateProviderFactory};
use retrace_rpc_types::{BlockTraceResult, TraceOptions, TraceResult};
use retrace_state::StateDb;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

/// A single block trace task when an entire chain is being traced.
struct BlockTraceTask {
    /// Intermediate state prepped for tracing.
    state: StateDb,
    /// Block to trace the transactions from.
    block: SealedBlock,
    /// Trie root held for this task, returned to the feeder once the task
    /// has been consumed.
    rootref: DerefDebt,
    /// Trace results produced by the task, one slot per transaction.
    results: Vec<Option<TraceResult>>,
}

/// The deref debt of a pinned trie root.
///
/// Queues its root for dereferencing when dropped, so the debt is returned
/// whether the task was consumed by the receiver, abandoned in a closing
/// channel, or discarded by a cancelled worker.
struct DerefDebt {
    root: B256,
    queue: Arc<Mutex<Vec<B256>>>,
}

impl DerefDebt {
    fn new(root: B256, queue: Arc<Mutex<Vec<B256>>>) -> Self {
        Self { root, queue }
    }
}

impl Drop for DerefDebt {
    fn drop(&mut self) {
        self.queue.lock().push(self.root);
    }
}

struct FeederExit {
    traced: u64,
    number: u64,
    failed: Option<DebugApiError>,
}

// === impl DebugApi ===

impl<Provider> DebugApi<Provider>
where
    Provider: BlockReader + StateProviderFactory + ChainSpecProvider + Clone + 'static,
{
    /// Re-executes all blocks in the range (excluding `start`, including
    /// `end`) and returns an ordered stream of per-block trace results.
    ///
    /// Dropping the stream cancels the pipeline; each role observes the
    /// cancellation within one unit of work.
    pub async fn debug_trace_chain(
        &self,
        start: BlockNumberOrTag,
        end: BlockNumberOrTag,
        opts: TraceOptions,
    ) -> Result<ReceiverStream<BlockTraceResult>, DebugApiError> {
        let start = self.block_by_id(start)?;
        let end = self.block_by_id(end)?;
        if start.number >= end.number {
            return Err(DebugApiError::RangeInvalid { start: start.number, end: end.number })
        }
        Ok(self.trace_chain_stream(start, end, opts))
    }

    fn trace_chain_stream(
        &self,
        start: SealedBlock,
        end: SealedBlock,
        opts: TraceOptions,
    ) -> ReceiverStream<BlockTraceResult> {
        let blocks = (end.number - start.number) as usize;
        let threads = available_parallelism().min(blocks);
        let start_number = start.number;
        let end_number = end.number;

        let (tasks_tx, tasks_rx) = crossbeam_channel::bounded::<BlockTraceTask>(threads);
        let (results_tx, mut results_rx) = mpsc::channel::<BlockTraceTask>(threads);
        let (out_tx, out_rx) = mpsc::channel::<BlockTraceResult>(threads);
        let deref_queue: Arc<Mutex<Vec<B256>>> = Arc::new(Mutex::new(Vec::new()));

        let trie = self.provider().trie_db();
        let chain_spec = self.provider().chain_spec();

        // workers: trace the transactions of each block sequentially; the
        // parallelism of this pipeline is across blocks
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let tasks_rx = tasks_rx.clone();
            let results_tx = results_tx.clone();
            let chain_spec = chain_spec.clone();
            let opts = opts.clone();
            let registry = self.tracer_registry().clone();
            workers.push(tokio::task::spawn_blocking(move || {
                while let Ok(mut task) = tasks_rx.recv() {
                    let cfg = CfgEnv::new(chain_spec.clone());
                    let block_env = BlockEnv::new(&task.block.header);
                    let delete_empty =
                        chain_spec.is_spurious_dragon_active_at_block(task.block.number);
                    let block_hash = task.block.hash();

                    for index in 0..task.block.body.len() {
                        let tx = &task.block.body[index];
                        let tx_hash = tx.hash();
                        let traced = tx
                            .as_message(task.block.base_fee_per_gas)
                            .map_err(DebugApiError::from)
                            .and_then(|message| {
                                let tx_ctx =
                                    TxContext { block_hash, tx_index: index, tx_hash };
                                trace_transaction_in_env(
                                    &message,
                                    tx_ctx,
                                    &cfg,
                                    &block_env,
                                    &mut task.state,
                                    &opts,
                                    &registry,
                                )
                            });
                        match traced {
                            Ok(frame) => {
                                task.results[index] = Some(TraceResult::success(frame))
                            }
                            Err(err) => {
                                // leave the remaining slots empty; the task
                                // is still published
                                task.results[index] =
                                    Some(TraceResult::error(err.to_string()));
                                warn!(
                                    target: "rpc::debug",
                                    %tx_hash,
                                    block = task.block.number,
                                    %err,
                                    "Tracing failed"
                                );
                                break
                            }
                        }
                        task.state.finalise(delete_empty);
                    }
                    // stream the result back or abort on teardown
                    if results_tx.blocking_send(task).is_err() {
                        return
                    }
                }
            }));
        }
        drop(tasks_rx);
        drop(results_tx);

        // feeder: prepare the parent state of every block in the range and
        // hand the tasks to the workers
        let feeder = {
            let this = self.clone();
            let trie = trie.clone();
            let deref_queue = deref_queue.clone();
            let out_tx = out_tx.clone();
            let reexec = opts.reexec.unwrap_or(DEFAULT_TRACE_REEXEC);
            tokio::task::spawn_blocking(move || {
                let begin = Instant::now();
                let mut logged = Instant::now();
                let mut traced = 0u64;
                let mut number = start_number;
                let mut base: Option<(StateDb, u64)> = None;
                let mut failed: Option<DebugApiError> = None;

                'feed: while number < end_number {
                    // stop tracing if the subscriber went away
                    if out_tx.is_closed() {
                        break
                    }
                    // return the roots the receiver has scheduled for deref
                    for root in deref_queue.lock().drain(..) {
                        trie.dereference(root);
                    }
                    if logged.elapsed() > PROGRESS_LOG_INTERVAL {
                        logged = Instant::now();
                        info!(
                            target: "rpc::debug",
                            start = start_number,
                            end = end_number,
                            current = number,
                            transactions = traced,
                            elapsed = ?begin.elapsed(),
                            "Tracing chain segment"
                        );
                    }
                    // retrieve the parent state to trace on top of
                    let block = match this.provider().block_by_number(number) {
                        Ok(Some(block)) => block,
                        Ok(None) => {
                            failed = Some(DebugApiError::NotFound {
                                kind: NotFoundKind::Block,
                                id: format!("#{number}"),
                            });
                            break
                        }
                        Err(err) => {
                            failed = Some(err.into());
                            break
                        }
                    };
                    let state =
                        match compute_state_at(this.provider(), &block, reexec, base.take()) {
                            Ok(state) => state,
                            Err(err) => {
                                failed = Some(err);
                                break
                            }
                        };
                    let next = match this.provider().block_by_number(number + 1) {
                        Ok(Some(next)) => next,
                        Ok(None) => {
                            failed = Some(DebugApiError::NotFound {
                                kind: NotFoundKind::Block,
                                id: format!("#{}", number + 1),
                            });
                            break
                        }
                        Err(err) => {
                            failed = Some(err.into());
                            break
                        }
                    };
                    // hold the root for the tracers; the matching unpin is
                    // the task's deref debt, drained by this loop after the
                    // task has been consumed
                    trie.reference(block.state_root, B256::ZERO);
                    let txs = next.body.len();
                    let mut task = BlockTraceTask {
                        state: state.copy(),
                        block: next,
                        rootref: DerefDebt::new(block.state_root, deref_queue.clone()),
                        results: vec![None; txs],
                    };
                    base = Some((state, number));

                    // send the block over to the concurrent tracers, backing
                    // off while the bounded queue is full and aborting on
                    // teardown
                    loop {
                        match tasks_tx.send_timeout(task, Duration::from_millis(100)) {
                            Ok(()) => break,
                            Err(SendTimeoutError::Timeout(returned)) => {
                                if out_tx.is_closed() {
                                    break 'feed
                                }
                                task = returned;
                            }
                            Err(SendTimeoutError::Disconnected(_)) => break 'feed,
                        }
                    }
                    traced += txs as u64;
                    number += 1;
                }
                FeederExit { traced, number, failed }
            })
        };

        // receiver: reorder completed blocks and stream them out by height
        let receiver = {
            let deref_queue = deref_queue.clone();
            tokio::spawn(async move {
                let mut done: HashMap<u64, BlockTraceResult> = HashMap::new();
                let mut next = start_number + 1;
                while let Some(task) = results_rx.recv().await {
                    let BlockTraceTask { state, block, rootref, results } = task;
                    drop(state);
                    // schedule the root held for this task for dereferencing
                    drop(rootref);
                    let result = BlockTraceResult {
                        block: block.number,
                        hash: block.hash(),
                        traces: results,
                    };
                    done.insert(result.block, result);
                    while let Some(result) = done.remove(&next) {
                        let is_final = next == end_number;
                        next += 1;
                        // suppress empty blocks mid-stream; the final block
                        // is always emitted to terminate the stream
                        if result.traces.is_empty() && !is_final {
                            continue
                        }
                        if out_tx.send(result).await.is_err() {
                            return
                        }
                    }
                }
            })
        };

        // supervisor: await all roles, then settle the remaining pins and
        // log the terminal state
        tokio::spawn(async move {
            let begin = Instant::now();
            let exit = match feeder.await {
                Ok(exit) => exit,
                Err(err) => {
                    warn!(target: "rpc::debug", %err, "Chain trace feeder panicked");
                    FeederExit { traced: 0, number: start_number, failed: None }
                }
            };
            for worker in workers {
                let _ = worker.await;
            }
            let _ = receiver.await;

            // every task has been consumed or dropped by now, so all
            // outstanding deref debt is queued; return it
            for root in deref_queue.lock().drain(..) {
                trie.dereference(root);
            }

            match &exit.failed {
                Some(err) => warn!(
                    target: "rpc::debug",
                    start = start_number,
                    end = end_number,
                    transactions = exit.traced,
                    elapsed = ?begin.elapsed(),
                    %err,
                    "Chain tracing failed"
                ),
                None if exit.number < end_number => warn!(
                    target: "rpc::debug",
                    start = start_number,
                    end = end_number,
                    abort = exit.number,
                    transactions = exit.traced,
                    elapsed = ?begin.elapsed(),
                    "Chain tracing aborted"
                ),
                None => info!(
                    target: "rpc::debug",
                    start = start_number,
                    end = end_number,
                    transactions = exit.traced,
                    elapsed = ?begin.elapsed(),
                    "Chain tracing finished"
                ),
            }
        });

        ReceiverStream::new(out_rx)
    }
}

/// Forwards every stream item into the subscription sink, ending when the
/// stream is exhausted or the peer goes away. Dropping the stream on return
/// cancels the producing pipeline.
pub(crate) async fn pipe_to_subscription<T, St>(
    sink: SubscriptionSink,
    mut stream: St,
) -> Result<(), serde_json::Error>
where
    St: Stream<Item = T> + Unpin,
    T: Serialize,
{
    loop {
        tokio::select! {
            _ = sink.closed() => {
                // connection dropped
                break Ok(())
            }
            maybe_item = stream.next() => {
                let Some(item) = maybe_item else {
                    // stream ended
                    break Ok(())
                };
                let msg = SubscriptionMessage::new(
                    sink.method_name(),
                    sink.subscription_id(),
                    &item,
                )?;
                if sink.send(msg).await.is_err() {
                    break Ok(())
                }
            }
        }
    }
}
