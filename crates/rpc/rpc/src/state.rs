//! Historical-state regeneration.

use crate::error::{DebugApiError, NotFoundKind};
use retrace_evm::{execute, execute_block, tracers::Tracer, BlockEnv, CfgEnv};
use retrace_primitives::{BlockNumber, SealedBlock};
use retrace_provider::{BlockReader, ChainSpecProvider, StateProviderFactory};
use retrace_state::StateDb;
use std::time::{Duration, Instant};
use tracing::info;

/// Minimum elapsed time between liveness logs of long-running operations.
pub(crate) const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(8);

/// Produces a snapshot of the state after executing `block`.
///
/// Tries to open the block's state root directly; when it was pruned, finds
/// a base — the caller-provided snapshot, or the nearest ancestor whose root
/// is still resolvable within `reexec` steps — and replays forward block by
/// block, keeping exactly one regenerated root pinned at a time.
///
/// `base` is a snapshot at some ancestor height, typically threaded through
/// by the chain feeder so steady-state regeneration replays a single block.
pub(crate) fn compute_state_at<Provider>(
    provider: &Provider,
    block: &SealedBlock,
    reexec: u64,
    base: Option<(StateDb, BlockNumber)>,
) -> Result<StateDb, DebugApiError>
where
    Provider: BlockReader + StateProviderFactory + ChainSpecProvider,
{
    // If we have the state fully available, use that.
    match provider.state_at(block.state_root) {
        Ok(state) => return Ok(state),
        Err(err) if err.is_state_unavailable() => {}
        Err(err) => return Err(err.into()),
    }

    let (mut state, mut number) = match base {
        Some((state, number)) if number < block.number => (state, number),
        _ => find_base(provider, block, reexec)?,
    };

    // State was available at a historical point, regenerate.
    let chain_spec = provider.chain_spec();
    let start = Instant::now();
    let mut logged = Instant::now();
    let origin = block.number;
    while number < origin {
        if logged.elapsed() > PROGRESS_LOG_INTERVAL {
            info!(
                target: "rpc::debug",
                block = number + 1,
                target_block = origin,
                remaining = origin - number - 1,
                elapsed = ?start.elapsed(),
                "Regenerating historical state"
            );
            logged = Instant::now();
        }
        number += 1;
        let next = provider.block_by_number(number)?.ok_or_else(|| DebugApiError::NotFound {
            kind: NotFoundKind::Block,
            id: format!("#{number}"),
        })?;
        execute_block(&mut state, &next, &chain_spec)
            .map_err(|source| DebugApiError::ReplayFailed { number, source })?;
        let root = state.commit()?;
        // rebinding pins the fresh root and releases the previous one
        state.reset(root)?;
    }
    info!(
        target: "rpc::debug",
        block = origin,
        elapsed = ?start.elapsed(),
        nodes = provider.trie_db().cached_nodes(),
        "Historical state regenerated"
    );
    Ok(state)
}

/// Walks ancestors of `block` until a resolvable state root is found.
fn find_base<Provider>(
    provider: &Provider,
    block: &SealedBlock,
    reexec: u64,
) -> Result<(StateDb, BlockNumber), DebugApiError>
where
    Provider: BlockReader + StateProviderFactory,
{
    let mut current = block.clone();
    for _ in 0..reexec {
        let Some(parent) = provider.block_by_hash(current.parent_hash)? else { break };
        match provider.state_at(parent.state_root) {
            Ok(state) => return Ok((state, parent.number)),
            Err(err) if err.is_state_unavailable() => current = parent,
            Err(err) => return Err(err.into()),
        }
    }
    Err(DebugApiError::HistoricalStateUnavailable { reexec })
}

/// Replays the block's transactions in order, untraced, up to (and
/// excluding) `tx_index`, finalising after each so the snapshot advances
/// exactly as it did historically.
pub(crate) fn replay_transactions_until(
    state: &mut StateDb,
    cfg: &CfgEnv,
    block_env: &BlockEnv,
    block: &SealedBlock,
    tx_index: usize,
) -> Result<(), DebugApiError> {
    let delete_empty = cfg.chain_spec.is_spurious_dragon_active_at_block(block.number);
    for (index, tx) in block.body.iter().take(tx_index).enumerate() {
        let message = tx.as_message(block.base_fee_per_gas)?;
        state.prepare(tx.hash(), index);
        execute(&message, state, cfg, block_env, &mut Tracer::noop()).map_err(|source| {
            DebugApiError::ReplayFailed {
                number: block.number,
                source: retrace_evm::BlockExecutionError::Transaction { index, source },
            }
        })?;
        state.finalise(delete_empty);
    }
    Ok(())
}
