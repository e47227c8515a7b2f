use crate::{
    interpreter::Interpreter,
    tracers::Tracer,
    BlockExecutionError, BlockEnv, CfgEnv, EvmError, Halt,
};
use retrace_primitives::{Bytes, ChainSpec, Message, SealedBlock, TxKind, U256};
use retrace_state::StateDb;
use std::sync::Arc;

/// Flat gas charged for any transaction.
pub const INTRINSIC_GAS: u64 = 21_000;
/// Gas charged per byte of transaction input.
pub const CALLDATA_GAS: u64 = 16;

/// The outcome of applying one message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Total gas consumed, including the intrinsic cost.
    pub gas_used: u64,
    /// The produced output; the revert payload when the run reverted.
    pub output: Bytes,
    /// Why the run ended.
    pub halt: Halt,
}

impl ExecutionResult {
    /// Returns `true` when the run reverted or halted exceptionally.
    pub const fn failed(&self) -> bool {
        self.halt.is_failure()
    }

    /// Returns `true` when the run reverted.
    pub const fn reverted(&self) -> bool {
        matches!(self.halt, Halt::Revert)
    }
}

/// Applies one message to the snapshot under the given environment,
/// reporting execution to the tracer.
///
/// Engine-level validity failures (bad nonce, unpayable gas, fee cap under
/// the base fee) return an error; a reverted or exceptionally halted run is
/// a successful application whose [`ExecutionResult::failed`] is set.
pub fn execute(
    message: &Message,
    state: &mut StateDb,
    cfg: &CfgEnv,
    block: &BlockEnv,
    tracer: &mut Tracer,
) -> Result<ExecutionResult, EvmError> {
    if !cfg.no_base_fee && message.fee_cap < block.base_fee {
        return Err(EvmError::FeeCapTooLow)
    }

    let nonce = state.nonce(message.from)?;
    if message.nonce < nonce {
        return Err(EvmError::NonceTooLow { expected: nonce, got: message.nonce })
    }
    if message.nonce > nonce {
        return Err(EvmError::NonceTooHigh { expected: nonce, got: message.nonce })
    }

    let intrinsic = INTRINSIC_GAS + CALLDATA_GAS * message.input.len() as u64;
    if message.gas_limit < intrinsic {
        return Err(EvmError::IntrinsicGasTooLow)
    }

    let gas_cost = U256::from(message.gas_limit as u128 * message.gas_price as u128);
    if state.balance(message.from)? < gas_cost.saturating_add(message.value) {
        return Err(EvmError::InsufficientFunds)
    }
    state.sub_balance(message.from, gas_cost)?;
    state.set_nonce(message.from, nonce + 1)?;

    for address in &message.access_list {
        state.warm_address(*address);
    }

    let (address, create) = match message.to {
        TxKind::Call(to) => (to, false),
        TxKind::Create => (message.from.create(nonce), true),
    };
    state.touch(address)?;

    tracer.capture_start(
        message.from,
        address,
        create,
        &message.input,
        message.gas_limit,
        message.value,
    );

    let berlin = cfg.chain_spec.is_berlin_active_at_block(block.number);
    let interpreter =
        Interpreter::new(&message.input, message.gas_limit - intrinsic, address, berlin);
    let result = interpreter.run(state, tracer)?;

    if !result.halt.is_failure() {
        state.sub_balance(message.from, message.value)?;
        state.add_balance(address, message.value)?;
    }

    let gas_used = message.gas_limit - result.gas_remaining;
    let refund = U256::from(result.gas_remaining as u128 * message.gas_price as u128);
    state.add_balance(message.from, refund)?;
    let fee = U256::from(gas_used as u128 * message.gas_price as u128);
    state.add_balance(block.beneficiary, fee)?;

    let err = result.halt.error_message();
    tracer.capture_end(&result.output, gas_used, err.as_deref());

    Ok(ExecutionResult { gas_used, output: result.output, halt: result.halt })
}

/// Replays all transactions of a block, untraced, finalising after each.
///
/// Used to advance a snapshot during state regeneration; any transaction
/// failure is fatal and carries the offending index.
pub fn execute_block(
    state: &mut StateDb,
    block: &SealedBlock,
    chain_spec: &Arc<ChainSpec>,
) -> Result<(), BlockExecutionError> {
    let cfg = CfgEnv::new(chain_spec.clone());
    let block_env = BlockEnv::new(&block.header);
    let delete_empty = chain_spec.is_spurious_dragon_active_at_block(block.number);

    for (index, tx) in block.body.iter().enumerate() {
        let message = tx.as_message(block.base_fee_per_gas)?;
        state.prepare(tx.hash(), index);
        let mut tracer = Tracer::noop();
        execute(&message, state, &cfg, &block_env, &mut tracer)
            .map_err(|source| BlockExecutionError::Transaction { index, source })?;
        state.finalise(delete_empty);
    }
    Ok(())
}
