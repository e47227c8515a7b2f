//! Program builders and state fixtures for exercising the executor.

use crate::OpCode;
use retrace_primitives::{Address, Bytes, U256};
use retrace_state::{StateDb, TrieDb};
use std::sync::Arc;

/// A committed snapshot holding the given balances.
pub fn funded_state(balances: &[(Address, u64)]) -> StateDb {
    let mut state = StateDb::empty(Arc::new(TrieDb::new()));
    for (address, balance) in balances {
        state.add_balance(*address, U256::from(*balance)).expect("state is resolvable");
    }
    let root = state.commit().expect("fresh state commits");
    state.reset(root).expect("committed root is resolvable");
    state
}

/// A program that halts immediately.
pub fn stop_program() -> Bytes {
    Bytes::from_static(&[OpCode::Stop as u8])
}

/// `PUSH1 a PUSH1 b ADD STOP`
pub fn add_program(a: u8, b: u8) -> Bytes {
    Bytes::from(vec![
        OpCode::Push1 as u8,
        a,
        OpCode::Push1 as u8,
        b,
        OpCode::Add as u8,
        OpCode::Stop as u8,
    ])
}

/// A program reverting with the given payload (at most 32 bytes).
pub fn revert_program(payload: &[u8]) -> Bytes {
    memory_halt_program(OpCode::Revert, payload)
}

/// A program returning the given payload (at most 32 bytes).
pub fn return_program(payload: &[u8]) -> Bytes {
    memory_halt_program(OpCode::Return, payload)
}

/// `PUSH1 value PUSH1 slot SSTORE STOP`
pub fn sstore_program(slot: u8, value: u8) -> Bytes {
    Bytes::from(vec![
        OpCode::Push1 as u8,
        value,
        OpCode::Push1 as u8,
        slot,
        OpCode::Sstore as u8,
        OpCode::Stop as u8,
    ])
}

/// `PUSH1 slot SLOAD STOP`
pub fn sload_program(slot: u8) -> Bytes {
    Bytes::from(vec![OpCode::Push1 as u8, slot, OpCode::Sload as u8, OpCode::Stop as u8])
}

/// A program that jumps back to its start forever. Untraced execution ends
/// by running out of gas; traced execution keeps stepping until stopped.
pub fn loop_program() -> Bytes {
    Bytes::from(vec![OpCode::Jumpdest as u8, OpCode::Push1 as u8, 0, OpCode::Jump as u8])
}

fn memory_halt_program(op: OpCode, payload: &[u8]) -> Bytes {
    assert!(payload.len() <= 32, "payload must fit one memory word");
    let mut word = [0u8; 32];
    word[..payload.len()].copy_from_slice(payload);

    let mut code = Vec::with_capacity(41);
    code.push(OpCode::Push32 as u8);
    code.extend_from_slice(&word);
    code.push(OpCode::Push1 as u8);
    code.push(0); // store offset
    code.push(OpCode::Mstore as u8);
    code.push(OpCode::Push1 as u8);
    code.push(payload.len() as u8);
    code.push(OpCode::Push1 as u8);
    code.push(0); // output offset
    code.push(op as u8);
    code.into()
}
