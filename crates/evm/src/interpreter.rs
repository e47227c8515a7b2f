use crate::{
    tracers::{Step, Tracer},
    EvmError,
};
use retrace_state::StateDb;
use retrace_primitives::{Address, Bytes, StorageKey, B256, U256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

const GAS_VERYLOW: u64 = 3;
const GAS_JUMPDEST: u64 = 1;
const GAS_SLOAD: u64 = 200;
const GAS_COLD_SLOAD: u64 = 2100;
const GAS_WARM_SLOAD: u64 = 100;
const GAS_SSTORE: u64 = 5000;

const STACK_LIMIT: usize = 1024;
const MEMORY_LIMIT: usize = 1 << 16;

/// The instruction set executed over transaction payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Halt execution successfully.
    Stop = 0x00,
    /// Pop two words, push their wrapping sum.
    Add = 0x01,
    /// Pop two words, push their wrapping product.
    Mul = 0x02,
    /// Pop a word.
    Pop = 0x50,
    /// Pop offset and value, write the value as a 32-byte word to memory.
    Mstore = 0x52,
    /// Pop a key, push the storage slot's value.
    Sload = 0x54,
    /// Pop key and value, write the storage slot.
    Sstore = 0x55,
    /// Pop a destination and continue there; the target must be a JUMPDEST.
    Jump = 0x56,
    /// Valid jump target; otherwise a no-op.
    Jumpdest = 0x5b,
    /// Push the next byte of code.
    Push1 = 0x60,
    /// Push the next 32 bytes of code.
    Push32 = 0x7f,
    /// Duplicate the top of the stack.
    Dup1 = 0x80,
    /// Pop offset and length, halt returning that memory range.
    Return = 0xf3,
    /// Pop offset and length, revert with that memory range as payload.
    Revert = 0xfd,
}

impl OpCode {
    /// Decodes an opcode byte.
    pub const fn new(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Self::Stop,
            0x01 => Self::Add,
            0x02 => Self::Mul,
            0x50 => Self::Pop,
            0x52 => Self::Mstore,
            0x54 => Self::Sload,
            0x55 => Self::Sstore,
            0x56 => Self::Jump,
            0x5b => Self::Jumpdest,
            0x60 => Self::Push1,
            0x7f => Self::Push32,
            0x80 => Self::Dup1,
            0xf3 => Self::Return,
            0xfd => Self::Revert,
            _ => return None,
        };
        Some(op)
    }

    /// The mnemonic, as emitted in struct logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Add => "ADD",
            Self::Mul => "MUL",
            Self::Pop => "POP",
            Self::Mstore => "MSTORE",
            Self::Sload => "SLOAD",
            Self::Sstore => "SSTORE",
            Self::Jump => "JUMP",
            Self::Jumpdest => "JUMPDEST",
            Self::Push1 => "PUSH1",
            Self::Push32 => "PUSH32",
            Self::Dup1 => "DUP1",
            Self::Return => "RETURN",
            Self::Revert => "REVERT",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the interpreter halted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Halt {
    /// Ran to completion via STOP or end of code.
    Stop,
    /// Returned data via RETURN.
    Return,
    /// Reverted via REVERT; the output holds the revert payload.
    Revert,
    /// Ran out of gas.
    OutOfGas,
    /// Jumped to a non-JUMPDEST destination.
    InvalidJump,
    /// Popped an empty stack.
    StackUnderflow,
    /// Exceeded the stack limit.
    StackOverflow,
    /// Hit a byte that is not an instruction.
    InvalidOpcode(u8),
}

impl Halt {
    /// Returns `true` when the run did not complete successfully.
    pub const fn is_failure(&self) -> bool {
        !matches!(self, Self::Stop | Self::Return)
    }

    /// The error string reported for failed runs.
    pub fn error_message(&self) -> Option<String> {
        let message = match self {
            Self::Stop | Self::Return => return None,
            Self::Revert => "execution reverted".to_string(),
            Self::OutOfGas => "out of gas".to_string(),
            Self::InvalidJump => "invalid jump destination".to_string(),
            Self::StackUnderflow => "stack underflow".to_string(),
            Self::StackOverflow => "stack limit reached".to_string(),
            Self::InvalidOpcode(byte) => format!("invalid opcode: {byte:#04x}"),
        };
        Some(message)
    }
}

pub(crate) struct InterpreterResult {
    pub(crate) gas_remaining: u64,
    pub(crate) output: Bytes,
    pub(crate) halt: Halt,
}

/// Executes one message payload against a state snapshot.
pub(crate) struct Interpreter<'a> {
    code: &'a [u8],
    pc: usize,
    gas: u64,
    stack: Vec<U256>,
    memory: Vec<u8>,
    /// The executing contract.
    address: Address,
    /// Slots read or written by this run, surfaced to tracers.
    storage: BTreeMap<B256, U256>,
    warm_slots: HashSet<StorageKey>,
    berlin: bool,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(code: &'a [u8], gas: u64, address: Address, berlin: bool) -> Self {
        Self {
            code,
            pc: 0,
            gas,
            stack: Vec::new(),
            memory: Vec::new(),
            address,
            storage: BTreeMap::new(),
            warm_slots: HashSet::new(),
            berlin,
        }
    }

    pub(crate) fn run(
        mut self,
        state: &mut StateDb,
        tracer: &mut Tracer,
    ) -> Result<InterpreterResult, EvmError> {
        loop {
            // a stop aborts the run at the next instruction boundary
            if let Some(reason) = tracer.interrupted() {
                return Err(EvmError::Aborted { reason })
            }
            let Some(&byte) = self.code.get(self.pc) else {
                return Ok(self.halt(Halt::Stop, Bytes::new()))
            };
            let Some(op) = OpCode::new(byte) else {
                return Ok(self.fault(tracer, Halt::InvalidOpcode(byte)))
            };

            let cost = self.cost(op, state);
            self.step(tracer, op, cost);

            if cost > self.gas {
                return Ok(self.fault(tracer, Halt::OutOfGas))
            }
            self.gas -= cost;

            match op {
                OpCode::Stop => return Ok(self.halt(Halt::Stop, Bytes::new())),
                OpCode::Add | OpCode::Mul => {
                    let Some((a, b)) = self.pop2() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let value = match op {
                        OpCode::Add => a.wrapping_add(b),
                        _ => a.wrapping_mul(b),
                    };
                    if !self.push(value) {
                        return Ok(self.fault(tracer, Halt::StackOverflow))
                    }
                    self.pc += 1;
                }
                OpCode::Pop => {
                    if self.stack.pop().is_none() {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    }
                    self.pc += 1;
                }
                OpCode::Mstore => {
                    let Some((offset, value)) = self.pop2() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let Some(offset) = checked_offset(offset, 32) else {
                        return Ok(self.fault(tracer, Halt::OutOfGas))
                    };
                    self.expand_memory(offset + 32);
                    self.memory[offset..offset + 32]
                        .copy_from_slice(&value.to_be_bytes::<32>());
                    self.pc += 1;
                }
                OpCode::Sload => {
                    let Some(key) = self.stack.pop() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let key = StorageKey::from(key.to_be_bytes::<32>());
                    self.warm_slots.insert(key);
                    let value = state.storage(self.address, key)?;
                    self.storage.insert(key, value);
                    if !self.push(value) {
                        return Ok(self.fault(tracer, Halt::StackOverflow))
                    }
                    self.pc += 1;
                }
                OpCode::Sstore => {
                    let Some((key, value)) = self.pop2() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let key = StorageKey::from(key.to_be_bytes::<32>());
                    self.warm_slots.insert(key);
                    state.set_storage(self.address, key, value)?;
                    self.storage.insert(key, value);
                    self.pc += 1;
                }
                OpCode::Jump => {
                    let Some(dest) = self.stack.pop() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let Some(dest) = checked_offset(dest, 0) else {
                        return Ok(self.fault(tracer, Halt::InvalidJump))
                    };
                    if self.code.get(dest) != Some(&(OpCode::Jumpdest as u8)) {
                        return Ok(self.fault(tracer, Halt::InvalidJump))
                    }
                    self.pc = dest;
                }
                OpCode::Jumpdest => {
                    self.pc += 1;
                }
                OpCode::Push1 => {
                    let value = self.code.get(self.pc + 1).copied().unwrap_or_default();
                    if !self.push(U256::from(value)) {
                        return Ok(self.fault(tracer, Halt::StackOverflow))
                    }
                    self.pc += 2;
                }
                OpCode::Push32 => {
                    let mut word = [0u8; 32];
                    let start = (self.pc + 1).min(self.code.len());
                    let end = (self.pc + 33).min(self.code.len());
                    word[..end - start].copy_from_slice(&self.code[start..end]);
                    if !self.push(U256::from_be_bytes(word)) {
                        return Ok(self.fault(tracer, Halt::StackOverflow))
                    }
                    self.pc += 33;
                }
                OpCode::Dup1 => {
                    let Some(&top) = self.stack.last() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    if !self.push(top) {
                        return Ok(self.fault(tracer, Halt::StackOverflow))
                    }
                    self.pc += 1;
                }
                OpCode::Return | OpCode::Revert => {
                    let Some((offset, len)) = self.pop2() else {
                        return Ok(self.fault(tracer, Halt::StackUnderflow))
                    };
                    let (Some(offset), Some(len)) =
                        (checked_offset(offset, 0), checked_offset(len, 0))
                    else {
                        return Ok(self.fault(tracer, Halt::OutOfGas))
                    };
                    if offset.saturating_add(len) > MEMORY_LIMIT {
                        return Ok(self.fault(tracer, Halt::OutOfGas))
                    }
                    self.expand_memory(offset + len);
                    let output = Bytes::copy_from_slice(&self.memory[offset..offset + len]);
                    if op == OpCode::Revert {
                        return Ok(self.fault_with_output(tracer, Halt::Revert, output))
                    }
                    return Ok(self.halt(Halt::Return, output))
                }
            }
        }
    }

    fn cost(&self, op: OpCode, state: &StateDb) -> u64 {
        match op {
            OpCode::Jumpdest => GAS_JUMPDEST,
            OpCode::Sload => {
                if !self.berlin {
                    return GAS_SLOAD
                }
                let warm = state.is_warm_address(self.address) ||
                    self.peek_slot().is_some_and(|key| self.warm_slots.contains(&key));
                if warm {
                    GAS_WARM_SLOAD
                } else {
                    GAS_COLD_SLOAD
                }
            }
            OpCode::Sstore => GAS_SSTORE,
            _ => GAS_VERYLOW,
        }
    }

    /// The storage key an SLOAD/SSTORE at the current step would touch.
    fn peek_slot(&self) -> Option<StorageKey> {
        self.stack.last().map(|key| StorageKey::from(key.to_be_bytes::<32>()))
    }

    fn step(&self, tracer: &mut Tracer, op: OpCode, cost: u64) {
        tracer.capture_state(&Step {
            pc: self.pc as u64,
            op,
            gas: self.gas,
            cost,
            depth: 1,
            stack: &self.stack,
            memory: &self.memory,
            storage: &self.storage,
        });
    }

    fn fault(&mut self, tracer: &mut Tracer, halt: Halt) -> InterpreterResult {
        self.fault_with_output(tracer, halt, Bytes::new())
    }

    fn fault_with_output(
        &mut self,
        tracer: &mut Tracer,
        halt: Halt,
        output: Bytes,
    ) -> InterpreterResult {
        if let Some(message) = halt.error_message() {
            tracer.capture_fault(&message);
        }
        // exceptional halts consume all remaining gas; reverts keep it
        if halt != Halt::Revert {
            self.gas = 0;
        }
        InterpreterResult { gas_remaining: self.gas, output, halt }
    }

    fn halt(self, halt: Halt, output: Bytes) -> InterpreterResult {
        InterpreterResult { gas_remaining: self.gas, output, halt }
    }

    fn push(&mut self, value: U256) -> bool {
        if self.stack.len() >= STACK_LIMIT {
            return false
        }
        self.stack.push(value);
        true
    }

    fn pop2(&mut self) -> Option<(U256, U256)> {
        let first = self.stack.pop()?;
        let second = self.stack.pop()?;
        Some((first, second))
    }

    fn expand_memory(&mut self, size: usize) {
        if self.memory.len() < size {
            self.memory.resize(size, 0);
        }
    }
}

fn checked_offset(value: U256, extra: usize) -> Option<usize> {
    let value = usize::try_from(value).ok()?;
    (value.saturating_add(extra) <= MEMORY_LIMIT).then_some(value)
}
