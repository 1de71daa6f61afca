//! Decode and execute a binary program image.
//!
//! The VM owns no memory. The host supplies the image bytes (validated by
//! [`Program::decode`]) and one working buffer that is split into the
//! globals region followed by the working stack. All addressing is
//! index-based: a [`VmPointer`] address counts value slots from the buffer
//! base, a frame's slot base counts from the same origin.

use crate::error::DecodeError;
use crate::program::opcode::OpCode;
use crate::program::Program;
use crate::value::{DataType, Value, VarScope, VmPointer};
use crate::vm::{NativeContext, ResolverFn, VmStatus};

/// Call-frame record size in value slots: enclosing, ip, slots.
pub const FRAME_SIZE: usize = 3;

/// Sentinel for "no enclosing frame".
const NO_FRAME: u32 = u32::MAX;

/// The live call frame. A snapshot of this record is pushed onto the working
/// stack by `OP_FRAME` and restored by `OP_RETURN`.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Stack slot index of the enclosing frame's snapshot, or `NO_FRAME`.
    pub enclosing: u32,
    /// Instruction pointer within the code section.
    pub ip: usize,
    /// First argument slot of the current call.
    pub slots: usize,
}

pub struct Vm<'a> {
    program: Program<'a>,
    /// Globals followed by the working stack.
    stack: &'a mut [Value],
    globals_len: usize,
    sp: usize,
    frame: Frame,
    status: VmStatus,
    resolver: Option<ResolverFn>,
}

impl<'a> Vm<'a> {
    /// Validate `data` and lay the globals region out at the base of
    /// `stack`. The stack buffer must at least hold the globals plus one
    /// call frame.
    pub fn decode(data: &'a [u8], stack: &'a mut [Value]) -> Result<Vm<'a>, DecodeError> {
        let program = Program::decode(data)?;
        Self::new(program, stack)
    }

    pub fn new(program: Program<'a>, stack: &'a mut [Value]) -> Result<Vm<'a>, DecodeError> {
        let globals_len = program.globals_slots();
        if stack.len() < globals_len + FRAME_SIZE + 1 {
            return Err(DecodeError::StackTooSmall);
        }

        stack.fill(Value::ZERO);

        let mut vm = Vm {
            program,
            stack,
            globals_len,
            sp: 0,
            frame: Frame {
                enclosing: NO_FRAME,
                ip: 0,
                slots: 0,
            },
            status: VmStatus::Ok,
            resolver: None,
        };
        vm.reset();
        Ok(vm)
    }

    /// Install the host's native-function resolver.
    pub fn set_native_resolver(&mut self, resolver: ResolverFn) {
        self.resolver = Some(resolver);
    }

    pub fn status(&self) -> VmStatus {
        self.status
    }

    /// Host-initiated cancellation; takes effect before the next dispatch.
    pub fn stop(&mut self) {
        self.status = VmStatus::Stop;
    }

    pub fn reset(&mut self) {
        self.sp = self.globals_len;
        self.frame = Frame {
            enclosing: NO_FRAME,
            ip: 0,
            slots: self.globals_len,
        };
    }

    /// The globals region, for host inspection.
    pub fn globals(&self) -> &[Value] {
        &self.stack[..self.globals_len]
    }

    /// Fetch-decode-execute until `OP_END`, an error, or a host stop.
    pub fn run(&mut self, mut sys: Option<&mut dyn std::any::Any>) -> VmStatus {
        let program = self.program;
        let code = program.code();

        if code.is_empty() {
            self.status = VmStatus::NoProgramLoaded;
            return self.status;
        }

        self.status = VmStatus::Ok;
        self.reset();

        loop {
            if self.status != VmStatus::Ok {
                break;
            }

            let Some(&instruction) = code.get(self.frame.ip) else {
                self.status = VmStatus::UnknownInstruction;
                break;
            };
            self.frame.ip += 1;

            let Some(op) = OpCode::from_u8(instruction) else {
                self.status = VmStatus::UnknownInstruction;
                break;
            };

            match op {
                OpCode::Nop => {}

                // ===== Slots =====
                OpCode::Push => self.push(Value::from_i32(0)),
                OpCode::PushN => {
                    let n = self.read_byte(code) as usize;
                    self.push_n(n);
                }
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::PopN => {
                    let n = self.read_byte(code) as usize;
                    self.pop_n(n);
                }

                OpCode::Duplicate => {
                    let top = self.peek(1);
                    self.push(top);
                }
                OpCode::Duplicate2 => {
                    self.push(self.peek(2));
                    self.push(self.peek(2));
                }

                // ===== Constants =====
                OpCode::Nil => self.push(Value::from_i32(0)),
                OpCode::False => self.push(Value::from_bool(false)),
                OpCode::True => self.push(Value::from_bool(true)),

                OpCode::Constant => {
                    let index = self.read_byte(code) as usize;
                    self.push(program.constant(index));
                }
                OpCode::Constant16 => {
                    let index = self.read_u16(code) as usize;
                    self.push(program.constant(index));
                }
                OpCode::Constant24 => {
                    let index = self.read_u24(code) as usize;
                    self.push(program.constant(index));
                }

                OpCode::String => {
                    let offset = self.read_byte(code) as u32;
                    self.push(Value::from_u32(offset));
                }
                OpCode::String16 => {
                    let offset = self.read_u16(code) as u32;
                    self.push(Value::from_u32(offset));
                }
                OpCode::String24 => {
                    let offset = self.read_u24(code);
                    self.push(Value::from_u32(offset));
                }

                // ===== Arrays =====
                OpCode::Array => {
                    let size = self.read_u16(code) as usize;
                    self.push_n(size);
                }

                OpCode::GetIndexedS8 => {
                    let (slot, lane) = self.indexed_slot(2, 0x03);
                    let data = self.load(slot).char_at(lane) as i32;
                    self.push(Value::from_i32(data));
                }
                OpCode::GetIndexedU8 => {
                    let (slot, lane) = self.indexed_slot(2, 0x03);
                    let data = self.load(slot).byte_at(lane) as i32;
                    self.push(Value::from_i32(data));
                }
                OpCode::GetIndexedS16 => {
                    let (slot, lane) = self.indexed_slot(1, 0x01);
                    let data = self.load(slot).short_at(lane) as i32;
                    self.push(Value::from_i32(data));
                }
                OpCode::GetIndexedU16 => {
                    let (slot, lane) = self.indexed_slot(1, 0x01);
                    let data = self.load(slot).ushort_at(lane) as i32;
                    self.push(Value::from_i32(data));
                }
                OpCode::GetIndexedS32 | OpCode::GetIndexedU32 | OpCode::GetIndexedFloat => {
                    let (slot, _) = self.indexed_slot(0, 0);
                    let data = self.load(slot);
                    self.push(data);
                }

                OpCode::SetIndexedS8 => {
                    let value = self.pop();
                    let (slot, lane) = self.indexed_slot(2, 0x03);
                    self.modify(slot, |w| w.set_char_at(lane, value.as_i8()));
                    self.push(value);
                }
                OpCode::SetIndexedU8 => {
                    let value = self.pop();
                    let (slot, lane) = self.indexed_slot(2, 0x03);
                    self.modify(slot, |w| w.set_byte_at(lane, value.as_u8()));
                    self.push(value);
                }
                OpCode::SetIndexedS16 => {
                    let value = self.pop();
                    let (slot, lane) = self.indexed_slot(1, 0x01);
                    self.modify(slot, |w| w.set_short_at(lane, value.as_i16()));
                    self.push(value);
                }
                OpCode::SetIndexedU16 => {
                    let value = self.pop();
                    let (slot, lane) = self.indexed_slot(1, 0x01);
                    self.modify(slot, |w| w.set_ushort_at(lane, value.as_u16()));
                    self.push(value);
                }
                OpCode::SetIndexedS32 | OpCode::SetIndexedU32 | OpCode::SetIndexedFloat => {
                    let value = self.pop();
                    let (slot, _) = self.indexed_slot(0, 0);
                    self.store(slot, value);
                    self.push(value);
                }

                // ===== Variables =====
                OpCode::GetVariable => {
                    let ptr = self.pop().as_pointer();
                    let slot = self.resolve_pointer(ptr);
                    let data = self.load(slot);
                    self.push(data);
                }
                OpCode::SetVariable | OpCode::Assign => {
                    let ptr = self.pop().as_pointer();
                    let operand = self.peek(1);
                    let slot = self.resolve_pointer(ptr);
                    self.store(slot, operand);
                }

                OpCode::AbsolutePointer => {
                    let mut ptr = self.pop().as_pointer();
                    ptr.address = self.resolve_pointer(ptr) as u16;
                    ptr.scope = VarScope::StackAbsolute;
                    self.push(Value::from_pointer(ptr));
                }

                // ===== Casts =====
                OpCode::CastIntToFloat => {
                    let value = self.pop();
                    self.push(Value::from_f32(value.as_i32() as f32));
                }
                OpCode::CastPrevIntToFloat => {
                    if self.sp >= self.globals_len + 2 {
                        let prev = self.stack[self.sp - 2];
                        self.stack[self.sp - 2] = Value::from_f32(prev.as_i32() as f32);
                    }
                }
                OpCode::CastFloatToInt => {
                    let value = self.pop();
                    self.push(Value::from_i32(value.as_f32() as i32));
                }
                OpCode::CastPrevFloatToInt => {
                    if self.sp >= self.globals_len + 2 {
                        let prev = self.stack[self.sp - 2];
                        self.stack[self.sp - 2] = Value::from_i32(prev.as_f32() as i32);
                    }
                }

                // ===== Unary =====
                OpCode::NegateI => {
                    let value = self.pop();
                    self.push(Value::from_i32(value.as_i32().wrapping_neg()));
                }
                OpCode::NegateF => {
                    let value = self.pop();
                    self.push(Value::from_f32(-value.as_f32()));
                }
                OpCode::BitNot => {
                    let value = self.pop();
                    self.push(Value::from_i32(!value.as_i32()));
                }

                OpCode::PrefixDecrease => {
                    let ptr = self.pop().as_pointer();
                    self.step_value(ptr, -1, true);
                }
                OpCode::PrefixIncrease => {
                    let ptr = self.pop().as_pointer();
                    self.step_value(ptr, 1, true);
                }
                OpCode::MinusMinus => {
                    let ptr = self.pop().as_pointer();
                    self.step_value(ptr, -1, false);
                }
                OpCode::PlusPlus => {
                    let ptr = self.pop().as_pointer();
                    self.step_value(ptr, 1, false);
                }

                // ===== Arithmetic =====
                OpCode::AddS => self.binary_i32(|a, b| a.wrapping_add(b)),
                OpCode::AddU => self.binary_u32(|a, b| a.wrapping_add(b)),
                OpCode::AddF => self.binary_f32(|a, b| a + b),
                OpCode::SubS => self.binary_i32(|a, b| a.wrapping_sub(b)),
                OpCode::SubU => self.binary_u32(|a, b| a.wrapping_sub(b)),
                OpCode::SubF => self.binary_f32(|a, b| a - b),
                OpCode::MultS => self.binary_i32(|a, b| a.wrapping_mul(b)),
                OpCode::MultU => self.binary_u32(|a, b| a.wrapping_mul(b)),
                OpCode::MultF => self.binary_f32(|a, b| a * b),
                OpCode::DivS => self.binary_i32(|a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
                OpCode::DivU => self.binary_u32(|a, b| if b == 0 { 0 } else { a / b }),
                OpCode::DivF => self.binary_f32(|a, b| a / b),
                OpCode::Modulus => {
                    self.binary_i32(|a, b| if b == 0 { 0 } else { a.wrapping_rem(b) })
                }

                // ===== Bitwise =====
                OpCode::BitAnd => self.binary_i32(|a, b| a & b),
                OpCode::BitOr => self.binary_i32(|a, b| a | b),
                OpCode::BitXor => self.binary_i32(|a, b| a ^ b),
                OpCode::BitShiftL => self.binary_i32(|a, b| a.wrapping_shl(b as u32)),
                OpCode::BitShiftR => self.binary_i32(|a, b| a.wrapping_shr(b as u32)),

                // ===== Logic =====
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::from_bool(Self::is_falsey(value)));
                }

                OpCode::EqualS => self.compare_i32(|a, b| a == b),
                OpCode::EqualU => self.compare_u32(|a, b| a == b),
                OpCode::EqualF => self.compare_f32(|a, b| a == b),
                OpCode::NotEqualS => self.compare_i32(|a, b| a != b),
                OpCode::NotEqualU => self.compare_u32(|a, b| a != b),
                OpCode::NotEqualF => self.compare_f32(|a, b| a != b),
                OpCode::LessS => self.compare_i32(|a, b| a < b),
                OpCode::LessU => self.compare_u32(|a, b| a < b),
                OpCode::LessF => self.compare_f32(|a, b| a < b),
                OpCode::LessOrEqualS => self.compare_i32(|a, b| a <= b),
                OpCode::LessOrEqualU => self.compare_u32(|a, b| a <= b),
                OpCode::LessOrEqualF => self.compare_f32(|a, b| a <= b),
                OpCode::GreaterS => self.compare_i32(|a, b| a > b),
                OpCode::GreaterU => self.compare_u32(|a, b| a > b),
                OpCode::GreaterF => self.compare_f32(|a, b| a > b),
                OpCode::GreaterOrEqualS => self.compare_i32(|a, b| a >= b),
                OpCode::GreaterOrEqualU => self.compare_u32(|a, b| a >= b),
                OpCode::GreaterOrEqualF => self.compare_f32(|a, b| a >= b),

                // ===== Control flow =====
                OpCode::Jump | OpCode::Break => {
                    let offset = self.read_u16(code) as usize;
                    self.frame.ip += offset;
                }

                OpCode::JumpIfFalse => {
                    let offset = self.read_u16(code) as usize;
                    if Self::is_falsey(self.peek(1)) {
                        self.frame.ip += offset;
                    }
                }
                OpCode::JumpIfTrue => {
                    let offset = self.read_u16(code) as usize;
                    if !Self::is_falsey(self.peek(1)) {
                        self.frame.ip += offset;
                    }
                }
                OpCode::JumpIfEqual => {
                    let offset = self.read_u16(code) as usize;
                    // Type doesn't matter; compare the bits.
                    let rhs = self.pop();
                    let lhs = self.pop();
                    if lhs.bits() == rhs.bits() {
                        self.frame.ip += offset;
                    }
                }

                OpCode::Continue | OpCode::Loop => {
                    let offset = self.read_u16(code) as usize;
                    if offset > self.frame.ip {
                        self.status = VmStatus::UnknownInstruction;
                        break;
                    }
                    self.frame.ip -= offset;
                }

                OpCode::Switch => {
                    self.exec_switch(code);
                }

                // ===== Calls =====
                OpCode::Frame => {
                    // Snapshot the current frame at the stack top.
                    let snapshot = self.sp as u32;
                    let frame = self.frame;
                    self.push(Value::from_u32(frame.enclosing));
                    self.push(Value::from_u32(frame.ip as u32));
                    self.push(Value::from_u32(frame.slots as u32));
                    self.frame.enclosing = snapshot;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte(code) as usize;
                    let func = self.peek(arg_count + 1);
                    if !self.call(code, func.as_function(), arg_count) {
                        break;
                    }
                }

                OpCode::CallNative => {
                    let arg_count = self.read_byte(code) as usize;
                    if !self.call_native(&program, arg_count, &mut sys) {
                        break;
                    }
                }

                OpCode::Return => {
                    if !self.exec_return() {
                        break;
                    }
                }

                OpCode::FunctionStart => {
                    // Function headers are jumped over by calls; hitting one
                    // by fall-through is a malformed stream.
                    self.status = VmStatus::UnknownInstruction;
                    break;
                }

                OpCode::End => {
                    self.status = VmStatus::End;
                    break;
                }
            }
        }

        self.status
    }

    // ===== Instruction readers =====

    fn read_byte(&mut self, code: &[u8]) -> u8 {
        let byte = code.get(self.frame.ip).copied().unwrap_or(0);
        self.frame.ip += 1;
        byte
    }

    fn read_u16(&mut self, code: &[u8]) -> u16 {
        let lo = self.read_byte(code) as u16;
        let hi = self.read_byte(code) as u16;
        lo | (hi << 8)
    }

    fn read_u24(&mut self, code: &[u8]) -> u32 {
        let b0 = self.read_byte(code) as u32;
        let b1 = self.read_byte(code) as u32;
        let b2 = self.read_byte(code) as u32;
        b0 | (b1 << 8) | (b2 << 16)
    }

    fn read_i32(&mut self, code: &[u8]) -> i32 {
        let b0 = self.read_byte(code) as u32;
        let b1 = self.read_byte(code) as u32;
        let b2 = self.read_byte(code) as u32;
        let b3 = self.read_byte(code) as u32;
        (b0 | (b1 << 8) | (b2 << 16) | (b3 << 24)) as i32
    }

    // ===== Stack primitives =====

    fn push(&mut self, value: Value) {
        if self.sp >= self.stack.len() {
            self.status = VmStatus::StackOverflow;
            return;
        }
        self.stack[self.sp] = value;
        self.sp += 1;
    }

    fn push_n(&mut self, count: usize) {
        if self.sp + count > self.stack.len() {
            self.status = VmStatus::StackOverflow;
            return;
        }
        self.sp += count;
    }

    fn pop(&mut self) -> Value {
        if self.sp <= self.globals_len {
            self.status = VmStatus::StackUnderflow;
            return Value::ZERO;
        }
        self.sp -= 1;
        self.stack[self.sp]
    }

    fn pop_n(&mut self, count: usize) {
        if self.sp < self.globals_len + count {
            self.status = VmStatus::StackUnderflow;
            self.sp = self.globals_len;
            return;
        }
        self.sp -= count;
    }

    fn peek(&self, distance: usize) -> Value {
        if self.sp < distance {
            return Value::ZERO;
        }
        self.stack[self.sp - distance]
    }

    fn is_falsey(value: Value) -> bool {
        // Float 0.0 shares the bit pattern of integer 0.
        value.bits() == 0
    }

    // ===== Pointer resolution =====

    /// Turn a pointer descriptor into an absolute slot index from the
    /// buffer base.
    fn resolve_pointer(&mut self, pointer: VmPointer) -> usize {
        let slot = match pointer.scope {
            VarScope::StackAbsolute | VarScope::Global => pointer.address as usize,
            VarScope::Local => self.frame.slots + pointer.address as usize,
            VarScope::Field => {
                // `this` lives in frame slot 0 and is stack-absolute.
                let this_slot = self.frame.slots;
                if this_slot >= self.stack.len() {
                    self.status = VmStatus::UnknownFieldScope;
                    return 0;
                }
                let this = self.stack[this_slot].as_pointer();
                this.address.wrapping_add(pointer.address) as usize
            }
        };
        slot
    }

    fn load(&mut self, slot: usize) -> Value {
        match self.stack.get(slot) {
            Some(value) => *value,
            None => {
                self.status = VmStatus::StackOverflow;
                Value::ZERO
            }
        }
    }

    fn store(&mut self, slot: usize, value: Value) {
        match self.stack.get_mut(slot) {
            Some(cell) => *cell = value,
            None => self.status = VmStatus::StackOverflow,
        }
    }

    fn modify(&mut self, slot: usize, f: impl FnOnce(&mut Value)) {
        match self.stack.get_mut(slot) {
            Some(cell) => f(cell),
            None => self.status = VmStatus::StackOverflow,
        }
    }

    /// Pop index and base pointer; return the effective slot and the
    /// sub-word lane per the element width.
    fn indexed_slot(&mut self, shift: u32, lane_mask: i32) -> (usize, usize) {
        let index = self.pop().as_i32();
        let mut ptr = self.pop().as_pointer();
        ptr.address = ptr.address.wrapping_add((index >> shift) as u16);
        let slot = self.resolve_pointer(ptr);
        (slot, (index & lane_mask) as usize)
    }

    /// In-place increment/decrement through a pointer, stepping per the
    /// pointee type.
    fn step_value(&mut self, pointer: VmPointer, delta: i32, push_result: bool) {
        let slot = self.resolve_pointer(pointer);
        let current = self.load(slot);

        let next = match pointer.pointee {
            DataType::Int8 => Value::from_i8(current.as_i8().wrapping_add(delta as i8)),
            DataType::Uint8 => Value::from_u8(current.as_u8().wrapping_add(delta as u8)),
            DataType::Int16 => Value::from_i16(current.as_i16().wrapping_add(delta as i16)),
            DataType::Uint16 => Value::from_u16(current.as_u16().wrapping_add(delta as u16)),
            DataType::Uint32 => Value::from_u32(current.as_u32().wrapping_add(delta as u32)),
            DataType::Float => Value::from_f32(current.as_f32() + delta as f32),
            _ => Value::from_i32(current.as_i32().wrapping_add(delta)),
        };

        self.store(slot, next);
        if push_result {
            self.push(next);
        }
    }

    // ===== Operator helpers =====

    fn binary_i32(&mut self, f: impl FnOnce(i32, i32) -> i32) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_i32(f(lhs.as_i32(), rhs.as_i32())));
    }

    fn binary_u32(&mut self, f: impl FnOnce(u32, u32) -> u32) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_u32(f(lhs.as_u32(), rhs.as_u32())));
    }

    fn binary_f32(&mut self, f: impl FnOnce(f32, f32) -> f32) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_f32(f(lhs.as_f32(), rhs.as_f32())));
    }

    fn compare_i32(&mut self, f: impl FnOnce(i32, i32) -> bool) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_bool(f(lhs.as_i32(), rhs.as_i32())));
    }

    fn compare_u32(&mut self, f: impl FnOnce(u32, u32) -> bool) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_bool(f(lhs.as_u32(), rhs.as_u32())));
    }

    fn compare_f32(&mut self, f: impl FnOnce(f32, f32) -> bool) {
        let rhs = self.pop();
        let lhs = self.pop();
        self.push(Value::from_bool(f(lhs.as_f32(), rhs.as_f32())));
    }

    // ===== Switch =====

    /// `[OP_SWITCH][tableEnd:u16][min:i32][max:i32]` with a trailing table
    /// of 16-bit backward offsets: default entry first, then one entry per
    /// label in `[min..=max]`, indexed from the table end.
    fn exec_switch(&mut self, code: &[u8]) {
        let table_end = self.read_u16(code) as i64 - 8;
        let min = self.read_i32(code) as i64;
        let max = self.read_i32(code) as i64;
        let value = self.pop().as_i32() as i64;

        let index = if value >= min && value <= max {
            ((max - min) - (value - min)) + 1
        } else {
            (max - min) + 2
        };

        // Land on the table entry, then follow its backward offset.
        let entry = self.frame.ip as i64 + table_end - index * 2;
        if entry < 0 || (entry + 2) as usize > code.len() {
            self.status = VmStatus::UnknownInstruction;
            return;
        }
        self.frame.ip = entry as usize;
        let case_jump = self.read_u16(code) as i64;

        let target = self.frame.ip as i64 - (case_jump + 2);
        if target < 0 {
            self.status = VmStatus::UnknownInstruction;
            return;
        }
        self.frame.ip = target as usize;
    }

    // ===== Calls =====

    /// Jump to a function's code. `function_offset` addresses the function
    /// start marker emitted by the binary writer.
    fn call(&mut self, code: &[u8], function_offset: u32, arg_count: usize) -> bool {
        if self.sp >= self.stack.len() {
            self.status = VmStatus::CallFrameOverflow;
            return false;
        }

        // Store the return address into the saved snapshot.
        if self.frame.enclosing != NO_FRAME {
            let snapshot = self.frame.enclosing as usize;
            if snapshot + 1 >= self.stack.len() {
                self.status = VmStatus::CallFrameOverflow;
                return false;
            }
            self.stack[snapshot + 1] = Value::from_u32(self.frame.ip as u32);
        }

        let offset = function_offset as usize;
        if code.get(offset) != Some(&(OpCode::FunctionStart as u8)) {
            self.status = VmStatus::CallNotAFunction;
            return false;
        }

        // Marker, return type, arity.
        let arity = code.get(offset + 2).copied().unwrap_or(0) as usize;
        if arg_count != arity {
            self.status = VmStatus::CallArgCountError;
            return false;
        }

        self.frame.ip = offset + 3;
        // Slot base sits at the first argument; for methods that is `this`.
        self.frame.slots = self.sp - arg_count;

        true
    }

    fn exec_return(&mut self) -> bool {
        let result = self.pop();

        if self.frame.enclosing == NO_FRAME {
            // Top-level code ends with OP_END, never OP_RETURN.
            self.status = VmStatus::StackUnderflow;
            return false;
        }

        let snapshot = self.frame.enclosing as usize;
        if self.frame.slots < self.globals_len + 1 + FRAME_SIZE
            || snapshot + 2 >= self.stack.len()
        {
            self.status = VmStatus::StackUnderflow;
            return false;
        }

        // Rewind past the arguments, the callee id, and the frame record.
        self.sp = self.frame.slots - 1 - FRAME_SIZE;

        self.frame = Frame {
            enclosing: self.stack[snapshot].as_u32(),
            ip: self.stack[snapshot + 1].as_u32() as usize,
            slots: self.stack[snapshot + 2].as_u32() as usize,
        };

        self.push(result);
        true
    }

    fn call_native(
        &mut self,
        program: &Program<'a>,
        arg_count: usize,
        sys: &mut Option<&mut dyn std::any::Any>,
    ) -> bool {
        let func = self.peek(arg_count + 1);
        let native_id = func.as_function();

        let Some(native) = self.resolver.and_then(|r| r(native_id, arg_count as u8)) else {
            self.status = VmStatus::NativeFunctionNotResolved;
            return false;
        };

        if self.sp < self.globals_len + arg_count + 1 {
            self.status = VmStatus::StackUnderflow;
            return false;
        }
        let args: Vec<Value> = self.stack[self.sp - arg_count..self.sp].to_vec();

        let mut ctx = NativeContext {
            program,
            sys: sys.as_mut().map(|s| &mut **s),
            stop: false,
        };
        let result = native(&mut ctx, arg_count, &args);
        let stop_requested = ctx.stop;

        self.sp -= arg_count + 1;
        self.push(result);

        if stop_requested {
            self.status = VmStatus::Stop;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::checksum;
    use crate::program::{BinaryHeader, HEADER_SIZE};

    /// Assemble a minimal image from raw code, constants and strings.
    fn image(code: &[u8], constants: &[Value], strings: &[u8], globals_size: u32) -> Vec<u8> {
        let mut body = code.to_vec();
        while (body.len() + HEADER_SIZE) % 4 != 0 {
            body.push(0);
        }
        let constants_pos = HEADER_SIZE + body.len();
        for value in constants {
            body.extend_from_slice(&value.to_le_bytes());
        }
        let strings_pos = HEADER_SIZE + body.len();
        body.extend_from_slice(strings);

        let header = BinaryHeader {
            header_size: HEADER_SIZE as u8,
            flags: 0,
            lang_major: 0,
            lang_minor: 1,
            build_day: 0,
            build_time: 0,
            code_pos: HEADER_SIZE as u32,
            constants_pos: constants_pos as u32,
            strings_pos: strings_pos as u32,
            globals_size,
            total_size: (HEADER_SIZE + body.len()) as u32,
            checksum: checksum::calculate(&body),
        };

        let mut data = Vec::new();
        header.write_to(&mut data);
        data.extend_from_slice(&body);
        data
    }

    fn run_code(code: &[u8], constants: &[Value]) -> (VmStatus, Vec<Value>) {
        let data = image(code, constants, &[], 0);
        let mut stack = vec![Value::ZERO; 256];
        let status;
        let copied;
        {
            let mut vm = Vm::decode(&data, &mut stack).expect("decode");
            status = vm.run(None);
            copied = vm.stack[vm.globals_len..vm.sp].to_vec();
        }
        (status, copied)
    }

    #[test]
    fn arithmetic_signed() {
        // 2 + 3 * 4 compiled right-to-left by hand: push 2, push 3, push 4,
        // mult, add.
        let constants = [Value::from_i32(2), Value::from_i32(3), Value::from_i32(4)];
        let code = [
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::Constant as u8,
            2,
            OpCode::MultS as u8,
            OpCode::AddS as u8,
            OpCode::End as u8,
        ];
        let (status, stack) = run_code(&code, &constants);
        assert_eq!(status, VmStatus::End);
        assert_eq!(stack.last().unwrap().as_i32(), 14);
    }

    #[test]
    fn float_family() {
        let constants = [Value::from_f32(1.5), Value::from_f32(2.25)];
        let code = [
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::AddF as u8,
            OpCode::End as u8,
        ];
        let (status, stack) = run_code(&code, &constants);
        assert_eq!(status, VmStatus::End);
        assert_eq!(stack.last().unwrap().as_f32(), 3.75);
    }

    #[test]
    fn unsigned_comparison_differs_from_signed() {
        // 0xFFFFFFFF is -1 signed but u32::MAX unsigned.
        let constants = [Value::from_u32(0xFFFF_FFFF), Value::from_u32(1)];
        let less_s = [
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::LessS as u8,
            OpCode::End as u8,
        ];
        let (_, stack) = run_code(&less_s, &constants);
        assert!(stack.last().unwrap().as_bool());

        let less_u = [
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::LessU as u8,
            OpCode::End as u8,
        ];
        let (_, stack) = run_code(&less_u, &constants);
        assert!(!stack.last().unwrap().as_bool());
    }

    #[test]
    fn unknown_instruction_halts() {
        let code = [OpCode::Return as u8 + 1, OpCode::End as u8];
        let (status, _) = run_code(&code, &[]);
        assert_eq!(status, VmStatus::UnknownInstruction);
    }

    #[test]
    fn jump_if_false_peeks() {
        // false on stack, conditional jump over a PUSH.
        let code = [
            OpCode::False as u8,
            OpCode::JumpIfFalse as u8,
            1,
            0,
            OpCode::Push as u8,
            OpCode::End as u8,
        ];
        let (status, stack) = run_code(&code, &[]);
        assert_eq!(status, VmStatus::End);
        // The condition was peeked, not popped.
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn globals_and_pointers() {
        // Store 9 through a global pointer, read it back.
        let ptr = VmPointer::new(0, DataType::Int32, VarScope::Global);
        let constants = [Value::from_i32(9), Value::from_pointer(ptr)];
        let code = [
            OpCode::Constant as u8,
            0, // value
            OpCode::Constant as u8,
            1, // pointer
            OpCode::Assign as u8,
            OpCode::Pop as u8,
            OpCode::Constant as u8,
            1,
            OpCode::GetVariable as u8,
            OpCode::End as u8,
        ];
        let data = image(&code, &constants, &[], 4);
        let mut stack = vec![Value::ZERO; 64];
        let mut vm = Vm::decode(&data, &mut stack).expect("decode");
        let status = vm.run(None);
        assert_eq!(status, VmStatus::End);
        assert_eq!(vm.globals()[0].as_i32(), 9);
    }

    #[test]
    fn packed_byte_lanes() {
        // a[5] = 6 for a byte array based at global slot 0.
        let ptr = VmPointer::new(0, DataType::Uint8, VarScope::Global);
        let constants = [
            Value::from_pointer(ptr),
            Value::from_i32(5),
            Value::from_i32(6),
        ];
        let code = [
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::Constant as u8,
            2,
            OpCode::SetIndexedU8 as u8,
            OpCode::Pop as u8,
            OpCode::Constant as u8,
            0,
            OpCode::Constant as u8,
            1,
            OpCode::GetIndexedU8 as u8,
            OpCode::End as u8,
        ];
        let data = image(&code, &constants, &[], 8);
        let mut stack = vec![Value::ZERO; 64];
        let mut vm = Vm::decode(&data, &mut stack).expect("decode");
        let status = vm.run(None);
        assert_eq!(status, VmStatus::End);
        // Element 5 lives in slot 1, lane 1.
        assert_eq!(vm.globals()[1].byte_at(1), 6);
        assert_eq!(vm.stack[vm.globals_len], Value::from_i32(6));
    }

    #[test]
    fn stack_overflow_is_reported() {
        let code = [
            OpCode::PushN as u8,
            255,
            OpCode::PushN as u8,
            255,
            OpCode::End as u8,
        ];
        let data = image(&code, &[], &[], 0);
        let mut stack = vec![Value::ZERO; 64];
        let mut vm = Vm::decode(&data, &mut stack).expect("decode");
        assert_eq!(vm.run(None), VmStatus::StackOverflow);
    }

    #[test]
    fn stack_underflow_is_reported() {
        let code = [OpCode::Pop as u8, OpCode::End as u8];
        let (status, _) = run_code(&code, &[]);
        assert_eq!(status, VmStatus::StackUnderflow);
    }
}
