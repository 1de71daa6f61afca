//! Read-only lister for binary program images.
//!
//! Consumes an image through the same validation rules as the VM decoder,
//! then walks the code section printing one line per instruction. Switch
//! jump tables are tracked so their 16-bit entries are not misread as
//! opcodes.

use crate::error::DecodeError;
use crate::program::opcode::OpCode;
use crate::program::Program;
use crate::value::DataType;
use std::fmt::Write;

const COL_OP: usize = 8;
const COL_ARGS: usize = 28;

pub struct Disassembler<'a> {
    program: Program<'a>,
    pos: usize,
    table_start: usize,
    table_end: usize,
}

impl<'a> Disassembler<'a> {
    /// Validate the image. Rejects it under the decoder's rules.
    pub fn new(data: &'a [u8]) -> Result<Disassembler<'a>, DecodeError> {
        let program = Program::decode(data)?;
        Ok(Disassembler {
            program,
            pos: 0,
            table_start: 0,
            table_end: 0,
        })
    }

    /// Produce the full listing: header summary, code, constants, strings.
    pub fn disassemble(&mut self) -> String {
        let mut out = String::new();
        let header = self.program.header;

        writeln!(out, "========== Disassembly ==========").unwrap();
        writeln!(out, "    Header Size:       {} bytes", header.header_size).unwrap();
        writeln!(out, "    Flags:             0x{:02X}", header.flags).unwrap();
        writeln!(
            out,
            "    Language Version:  {}.{}",
            header.lang_major, header.lang_minor
        )
        .unwrap();
        writeln!(
            out,
            "    Build Day/Time:    {}:{}",
            header.build_day, header.build_time
        )
        .unwrap();
        writeln!(out, "    Globals Size:      {} bytes", header.globals_size).unwrap();
        writeln!(out, "    Checksum:          {}", header.checksum).unwrap();
        if let Some(name) = self.program.file_name() {
            writeln!(out, "    Source File:       {}", name).unwrap();
        }
        writeln!(out).unwrap();

        let code = self.program.code();
        self.pos = 0;
        while self.pos < code.len() {
            let line = self.read_instruction(code);
            writeln!(out, "{}", line).unwrap();
        }

        writeln!(out).unwrap();
        writeln!(out, "Constants: {}", self.program.constants_count()).unwrap();
        for index in 0..self.program.constants_count() {
            let value = self.program.constant(index);
            writeln!(
                out,
                "    [{:3}] 0x{:08X}  i32={}  f32={}",
                index,
                value.bits(),
                value.as_i32(),
                value.as_f32()
            )
            .unwrap();
        }

        writeln!(out, "Strings: {} bytes", self.program.strings().len()).unwrap();
        let mut offset = 0usize;
        let strings = self.program.strings();
        while offset < strings.len() {
            let text = self.program.string_at(offset as u32);
            writeln!(out, "    [{:4}] \"{}\"", offset, text).unwrap();
            // Skip to the next 4-byte-aligned start past the terminator.
            offset += text.len() + 1;
            while offset % 4 != 0 {
                offset += 1;
            }
        }

        out
    }

    fn read_instruction(&mut self, code: &[u8]) -> String {
        let addr = self.pos;

        // Inside a switch jump table: raw 16-bit entries.
        if self.table_end > 0 && self.pos >= self.table_start {
            let entry = self.read_u16(code);
            if self.pos >= self.table_end {
                self.table_start = 0;
                self.table_end = 0;
            }
            return Self::line(addr, "JUMP_TBL_ADDR", &entry.to_string());
        }

        let byte = code[self.pos];
        self.pos += 1;

        let Some(op) = OpCode::from_u8(byte) else {
            return Self::line(addr, "???", &format!("0x{:02X}", byte));
        };

        match op {
            OpCode::FunctionStart => {
                let return_type = DataType::from_u8(self.read_byte(code)).unwrap_or(DataType::None);
                let args = self.read_byte(code);
                Self::line(
                    addr,
                    "FUNC",
                    &format!("returns {}, {} arg(s)", return_type, args),
                )
            }

            // One-byte operand
            OpCode::PushN => self.byte_arg(addr, "PUSH_N", code),
            OpCode::PopN => self.byte_arg(addr, "POP_N", code),
            OpCode::Call => self.byte_arg(addr, "CALL", code),
            OpCode::CallNative => self.byte_arg(addr, "CALL_NATIVE", code),

            // Constant pool
            OpCode::Constant => {
                let index = self.read_byte(code) as usize;
                self.constant_line(addr, "CONSTANT", index)
            }
            OpCode::Constant16 => {
                let index = self.read_u16(code) as usize;
                self.constant_line(addr, "CONSTANT_16", index)
            }
            OpCode::Constant24 => {
                let index = self.read_u24(code) as usize;
                self.constant_line(addr, "CONSTANT_24", index)
            }

            // String pool
            OpCode::String => {
                let offset = self.read_byte(code) as u32;
                self.string_line(addr, "STRING", offset)
            }
            OpCode::String16 => {
                let offset = self.read_u16(code) as u32;
                self.string_line(addr, "STRING_16", offset)
            }
            OpCode::String24 => {
                let offset = self.read_u24(code);
                self.string_line(addr, "STRING_24", offset)
            }

            // 16-bit operand
            OpCode::Array => self.short_arg(addr, "ARRAY", code),
            OpCode::Jump => self.jump_arg(addr, "JUMP", code, true),
            OpCode::Break => self.jump_arg(addr, "BREAK", code, true),
            OpCode::JumpIfFalse => self.jump_arg(addr, "JUMP_IF_FALSE", code, true),
            OpCode::JumpIfTrue => self.jump_arg(addr, "JUMP_IF_TRUE", code, true),
            OpCode::JumpIfEqual => self.jump_arg(addr, "JUMP_IF_EQUAL", code, true),
            OpCode::Loop => self.jump_arg(addr, "LOOP", code, false),
            OpCode::Continue => self.jump_arg(addr, "CONTINUE", code, false),

            OpCode::Switch => {
                let table_jump = self.read_u16(code) as usize;
                let table_end = self.pos + table_jump;
                let min = self.read_i32(code);
                let max = self.read_i32(code);

                // One default entry plus one per label in range.
                let entries = (max as i64 - min as i64 + 2) as usize;
                self.table_end = table_end;
                self.table_start = table_end.saturating_sub(entries * 2);

                Self::line(
                    addr,
                    "SWITCH",
                    &format!("min={} max={} tableEnd={}", min, max, table_end),
                )
            }

            // No operand
            _ => Self::line(addr, Self::name(op), ""),
        }
    }

    fn name(op: OpCode) -> &'static str {
        match op {
            OpCode::Nop => "NOP",
            OpCode::Push => "PUSH",
            OpCode::Pop => "POP",
            OpCode::Duplicate => "DUPLICATE",
            OpCode::Duplicate2 => "DUPLICATE_2",
            OpCode::Nil => "NIL",
            OpCode::False => "FALSE",
            OpCode::True => "TRUE",
            OpCode::GetVariable => "GET_VARIABLE",
            OpCode::SetVariable => "SET_VARIABLE",
            OpCode::AbsolutePointer => "ABSOLUTE_POINTER",
            OpCode::GetIndexedS8 => "GET_INDEXED_S8",
            OpCode::GetIndexedU8 => "GET_INDEXED_U8",
            OpCode::GetIndexedS16 => "GET_INDEXED_S16",
            OpCode::GetIndexedU16 => "GET_INDEXED_U16",
            OpCode::GetIndexedS32 => "GET_INDEXED_S32",
            OpCode::GetIndexedU32 => "GET_INDEXED_U32",
            OpCode::GetIndexedFloat => "GET_INDEXED_FLOAT",
            OpCode::SetIndexedS8 => "SET_INDEXED_S8",
            OpCode::SetIndexedU8 => "SET_INDEXED_U8",
            OpCode::SetIndexedS16 => "SET_INDEXED_S16",
            OpCode::SetIndexedU16 => "SET_INDEXED_U16",
            OpCode::SetIndexedS32 => "SET_INDEXED_S32",
            OpCode::SetIndexedU32 => "SET_INDEXED_U32",
            OpCode::SetIndexedFloat => "SET_INDEXED_FLOAT",
            OpCode::CastIntToFloat => "CAST_INT_TO_FLOAT",
            OpCode::CastPrevIntToFloat => "CAST_PREV_INT_TO_FLOAT",
            OpCode::CastFloatToInt => "CAST_FLOAT_TO_INT",
            OpCode::CastPrevFloatToInt => "CAST_PREV_FLOAT_TO_INT",
            OpCode::Modulus => "MODULUS",
            OpCode::NegateI => "NEGATE_I",
            OpCode::NegateF => "NEGATE_F",
            OpCode::AddS => "ADD_S",
            OpCode::AddU => "ADD_U",
            OpCode::AddF => "ADD_F",
            OpCode::SubS => "SUB_S",
            OpCode::SubU => "SUB_U",
            OpCode::SubF => "SUB_F",
            OpCode::MultS => "MULT_S",
            OpCode::MultU => "MULT_U",
            OpCode::MultF => "MULT_F",
            OpCode::DivS => "DIV_S",
            OpCode::DivU => "DIV_U",
            OpCode::DivF => "DIV_F",
            OpCode::PrefixDecrease => "PREFIX_DECREASE",
            OpCode::PrefixIncrease => "PREFIX_INCREASE",
            OpCode::PlusPlus => "PLUS_PLUS",
            OpCode::MinusMinus => "MINUS_MINUS",
            OpCode::Assign => "ASSIGN",
            OpCode::Not => "NOT",
            OpCode::EqualS => "EQUAL_S",
            OpCode::EqualU => "EQUAL_U",
            OpCode::EqualF => "EQUAL_F",
            OpCode::NotEqualS => "NOT_EQUAL_S",
            OpCode::NotEqualU => "NOT_EQUAL_U",
            OpCode::NotEqualF => "NOT_EQUAL_F",
            OpCode::LessS => "LESS_S",
            OpCode::LessU => "LESS_U",
            OpCode::LessF => "LESS_F",
            OpCode::LessOrEqualS => "LESS_OR_EQUAL_S",
            OpCode::LessOrEqualU => "LESS_OR_EQUAL_U",
            OpCode::LessOrEqualF => "LESS_OR_EQUAL_F",
            OpCode::GreaterS => "GREATER_S",
            OpCode::GreaterU => "GREATER_U",
            OpCode::GreaterF => "GREATER_F",
            OpCode::GreaterOrEqualS => "GREATER_OR_EQUAL_S",
            OpCode::GreaterOrEqualU => "GREATER_OR_EQUAL_U",
            OpCode::GreaterOrEqualF => "GREATER_OR_EQUAL_F",
            OpCode::BitNot => "BIT_NOT",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::BitShiftL => "BIT_SHIFT_L",
            OpCode::BitShiftR => "BIT_SHIFT_R",
            OpCode::Frame => "FRAME",
            OpCode::Return => "RETURN",
            OpCode::End => "END",
            _ => "???",
        }
    }

    // ===== Formatting =====

    fn line(addr: usize, name: &str, args: &str) -> String {
        let mut text = format!("{:6}:", addr);
        while text.len() < COL_OP {
            text.push(' ');
        }
        text.push_str(name);
        if !args.is_empty() {
            while text.len() < COL_ARGS {
                text.push(' ');
            }
            text.push_str(args);
        }
        text
    }

    fn byte_arg(&mut self, addr: usize, name: &str, code: &[u8]) -> String {
        let value = self.read_byte(code);
        Self::line(addr, name, &value.to_string())
    }

    fn short_arg(&mut self, addr: usize, name: &str, code: &[u8]) -> String {
        let value = self.read_u16(code);
        Self::line(addr, name, &value.to_string())
    }

    fn jump_arg(&mut self, addr: usize, name: &str, code: &[u8], forward: bool) -> String {
        let offset = self.read_u16(code) as usize;
        let target = if forward {
            self.pos + offset
        } else {
            self.pos.saturating_sub(offset)
        };
        Self::line(addr, name, &format!("{} -> {}", offset, target))
    }

    fn constant_line(&mut self, addr: usize, name: &str, index: usize) -> String {
        let value = self.program.constant(index);
        Self::line(
            addr,
            name,
            &format!("[{}] = 0x{:08X}", index, value.bits()),
        )
    }

    fn string_line(&mut self, addr: usize, name: &str, offset: u32) -> String {
        let text = self.program.string_at(offset);
        Self::line(addr, name, &format!("[{}] = \"{}\"", offset, text))
    }

    // ===== Readers =====

    fn read_byte(&mut self, code: &[u8]) -> u8 {
        let byte = code.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::checksum;
    use crate::program::{BinaryHeader, HEADER_SIZE};

    fn image(code: &[u8]) -> Vec<u8> {
        let mut body = code.to_vec();
        while (body.len() + HEADER_SIZE) % 4 != 0 {
            body.push(0);
        }
        let header = BinaryHeader {
            header_size: HEADER_SIZE as u8,
            flags: 0,
            lang_major: 0,
            lang_minor: 1,
            build_day: 0,
            build_time: 0,
            code_pos: HEADER_SIZE as u32,
            constants_pos: (HEADER_SIZE + body.len()) as u32,
            strings_pos: (HEADER_SIZE + body.len()) as u32,
            globals_size: 0,
            total_size: (HEADER_SIZE + body.len()) as u32,
            checksum: checksum::calculate(&body),
        };
        let mut data = Vec::new();
        header.write_to(&mut data);
        data.extend_from_slice(&body);
        data
    }

    #[test]
    fn lists_simple_program() {
        let code = [
            OpCode::Push as u8,
            OpCode::AddS as u8,
            OpCode::End as u8,
        ];
        let image_bytes = image(&code);
        let mut disassembler = Disassembler::new(&image_bytes).expect("valid image");
        let listing = disassembler.disassemble();
        assert!(listing.contains("PUSH"));
        assert!(listing.contains("ADD_S"));
        assert!(listing.contains("END"));
    }

    #[test]
    fn rejects_corrupt_image() {
        let mut data = image(&[OpCode::End as u8]);
        let last = data.len() - 1;
        data[last] ^= 0x55;
        assert!(Disassembler::new(&data).is_err());
    }

    #[test]
    fn function_headers_are_recognized() {
        let code = [
            OpCode::End as u8,
            OpCode::FunctionStart as u8,
            DataType::Int32 as u8,
            2,
            OpCode::Nil as u8,
            OpCode::Return as u8,
        ];
        let image_bytes = image(&code);
        let mut disassembler = Disassembler::new(&image_bytes).expect("valid image");
        let listing = disassembler.disassemble();
        assert!(listing.contains("FUNC"));
        assert!(listing.contains("returns int, 2 arg(s)"));
    }
}
