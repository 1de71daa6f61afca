//! Serializes compiler output into a self-describing binary image.
//!
//! Layout: 32-byte header, then the code, constants and string sections,
//! each padded to a 4-byte boundary. Function-id constants are rewritten to
//! byte offsets as the code section is laid down; a function whose id
//! constant was never referenced is warned about and left out of the image.

use crate::compiler::CompiledProgram;
use crate::error::{Diagnostics, Stage};
use crate::program::checksum;
use crate::program::opcode::OpCode;
use crate::program::{BinaryHeader, HEADER_SIZE, LANG_VERSION_MAJOR, LANG_VERSION_MINOR};
use crate::value::{DataType, Value};
use chrono::Timelike;
use std::collections::HashSet;

/// Build-stamp fields: days since 2000-01-01 and halved seconds since
/// midnight.
pub fn build_timestamp() -> (u16, u16) {
    let now = chrono::Local::now();
    let epoch = chrono::NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid epoch");
    let days = now.date_naive().signed_duration_since(epoch).num_days();
    let seconds = now.time().num_seconds_from_midnight();
    (days.clamp(0, u16::MAX as i64) as u16, (seconds / 2) as u16)
}

/// Serialize a compiled program into image bytes.
pub fn write_image(program: &CompiledProgram, diags: &mut Diagnostics) -> Vec<u8> {
    let (build_day, build_time) = build_timestamp();

    let mut constants: Vec<Value> = program.constants.iter().map(|c| c.value).collect();
    // Indices already rewritten to offsets; an id must not match one.
    let mut patched: HashSet<usize> = HashSet::new();

    let mut body: Vec<u8> = Vec::new();

    // ===== Code section =====
    let code_start = HEADER_SIZE;
    for func in &program.functions {
        let func_pos = (body.len() + HEADER_SIZE - code_start) as u32;

        // The top-level script is never a call target; it has no id constant
        // and no function header.
        if !func.name.is_empty() {
            let constant_index = program.constants.iter().enumerate().position(|(i, c)| {
                c.ty == DataType::Function
                    && c.value.as_function() == func.id as u32
                    && !patched.contains(&i)
            });

            match constant_index {
                Some(index) => {
                    constants[index] = Value::from_function(func_pos);
                    patched.insert(index);
                }
                None => {
                    diags.warning(
                        Stage::Emitter,
                        func.span,
                        format!("Function '{}' is never used.", func.name),
                    );
                    continue;
                }
            }

            body.push(OpCode::FunctionStart as u8);
            body.push(func.return_type as u8);
            body.push(func.total_args as u8);
        }

        body.extend_from_slice(&func.code);
    }

    while (body.len() + HEADER_SIZE) % 4 != 0 {
        body.push(0);
    }

    // ===== Constants section =====
    let constants_start = HEADER_SIZE + body.len();
    for value in &constants {
        body.extend_from_slice(&value.to_le_bytes());
    }

    // ===== Strings section =====
    // Already zero-padded to 4-byte boundaries during compilation.
    let strings_start = HEADER_SIZE + body.len();
    body.extend_from_slice(&program.string_data);

    let total_size = HEADER_SIZE + body.len();

    let header = BinaryHeader {
        header_size: HEADER_SIZE as u8,
        flags: program.flags,
        lang_major: LANG_VERSION_MAJOR,
        lang_minor: LANG_VERSION_MINOR,
        build_day,
        build_time,
        code_pos: code_start as u32,
        constants_pos: constants_start as u32,
        strings_pos: strings_start as u32,
        globals_size: program.globals_size_bytes,
        total_size: total_size as u32,
        checksum: checksum::calculate(&body),
    };

    let mut image = Vec::with_capacity(total_size);
    header.write_to(&mut image);
    image.extend_from_slice(&body);

    debug_assert_eq!(image.len(), total_size);
    image
}

/// Human-readable size summary, printed by the compiler CLI on success.
pub fn size_summary(image: &[u8], locals_max: usize) -> String {
    let header = match BinaryHeader::read_from(image) {
        Some(header) => header,
        None => return String::from("<invalid image>"),
    };

    format!(
        "Header:         {} bytes\n\
         Code:           {} bytes\n\
         Constants:      {} bytes\n\
         Strings:        {} bytes\n\
         Globals:        {} bytes\n\
         Total:          {} bytes\n\
         Min Slots Size: {} bytes",
        header.header_size,
        header.constants_pos - header.code_pos,
        header.strings_pos - header.constants_pos,
        header.total_size - header.strings_pos,
        header.globals_size,
        header.total_size,
        locals_max * 4,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::variable::ConstantInfo;
    use crate::compiler::EmittedFunction;
    use crate::program::Program;
    use crate::span::Span;

    fn program_with(functions: Vec<EmittedFunction>, constants: Vec<ConstantInfo>) -> CompiledProgram {
        CompiledProgram {
            functions,
            constants,
            string_data: Vec::new(),
            globals_size_bytes: 0,
            flags: 0,
            locals_max: 0,
        }
    }

    fn top_level(code: Vec<u8>) -> EmittedFunction {
        EmittedFunction {
            id: 0,
            name: String::new(),
            span: Span::default(),
            return_type: DataType::Void,
            total_args: 0,
            code,
        }
    }

    #[test]
    fn writes_decodable_image() {
        let program = program_with(
            vec![top_level(vec![OpCode::End as u8])],
            vec![ConstantInfo::new(DataType::Int32, Value::from_i32(42))],
        );
        let mut diags = Diagnostics::new();
        let image = write_image(&program, &mut diags);

        let decoded = Program::decode(&image).expect("image decodes");
        assert_eq!(decoded.code()[0], OpCode::End as u8);
        assert_eq!(decoded.constant(0).as_i32(), 42);
    }

    #[test]
    fn patches_function_ids_to_offsets() {
        let top = top_level(vec![
            OpCode::Frame as u8,
            OpCode::Constant as u8,
            0,
            OpCode::Call as u8,
            0,
            OpCode::End as u8,
        ]);
        let callee = EmittedFunction {
            id: 1,
            name: "f".into(),
            span: Span::default(),
            return_type: DataType::Void,
            total_args: 0,
            code: vec![OpCode::Nil as u8, OpCode::Return as u8],
        };
        let program = program_with(
            vec![top, callee],
            vec![ConstantInfo::new(DataType::Function, Value::from_function(1))],
        );

        let mut diags = Diagnostics::new();
        let image = write_image(&program, &mut diags);
        let decoded = Program::decode(&image).expect("image decodes");

        // The constant now holds the byte offset of the function marker.
        let offset = decoded.constant(0).as_function() as usize;
        assert_eq!(decoded.code()[offset], OpCode::FunctionStart as u8);
        assert_eq!(decoded.code()[offset + 1], DataType::Void as u8);
        assert_eq!(decoded.code()[offset + 2], 0);
    }

    #[test]
    fn unused_function_is_skipped_with_warning() {
        let top = top_level(vec![OpCode::End as u8]);
        let unused = EmittedFunction {
            id: 1,
            name: "never".into(),
            span: Span::default(),
            return_type: DataType::Void,
            total_args: 0,
            code: vec![OpCode::Nil as u8, OpCode::Return as u8],
        };
        let program = program_with(vec![top, unused], Vec::new());

        let mut diags = Diagnostics::new();
        let image = write_image(&program, &mut diags);
        let decoded = Program::decode(&image).expect("image decodes");

        assert_eq!(diags.warning_count(), 1);
        // Only the top-level byte plus padding made it into the code section.
        assert!(decoded.code().len() <= 4);
    }

    #[test]
    fn checksum_matches_section_bytes() {
        let program = program_with(vec![top_level(vec![OpCode::End as u8])], Vec::new());
        let mut diags = Diagnostics::new();
        let image = write_image(&program, &mut diags);

        let header = BinaryHeader::read_from(&image).unwrap();
        let computed = checksum::calculate(&image[header.code_pos as usize..]);
        assert_eq!(computed, header.checksum);
    }
}
