//! End-to-end tests: compile source, serialize, decode, execute, observe
//! output through test natives.

use kitelang::compiler::natives::NativeId;
use kitelang::error::Diagnostics;
use kitelang::program::opcode::OpCode;
use kitelang::program::Program;
use kitelang::value::{DataType, Value};
use kitelang::vm::{NativeContext, NativeFn, Vm, VmStatus};

/// Captured program output, passed to the VM as the host sys-param.
type Output = Vec<String>;

fn sink<'a>(ctx: &'a mut NativeContext<'_, '_>) -> Option<&'a mut Output> {
    ctx.sys.as_mut().and_then(|sys| sys.downcast_mut::<Output>())
}

fn capture_print(ctx: &mut NativeContext<'_, '_>, _argc: usize, args: &[Value]) -> Value {
    let text = ctx.program.string_at(args[0].as_u32()).to_string();
    if let Some(out) = sink(ctx) {
        out.push(text);
    }
    Value::from_bool(true)
}

fn capture_printi(ctx: &mut NativeContext<'_, '_>, _argc: usize, args: &[Value]) -> Value {
    let text = args[0].as_i32().to_string();
    if let Some(out) = sink(ctx) {
        out.push(text);
    }
    Value::from_bool(true)
}

fn capture_printf(ctx: &mut NativeContext<'_, '_>, _argc: usize, args: &[Value]) -> Value {
    let text = format!("{:.6}", args[0].as_f32());
    if let Some(out) = sink(ctx) {
        out.push(text);
    }
    Value::from_bool(true)
}

fn fixed_clock(_ctx: &mut NativeContext<'_, '_>, _argc: usize, _args: &[Value]) -> Value {
    Value::from_i32(1000)
}

fn resolver(func_id: u32, _arg_count: u8) -> Option<NativeFn> {
    if func_id == NativeId::Print as u32 || func_id == NativeId::PrintLine as u32 {
        Some(capture_print)
    } else if func_id == NativeId::PrintInt as u32 {
        Some(capture_printi)
    } else if func_id == NativeId::PrintFloat as u32 {
        Some(capture_printf)
    } else if func_id == NativeId::Clock as u32 {
        Some(fixed_clock)
    } else {
        None
    }
}

fn compile(source: &str) -> Vec<u8> {
    let mut diags = Diagnostics::new();
    let image = kitelang::compile_to_image(source, &mut diags);
    if let Err(err) = &image {
        for entry in diags.entries() {
            eprintln!("{}", entry);
        }
        panic!("compile failed: {}", err);
    }
    image.unwrap()
}

fn run(source: &str) -> (VmStatus, Output) {
    let image = compile(source);
    let mut stack = vec![Value::ZERO; 2048];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    vm.set_native_resolver(resolver);

    let mut output = Output::new();
    let status = vm.run(Some(&mut output));
    (status, output)
}

fn expect_output(source: &str, expected: &[&str]) {
    let (status, output) = run(source);
    assert_eq!(status, VmStatus::End, "program should run to OP_END");
    assert_eq!(output, expected);
}

// ===== End-to-end scenarios =====

#[test]
fn arithmetic_precedence() {
    expect_output("int x = 2 + 3 * 4; printi(x);", &["14"]);
}

#[test]
fn float_promotion_of_integer_literal() {
    expect_output("float f = 1; f = f + 0.5; printf(f);", &["1.500000"]);
}

#[test]
fn switch_dense_labels() {
    let source = "int v = 2; switch(v){ case 1: printi(1); break; case 2: printi(2); break; \
                  default: printi(0); }";
    expect_output(source, &["2"]);
}

#[test]
fn switch_emits_min_max_and_dense_table() {
    let image = compile(
        "int v = 2; switch(v){ case 1: printi(1); break; case 2: printi(2); break; \
         default: printi(0); }",
    );
    let program = Program::decode(&image).expect("image decodes");
    let code = program.code();

    let switch_pos = code
        .iter()
        .position(|b| *b == OpCode::Switch as u8)
        .expect("OP_SWITCH emitted");

    let operand = u16::from_le_bytes([code[switch_pos + 1], code[switch_pos + 2]]) as usize;
    let min = i32::from_le_bytes([
        code[switch_pos + 3],
        code[switch_pos + 4],
        code[switch_pos + 5],
        code[switch_pos + 6],
    ]);
    let max = i32::from_le_bytes([
        code[switch_pos + 7],
        code[switch_pos + 8],
        code[switch_pos + 9],
        code[switch_pos + 10],
    ]);

    assert_eq!(min, 1);
    assert_eq!(max, 2);

    // One default entry plus one per label in [min..=max], each 16 bits,
    // ending exactly where the switch operand lands.
    let table_end = switch_pos + 3 + operand;
    let entries = (max - min + 2) as usize;
    let table_start = table_end - entries * 2;

    for entry in 0..entries {
        let pos = table_start + entry * 2;
        let back = u16::from_le_bytes([code[pos], code[pos + 1]]) as usize;
        let target = pos + 2 - (back + 2);
        assert!(target < table_start, "entry {} lands inside the bodies", entry);
    }
}

#[test]
fn for_loop_sum() {
    expect_output(
        "int s = 0; for(int i = 0; i < 5; ++i) s = s + i; printi(s);",
        &["10"],
    );
}

#[test]
fn class_with_constructor_and_method() {
    let source = "class P { int a; P(int v) { this.a = v; } int get() { return this.a; } } \
                  P p(7); printi(p.get());";
    expect_output(source, &["7"]);
}

#[test]
fn class_functions_are_emitted_separately() {
    let mut diags = Diagnostics::new();
    let program = kitelang::compile(
        "class P { int a; P(int v) { this.a = v; } int get() { return this.a; } } \
         P p(7); printi(p.get());",
        &mut diags,
    )
    .expect("compiles");

    let names: Vec<&str> = program.functions.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"__P__Init"));
    assert!(names.contains(&"__P__Constructor"));
    assert!(names.contains(&"__P__get"));

    // Call sites save the frame and synthesize `this`.
    let top = &program.functions[0];
    assert!(top.code.contains(&(OpCode::Frame as u8)));
    assert!(top.code.contains(&(OpCode::AbsolutePointer as u8)));
}

#[test]
fn byte_array_packing() {
    let source = "byte a[8] = {1,2,3,4,5,6,7,8}; printi(a[5]);";
    expect_output(source, &["6"]);

    // 8 one-byte elements pack into exactly two value slots.
    let mut diags = Diagnostics::new();
    let program = kitelang::compile(source, &mut diags).expect("compiles");
    assert_eq!(program.globals_size_bytes, 8);
}

// ===== Language behavior =====

#[test]
fn while_loop_with_break_and_continue() {
    let source = "
        int n = 0;
        int total = 0;
        while (n < 100) {
            n = n + 1;
            if (n - (n / 2) * 2 == 0) { continue; }
            if (n > 9) { break; }
            total = total + n;
        }
        printi(total);
    ";
    // 1 + 3 + 5 + 7 + 9 = 25
    expect_output(source, &["25"]);
}

#[test]
fn compound_assignment_operators() {
    let source = "
        int x = 10;
        x += 5;
        x -= 3;
        x *= 4;
        x /= 2;
        printi(x);
    ";
    expect_output(source, &["24"]);
}

#[test]
fn compound_assignment_on_array_elements() {
    let source = "
        int a[3] = {10, 20, 30};
        a[1] += 7;
        printi(a[1]);
    ";
    expect_output(source, &["27"]);
}

#[test]
fn prefix_and_postfix_mutation() {
    let source = "
        int i = 5;
        printi(++i);
        printi(i++);
        printi(i);
    ";
    expect_output(source, &["6", "6", "7"]);
}

#[test]
fn ternary_selects_by_condition() {
    expect_output("int a = 3; int b = a > 2 ? 10 : 20; printi(b);", &["10"]);
    expect_output("int a = 1; int b = a > 2 ? 10 : 20; printi(b);", &["20"]);
}

#[test]
fn logical_operators_short_circuit() {
    let source = "
        int a = 1;
        if (a == 1 && a < 5) { printi(1); }
        if (a == 2 || a == 1) { printi(2); }
        if (a == 2 && a == 1) { printi(3); }
    ";
    expect_output(source, &["1", "2"]);
}

#[test]
fn bitwise_and_shift_operators() {
    let source = "
        int x = 0b1100;
        printi(x & 0b1010);
        printi(x | 0b0011);
        printi(x ^ 0b1111);
        printi(x << 2);
        printi(x >> 1);
        printi(~x);
    ";
    expect_output(source, &["8", "15", "3", "48", "6", "-13"]);
}

#[test]
fn modulus_is_integer() {
    expect_output("printi(17 % 5);", &["2"]);
}

#[test]
fn recursive_function() {
    let source = "
        int fib(int n) {
            if (n < 2) { return n; }
            return fib(n - 1) + fib(n - 2);
        }
        printi(fib(10));
    ";
    expect_output(source, &["55"]);
}

#[test]
fn nested_calls_restore_frames() {
    let source = "
        int double(int x) { return x + x; }
        int quad(int x) { return double(double(x)); }
        printi(quad(3));
        printi(double(5));
    ";
    expect_output(source, &["12", "10"]);
}

#[test]
fn unsigned_arithmetic_uses_unsigned_family() {
    let source = "
        uint big = 0xFFFFFFFF;
        uint one = 1;
        if (big > one) { printi(1); } else { printi(0); }
        uint sum = big + one;
        if (sum == 0) { printi(2); }
    ";
    // 0xFFFFFFFF is only greater than 1 when compared unsigned, and
    // wraps to zero on +1.
    let (status, output) = run(source);
    assert_eq!(status, VmStatus::End);
    assert_eq!(output, vec!["1", "2"]);
}

#[test]
fn hex_binary_octal_literals() {
    expect_output("printi(0xFF); printi(0b101); printi(0o17);", &["255", "5", "15"]);
}

#[test]
fn string_variables_and_print() {
    let source = "string s = \"hello\"; print(s); println(\"world\");";
    expect_output(source, &["hello", "world"]);
}

#[test]
fn comments_and_preprocessor_lines_are_ignored() {
    let source = "
        #pragma host
        // line comment
        int x = 1; /* block
        comment */ int y = 2;
        printi(x + y);
    ";
    expect_output(source, &["3"]);
}

#[test]
fn short_packed_array() {
    let source = "
        short a[4] = {100, -200, 300, -400};
        printi(a[1]);
        printi(a[3]);
    ";
    expect_output(source, &["-200", "-400"]);

    // 4 two-byte elements pack into two slots.
    let mut diags = Diagnostics::new();
    let program = kitelang::compile(source, &mut diags).expect("compiles");
    assert_eq!(program.globals_size_bytes, 8);
}

#[test]
fn local_array_in_function() {
    let source = "
        int sum3() {
            int a[3] = {4, 5, 6};
            return a[0] + a[1] + a[2];
        }
        printi(sum3());
    ";
    expect_output(source, &["15"]);
}

#[test]
fn destructor_runs_at_scope_exit() {
    let source = "
        class D {
            int x;
            D() { this.x = 1; }
            ~D() { printi(99); }
        }
        {
            D d();
            printi(d.x);
        }
        printi(0);
    ";
    expect_output(source, &["1", "99", "0"]);
}

#[test]
fn switch_default_for_out_of_range() {
    let source = "
        int v = 40;
        switch (v) {
            case 1: printi(1); break;
            case 2: printi(2); break;
            default: printi(0);
        }
    ";
    expect_output(source, &["0"]);
}

#[test]
fn switch_fall_through_labels() {
    let source = "
        int v = 3;
        switch (v) {
            case 2:
            case 3: printi(23); break;
            default: printi(0);
        }
    ";
    expect_output(source, &["23"]);
}

#[test]
fn void_function_implicit_return() {
    let source = "
        int counter = 0;
        void bump() { counter = counter + 1; }
        bump();
        bump();
        printi(counter);
    ";
    expect_output(source, &["2"]);
}

// ===== Binary format properties =====

#[test]
fn constants_are_deduplicated() {
    let mut diags = Diagnostics::new();
    let program = kitelang::compile(
        "int a = 5; int b = 5; int c = 5; printi(a + b + c);",
        &mut diags,
    )
    .expect("compiles");

    let fives = program
        .constants
        .iter()
        .filter(|c| c.ty == DataType::Int32 && c.value.as_i32() == 5)
        .count();
    assert_eq!(fives, 1);
}

#[test]
fn string_offsets_are_word_aligned() {
    let source = "print(\"a\"); print(\"bc\"); print(\"defgh\"); print(\"a\");";
    let mut diags = Diagnostics::new();
    let program = kitelang::compile(source, &mut diags).expect("compiles");

    // The pool itself is padded to whole words.
    assert_eq!(program.string_data.len() % 4, 0);

    // Every string operand in the code addresses a word boundary.
    let image = kitelang::program::writer::write_image(&program, &mut diags);
    let decoded = Program::decode(&image).expect("image decodes");
    let code = decoded.code();
    let mut pos = 0;
    while pos < code.len() {
        if code[pos] == OpCode::String as u8 {
            let offset = code[pos + 1] as u32;
            assert_eq!(offset % 4, 0, "string offset {} not aligned", offset);
            assert!(!decoded.string_at(offset).is_empty());
            pos += 2;
        } else {
            pos += 1;
        }
    }
}

#[test]
fn image_checksum_covers_all_sections() {
    let image = compile("int x = 1; printi(x);");
    let program = Program::decode(&image).expect("image decodes");
    let header = program.header;

    let computed = kitelang::program::checksum::calculate(
        &image[header.code_pos as usize..header.total_size as usize],
    );
    assert_eq!(computed, header.checksum);

    // Any flipped byte in the covered range must be rejected.
    let mut corrupt = image.clone();
    corrupt[header.code_pos as usize] ^= 0x01;
    assert!(Program::decode(&corrupt).is_err());
}

#[test]
fn vm_rejects_call_arity_mismatch() {
    use kitelang::compiler::variable::ConstantInfo;
    use kitelang::compiler::{CompiledProgram, EmittedFunction};
    use kitelang::span::Span;

    // Hand-built program: call a 1-argument function with zero arguments.
    let top = EmittedFunction {
        id: 0,
        name: String::new(),
        span: Span::default(),
        return_type: DataType::Void,
        total_args: 0,
        code: vec![
            OpCode::Frame as u8,
            OpCode::Constant as u8,
            0,
            OpCode::Call as u8,
            0, // arg count 0, but the callee declares 1
            OpCode::End as u8,
        ],
    };
    let callee = EmittedFunction {
        id: 1,
        name: "one_arg".into(),
        span: Span::default(),
        return_type: DataType::Void,
        total_args: 1,
        code: vec![OpCode::Nil as u8, OpCode::Return as u8],
    };
    let program = CompiledProgram {
        functions: vec![top, callee],
        constants: vec![ConstantInfo::new(DataType::Function, Value::from_function(1))],
        string_data: Vec::new(),
        globals_size_bytes: 0,
        flags: 0,
        locals_max: 0,
    };

    let mut diags = Diagnostics::new();
    let image = kitelang::program::writer::write_image(&program, &mut diags);
    let mut stack = vec![Value::ZERO; 256];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    assert_eq!(vm.run(None), VmStatus::CallArgCountError);
}

#[test]
fn vm_rejects_call_to_non_function() {
    use kitelang::compiler::variable::ConstantInfo;
    use kitelang::compiler::{CompiledProgram, EmittedFunction};
    use kitelang::span::Span;

    // The callee constant points at plain code, not a function marker.
    let top = EmittedFunction {
        id: 0,
        name: String::new(),
        span: Span::default(),
        return_type: DataType::Void,
        total_args: 0,
        code: vec![
            OpCode::Frame as u8,
            OpCode::Constant as u8,
            0,
            OpCode::Call as u8,
            0,
            OpCode::End as u8,
        ],
    };
    let program = CompiledProgram {
        functions: vec![top],
        constants: vec![ConstantInfo::new(DataType::Int32, Value::from_i32(0))],
        string_data: Vec::new(),
        globals_size_bytes: 0,
        flags: 0,
        locals_max: 0,
    };

    let mut diags = Diagnostics::new();
    let image = kitelang::program::writer::write_image(&program, &mut diags);
    let mut stack = vec![Value::ZERO; 256];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    assert_eq!(vm.run(None), VmStatus::CallNotAFunction);
}

#[test]
fn unresolved_native_aborts_the_run() {
    let image = compile("printi(1);");
    let mut stack = vec![Value::ZERO; 256];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    // No resolver installed at all.
    assert_eq!(vm.run(None), VmStatus::NativeFunctionNotResolved);
}

#[test]
fn embedded_file_name_is_string_zero() {
    use kitelang::compiler::NativeRegistry;

    let mut diags = Diagnostics::new();
    let program = kitelang::compile_with_options(
        "int x = 1; printi(x);",
        NativeRegistry::with_builtins(),
        kitelang::program::flags::EMBEDDED_FILE_NAME,
        "blinky",
        false,
        &mut diags,
    )
    .expect("compiles");

    let image = kitelang::program::writer::write_image(&program, &mut diags);
    let decoded = Program::decode(&image).expect("image decodes");
    assert_eq!(decoded.file_name(), Some("blinky"));
}

#[test]
fn declared_native_functions_are_callable() {
    use kitelang::compiler::{NativeFunctionParser, NativeRegistry};

    fn host_answer(_ctx: &mut NativeContext<'_, '_>, _argc: usize, _args: &[Value]) -> Value {
        Value::from_i32(42)
    }

    fn host_resolver(func_id: u32, _arg_count: u8) -> Option<NativeFn> {
        if func_id == 9 {
            Some(host_answer)
        } else if func_id == NativeId::PrintInt as u32 {
            Some(capture_printi)
        } else {
            None
        }
    }

    let mut registry = NativeRegistry::with_builtins();
    let mut diags = Diagnostics::new();
    NativeFunctionParser::parse("[native 9] int answer();", &mut registry, &mut diags);
    assert!(!diags.has_errors());

    let program = kitelang::compile_with_options(
        "printi(answer());",
        registry,
        0,
        "",
        false,
        &mut diags,
    )
    .expect("compiles");
    let image = kitelang::program::writer::write_image(&program, &mut diags);

    let mut stack = vec![Value::ZERO; 256];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    vm.set_native_resolver(host_resolver);

    let mut output = Output::new();
    let status = vm.run(Some(&mut output));
    assert_eq!(status, VmStatus::End);
    assert_eq!(output, vec!["42"]);
}

#[test]
fn native_can_request_stop() {
    fn stopper(ctx: &mut NativeContext<'_, '_>, _argc: usize, _args: &[Value]) -> Value {
        ctx.stop = true;
        Value::from_i32(0)
    }

    fn stop_resolver(func_id: u32, _arg_count: u8) -> Option<NativeFn> {
        if func_id == NativeId::Clock as u32 {
            Some(stopper)
        } else if func_id == NativeId::PrintInt as u32 {
            Some(capture_printi)
        } else {
            None
        }
    }

    let image = compile("int t = clock(); printi(t); printi(1);");
    let mut stack = vec![Value::ZERO; 256];
    let mut vm = Vm::decode(&image, &mut stack).expect("image decodes");
    vm.set_native_resolver(stop_resolver);

    let mut output = Output::new();
    let status = vm.run(Some(&mut output));
    assert_eq!(status, VmStatus::Stop);
    assert!(output.is_empty(), "nothing runs after the stop request");
}
