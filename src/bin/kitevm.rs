//! VM CLI: `kitevm [-v] <binary>`
//!
//! Hosts the built-in natives: the print family, a millisecond clock, and
//! the busy-wait yield pair.

use kitelang::compiler::natives::NativeId;
use kitelang::value::Value;
use kitelang::vm::{NativeContext, NativeFn, Vm};
use std::path::PathBuf;
use std::process::exit;
use std::sync::OnceLock;
use std::time::Instant;

const EXIT_INVALID_FUNCTION: i32 = 1;
const EXIT_FILE_NOT_FOUND: i32 = 2;
const EXIT_INVALID_DATA: i32 = 13;

/// Working buffer: globals region plus stack, in value slots.
const STACK_SLOTS: usize = 1024;

static CLOCK_START: OnceLock<Instant> = OnceLock::new();

fn clock_ms() -> i32 {
    let start = CLOCK_START.get_or_init(Instant::now);
    start.elapsed().as_millis() as i32
}

// ===== Native implementations =====

fn native_print(ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 1 {
        return Value::from_bool(false);
    }
    print!("{}", ctx.program.string_at(args[0].as_u32()));
    Value::from_bool(true)
}

fn native_println(ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 1 {
        return Value::from_bool(false);
    }
    println!("{}", ctx.program.string_at(args[0].as_u32()));
    Value::from_bool(true)
}

fn native_printi(_ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 1 {
        return Value::from_bool(false);
    }
    println!("{}", args[0].as_i32());
    Value::from_bool(true)
}

fn native_printf(_ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 1 {
        return Value::from_bool(false);
    }
    println!("{:.6}", args[0].as_f32());
    Value::from_bool(true)
}

fn native_clock(_ctx: &mut NativeContext<'_, '_>, _arg_count: usize, _args: &[Value]) -> Value {
    Value::from_i32(clock_ms())
}

/// Busy-wait for the requested number of milliseconds.
fn native_yield_for(_ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 1 {
        return Value::from_bool(false);
    }
    let until = clock_ms().saturating_add(args[0].as_i32());
    while clock_ms() < until {
        std::hint::spin_loop();
    }
    Value::from_bool(true)
}

/// Busy-wait until `lastMs + deltaMs` on the monotonic clock.
fn native_yield_until(_ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value {
    if arg_count < 2 {
        return Value::from_bool(false);
    }
    let until = args[0].as_i32().saturating_add(args[1].as_i32());
    while clock_ms() < until {
        std::hint::spin_loop();
    }
    Value::from_i32(clock_ms())
}

/// Resolver handed to the VM at init. A `None` aborts the run.
fn resolve_native(func_id: u32, arg_count: u8) -> Option<NativeFn> {
    let (func, arity): (NativeFn, u8) = if func_id == NativeId::Print as u32 {
        (native_print, 1)
    } else if func_id == NativeId::PrintLine as u32 {
        (native_println, 1)
    } else if func_id == NativeId::PrintInt as u32 {
        (native_printi, 1)
    } else if func_id == NativeId::PrintFloat as u32 {
        (native_printf, 1)
    } else if func_id == NativeId::Clock as u32 {
        (native_clock, 0)
    } else if func_id == NativeId::YieldFor as u32 {
        (native_yield_for, 1)
    } else if func_id == NativeId::YieldUntil as u32 {
        (native_yield_until, 2)
    } else {
        return None;
    };

    if arg_count != arity {
        return None;
    }
    Some(func)
}

fn main() {
    CLOCK_START.get_or_init(Instant::now);

    let mut input_path: Option<PathBuf> = None;
    let mut verbose = false;

    for arg in std::env::args().skip(1) {
        if arg == "-v" {
            verbose = true;
        } else if input_path.is_none() {
            input_path = Some(PathBuf::from(arg));
        }
    }

    let Some(input_path) = input_path else {
        eprintln!("Incorrect usage!");
        eprintln!("Correct usage is: kitevm [-v] <file.kbc>");
        exit(EXIT_INVALID_FUNCTION);
    };

    let data = match std::fs::read(&input_path) {
        Ok(data) => data,
        Err(_) => {
            eprintln!(
                "File does not exist or cannot be opened: \"{}\"",
                input_path.display()
            );
            exit(EXIT_FILE_NOT_FOUND);
        }
    };
    if data.is_empty() {
        eprintln!("Program binary is empty.");
        exit(EXIT_INVALID_DATA);
    }

    if verbose {
        println!("Program size: {} bytes.", data.len());
    }

    let mut stack = vec![Value::ZERO; STACK_SLOTS];
    let mut vm = match Vm::decode(&data, &mut stack) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("Program rejected: {}", err);
            exit(EXIT_INVALID_DATA);
        }
    };
    vm.set_native_resolver(resolve_native);

    if verbose {
        println!("======== Program Start ========");
    }

    let status = vm.run(None);

    if verbose {
        println!("====== Program Finished =======");
        println!("VM status: {:?}", status);
    }

    if status.is_error() {
        eprintln!("VM terminated with error: {:?}", status);
        exit(EXIT_INVALID_DATA);
    }
}
