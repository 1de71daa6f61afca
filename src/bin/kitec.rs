//! Compiler CLI: `kitec [-v] [-f] [-n <nativeFuncs>] <input> [output]`

use kitelang::compiler::{NativeFunctionParser, NativeRegistry};
use kitelang::error::Diagnostics;
use kitelang::program::disassembler::Disassembler;
use kitelang::program::writer;
use std::path::{Path, PathBuf};
use std::process::exit;

const EXIT_INVALID_FUNCTION: i32 = 1;
const EXIT_FILE_NOT_FOUND: i32 = 2;
const EXIT_INVALID_DATA: i32 = 13;
const EXIT_FILE_INVALID: i32 = 6;

const OUTPUT_EXTENSION: &str = "kbc";

fn main() {
    let mut input_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;
    let mut native_path: Option<PathBuf> = None;
    let mut verbose = false;
    let mut flags = 0u8;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-v" {
            verbose = true;
        } else if arg == "-f" {
            flags |= kitelang::program::flags::EMBEDDED_FILE_NAME;
        } else if arg == "-n" {
            let Some(path) = args.next() else {
                eprintln!("Expected native function file path!");
                exit(EXIT_INVALID_FUNCTION);
            };
            native_path = Some(PathBuf::from(path));
        } else if input_path.is_none() {
            input_path = Some(PathBuf::from(arg));
        } else if output_path.is_none() {
            output_path = Some(PathBuf::from(arg));
        }
    }

    // Native declarations, when supplied.
    let mut natives = NativeRegistry::with_builtins();
    if let Some(path) = &native_path {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(_) => {
                eprintln!("File does not exist or cannot be opened: {}", path.display());
                exit(EXIT_FILE_NOT_FOUND);
            }
        };
        if source.trim().is_empty() {
            eprintln!("Native function script is empty.");
            exit(EXIT_INVALID_DATA);
        }

        let mut native_diags = Diagnostics::new();
        NativeFunctionParser::parse(&source, &mut natives, &mut native_diags);
        print_diagnostics(&native_diags);
        if native_diags.has_errors() {
            eprintln!("Error parsing native functions");
            exit(EXIT_INVALID_DATA);
        }
        if verbose {
            println!("Registered {} native function(s)", natives.len());
        }
    }

    let Some(input_path) = input_path else {
        eprintln!("Incorrect usage!");
        eprintln!("Correct usage is: kitec [-v] [-f] [-n <nativeFuncs>] <script> [output]");
        exit(EXIT_INVALID_FUNCTION);
    };

    let source = match std::fs::read_to_string(&input_path) {
        Ok(source) => source,
        Err(_) => {
            eprintln!(
                "File does not exist or cannot be opened: \"{}\"",
                input_path.display()
            );
            exit(EXIT_FILE_NOT_FOUND);
        }
    };
    if source.trim().is_empty() {
        eprintln!("Script is empty.");
        exit(EXIT_INVALID_DATA);
    }

    // Default output sits next to the input.
    let output_path =
        output_path.unwrap_or_else(|| input_path.with_extension(OUTPUT_EXTENSION));
    let file_name = output_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string();

    let mut diags = Diagnostics::new();
    let result = kitelang::compile_with_options(
        &source,
        natives,
        flags,
        &file_name,
        verbose,
        &mut diags,
    );

    let program = match result {
        Ok(program) => {
            if verbose {
                println!("Compile complete!");
            }
            program
        }
        Err(err) => {
            print_diagnostics(&diags);
            eprintln!("Compile failed! {}", err);
            exit(EXIT_INVALID_DATA);
        }
    };

    print_diagnostics(&diags);
    if diags.has_errors() {
        exit(EXIT_INVALID_DATA);
    }

    let image = writer::write_image(&program, &mut diags);
    if let Err(err) = std::fs::write(&output_path, &image) {
        eprintln!("Error writing file {}: {}", output_path.display(), err);
        exit(EXIT_FILE_INVALID);
    }

    println!("Binary file written: {}", output_path.display());
    println!("{}", writer::size_summary(&image, program.locals_max));

    if verbose {
        disassemble(&image, &output_path);
    }
}

fn disassemble(image: &[u8], path: &Path) {
    match Disassembler::new(image) {
        Ok(mut disassembler) => println!("{}", disassembler.disassemble()),
        Err(err) => eprintln!("Cannot disassemble {}: {}", path.display(), err),
    }
}

fn print_diagnostics(diags: &Diagnostics) {
    for entry in diags.entries() {
        eprintln!("{}", entry);
    }
}
