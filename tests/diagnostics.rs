//! Compile-time diagnostics: errors that stop emission and the warning set.

use kitelang::error::{Diagnostics, Severity};

fn compile_diags(source: &str) -> (bool, Diagnostics) {
    let mut diags = Diagnostics::new();
    let ok = kitelang::compile(source, &mut diags).is_ok();
    (ok, diags)
}

fn has_warning(diags: &Diagnostics, needle: &str) -> bool {
    diags
        .warnings()
        .any(|d| d.severity == Severity::Warning && d.message.contains(needle))
}

fn has_error(diags: &Diagnostics, needle: &str) -> bool {
    diags.errors().any(|d| d.message.contains(needle))
}

// ===== Errors =====

#[test]
fn unterminated_statement_is_an_error() {
    let (ok, diags) = compile_diags("int x = 1");
    assert!(!ok);
    assert!(diags.has_errors());
}

#[test]
fn undefined_variable_is_an_error() {
    let (ok, diags) = compile_diags("printi(missing);");
    assert!(!ok);
    assert!(has_error(&diags, "does not exist"));
}

#[test]
fn const_write_after_init_is_an_error() {
    let (ok, diags) = compile_diags("const int limit = 5; limit = 6;");
    assert!(!ok);
    assert!(has_error(&diags, "const variable"));
}

#[test]
fn duplicate_variable_is_an_error() {
    let (ok, diags) = compile_diags("int x = 1; int x = 2;");
    assert!(!ok);
    assert!(has_error(&diags, "already exists"));
}

#[test]
fn variable_in_own_initializer_is_an_error() {
    let (ok, diags) = compile_diags("int x = x + 1;");
    assert!(!ok);
    assert!(has_error(&diags, "own initializer"));
}

#[test]
fn missing_return_on_value_function_is_an_error() {
    let source = "
        int f(int n) {
            if (n > 0) { return 1; }
        }
        printi(f(1));
    ";
    let (ok, diags) = compile_diags(source);
    assert!(!ok);
    assert!(has_error(&diags, "requires a return value"));
}

#[test]
fn return_inside_conditional_counts_only_at_depth_zero() {
    // A trailing unconditional return satisfies the check.
    let source = "
        int f(int n) {
            if (n > 0) { return 1; }
            return 0;
        }
        printi(f(0));
    ";
    let (ok, diags) = compile_diags(source);
    assert!(ok, "{:?}", diags.errors().collect::<Vec<_>>());
}

#[test]
fn return_at_top_level_is_an_error() {
    let (ok, diags) = compile_diags("return 1;");
    assert!(!ok);
    assert!(has_error(&diags, "top-level"));
}

#[test]
fn duplicate_case_label_is_an_error() {
    let source = "
        int v = 1;
        switch (v) {
            case 1: printi(1); break;
            case 1: printi(2); break;
        }
    ";
    let (ok, diags) = compile_diags(source);
    assert!(!ok);
    assert!(has_error(&diags, "already exists"));
}

#[test]
fn float_switch_input_is_an_error() {
    let (ok, diags) = compile_diags("float f = 1.0; switch (f) { case 1: printi(1); }");
    assert!(!ok);
    assert!(has_error(&diags, "integer type"));
}

#[test]
fn break_outside_loop_is_an_error() {
    let (ok, diags) = compile_diags("break;");
    assert!(!ok);
    assert!(has_error(&diags, "outside of a loop"));
}

#[test]
fn continue_outside_loop_is_an_error() {
    let (ok, diags) = compile_diags("continue;");
    assert!(!ok);
    assert!(has_error(&diags, "outside of a loop"));
}

#[test]
fn wrong_argument_count_is_an_error() {
    let source = "
        int f(int a, int b) { return a + b; }
        printi(f(1));
    ";
    let (ok, diags) = compile_diags(source);
    assert!(!ok);
    assert!(has_error(&diags, "argument(s)"));
}

#[test]
fn array_size_mismatch_is_an_error() {
    let (ok, diags) = compile_diags("int a[2] = {1, 2, 3};");
    assert!(!ok);
    assert!(has_error(&diags, "size"));
}

#[test]
fn zero_size_array_is_an_error() {
    let (ok, diags) = compile_diags("int a[];");
    assert!(!ok);
    assert!(has_error(&diags, "size of 0"));
}

#[test]
fn class_without_fields_is_an_error() {
    let (ok, diags) = compile_diags("class Empty { } ");
    assert!(!ok);
    assert!(has_error(&diags, "at least one field"));
}

#[test]
fn bitwise_on_float_is_an_error() {
    let (ok, diags) = compile_diags("float f = 1.0; int x = f & 2;");
    assert!(!ok);
    assert!(has_error(&diags, "binary operations"));
}

#[test]
fn parser_recovers_and_reports_later_errors() {
    // Two independent errors; panic mode must synchronize between them.
    let source = "
        int = 5;
        int y = ;
    ";
    let (ok, diags) = compile_diags(source);
    assert!(!ok);
    assert!(diags.error_count() >= 2);
}

// ===== Warnings =====

#[test]
fn integer_literal_in_float_position_warns() {
    let (ok, diags) = compile_diags("float f = 1; printf(f);");
    assert!(ok);
    assert!(has_warning(&diags, "implicitly cast to surrounding float"));
}

#[test]
fn assignment_cast_warns() {
    let (ok, diags) = compile_diags("byte b = 1; printi(b);");
    assert!(ok);
    assert!(has_warning(&diags, "implicitly cast to assignee type"));
}

#[test]
fn float_modulus_warns() {
    let (ok, diags) = compile_diags("float f = 3.5; int r = f % 2; printi(r);");
    assert!(ok, "{:?}", diags.errors().collect::<Vec<_>>());
    assert!(has_warning(&diags, "'%' operator"));
}

#[test]
fn unused_local_warns_at_scope_exit() {
    let source = "
        void f() { int unused = 1; }
        f();
    ";
    let (ok, diags) = compile_diags(source);
    assert!(ok);
    assert!(has_warning(&diags, "'unused' is never used"));
}

#[test]
fn unassigned_global_warns_at_program_end() {
    let (ok, diags) = compile_diags("int configured; printi(configured);");
    assert!(ok);
    assert!(has_warning(&diags, "never assigned"));
}

#[test]
fn sparse_switch_warns() {
    let source = "
        int v = 1;
        switch (v) {
            case 1: printi(1); break;
            case 100: printi(2); break;
        }
    ";
    let (ok, diags) = compile_diags(source);
    assert!(ok);
    assert!(has_warning(&diags, "large range"));
}

#[test]
fn constructor_skipped_warns() {
    let source = "
        class C {
            int x;
            C() { this.x = 1; }
        }
        C c;
        printi(c.x);
    ";
    let (ok, diags) = compile_diags(source);
    assert!(ok, "{:?}", diags.errors().collect::<Vec<_>>());
    assert!(has_warning(&diags, "constructor but is initialized without it"));
}

#[test]
fn unused_function_warns_at_emission() {
    let mut diags = Diagnostics::new();
    let program = kitelang::compile("void helper() { } printi(1);", &mut diags).expect("compiles");
    let _ = kitelang::program::writer::write_image(&program, &mut diags);
    assert!(has_warning(&diags, "'helper' is never used"));
}
