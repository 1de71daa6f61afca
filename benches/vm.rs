//! Benchmarks over the compile and execute pipeline.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kitelang::error::Diagnostics;
use kitelang::value::Value;
use kitelang::vm::Vm;

const FIB_ITERATIVE: &str = "
int fib(int n) {
    int a = 0;
    int b = 1;
    for (int i = 0; i < n; ++i) {
        int next = a + b;
        a = b;
        b = next;
    }
    return a;
}

int result = 0;
for (int round = 0; round < 100; ++round) {
    result = fib(30);
}
";

const ARRAY_CHURN: &str = "
byte data[64];
int total = 0;
for (int pass = 0; pass < 50; ++pass) {
    for (int i = 0; i < 64; ++i) {
        data[i] = i * 3;
    }
    for (int i = 0; i < 64; ++i) {
        total = total + data[i];
    }
}
";

fn compile_image(source: &str) -> Vec<u8> {
    let mut diags = Diagnostics::new();
    kitelang::compile_to_image(source, &mut diags).expect("benchmark source compiles")
}

fn run_image(image: &[u8]) {
    let mut stack = vec![Value::ZERO; 4096];
    let mut vm = Vm::decode(image, &mut stack).expect("image decodes");
    vm.run(None);
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile_fib", |b| {
        b.iter(|| compile_image(black_box(FIB_ITERATIVE)))
    });
}

fn execute_benchmark(c: &mut Criterion) {
    let fib = compile_image(FIB_ITERATIVE);
    let churn = compile_image(ARRAY_CHURN);

    c.bench_function("run_fib", |b| b.iter(|| run_image(black_box(&fib))));
    c.bench_function("run_array_churn", |b| b.iter(|| run_image(black_box(&churn))));
}

criterion_group!(benches, compile_benchmark, execute_benchmark);
criterion_main!(benches);
