use criterion::Criterion;


/// Register all journal benchmarks.
pub fn register_benchmarks(c: &mut Criterion) {
    append::register_benchmarks(c);
    read::register_benchmarks(c);
}
