use criterion::{criterion_group, criterion_main};


criterion_group!(
    benches,
    skipmap::insert,
    skipmap::get,
    skipmap::remove,
    skipmap::iter,
    skipmap::contended,
);
criterion_main!(benches);
