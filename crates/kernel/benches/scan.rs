use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fluid_kernel::PrefixSum;

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("exclusive_scan");
    for n in [4_096usize, 65_536, 1 << 20] {
        let input: Vec<u32> = (0..n as u32).map(|i| i % 7).collect();
        let mut scan = PrefixSum::with_capacity(n);
        let mut data = input.clone();
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                data.copy_from_slice(&input);
                scan.exclusive_scan(black_box(&mut data));
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan);
criterion_main!(benches);
