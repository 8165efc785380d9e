use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use monoheap::{ArenaSegment, HeapAllocator};

fn benchmark_alloc_paths(c: &mut Criterion) {
    let sizes: [usize; 4] = [64, 256, 1024, 4096];
    let mut group = c.benchmark_group("alloc_paths");

    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("carve_release", size), &size, |b, &size| {
            let heap = HeapAllocator::new(ArenaSegment::with_capacity(1 << 20));
            b.iter(|| {
                let payload = heap.allocate(black_box(size)).unwrap();
                // SAFETY: freshly allocated from this heap, released once.
                unsafe { heap.release(payload.as_ptr()) };
            });
        });

        group.bench_with_input(BenchmarkId::new("ledger_reuse", size), &size, |b, &size| {
            let heap = HeapAllocator::new(ArenaSegment::with_capacity(1 << 20));
            // Pin a guard block above the measured one so releases park in
            // the ledger instead of unwinding the segment.
            let target = heap.allocate(size).unwrap();
            let _guard = heap.allocate(16).unwrap();
            // SAFETY: `target` is live and came from this heap.
            unsafe { heap.release(target.as_ptr()) };
            b.iter(|| {
                let payload = heap.allocate(black_box(size)).unwrap();
                // SAFETY: freshly allocated from this heap, released once.
                unsafe { heap.release(payload.as_ptr()) };
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_alloc_paths);
criterion_main!(benches);
