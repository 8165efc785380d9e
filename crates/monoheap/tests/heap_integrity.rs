//! Integration tests: ledger integrity under concurrency and under a long
//! deterministic operation trace.

use std::collections::HashSet;

use monoheap::{ArenaSegment, HeapAllocator, HeapStats, PAYLOAD_GRANULE};

fn arena_heap(capacity: usize) -> HeapAllocator<ArenaSegment> {
    HeapAllocator::new(ArenaSegment::with_capacity(capacity))
}

/// Asserts that no two live payload ranges overlap.
fn assert_disjoint(live: &[(usize, usize)]) {
    let mut sorted = live.to_vec();
    sorted.sort_unstable();
    for pair in sorted.windows(2) {
        let (addr, size) = pair[0];
        let (next_addr, _) = pair[1];
        assert!(
            addr + size <= next_addr,
            "live allocations overlap: {addr:#x}+{size} vs {next_addr:#x}"
        );
    }
}

#[test]
fn parallel_alloc_release_cycles_keep_the_ledger_sound() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 40;

    let heap = arena_heap(1 << 20);

    let survivors: Vec<Vec<(usize, usize)>> = std::thread::scope(|scope| {
        let mut workers = Vec::new();
        for t in 0..THREADS {
            let heap = &heap;
            workers.push(scope.spawn(move || {
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    let size = 16 + ((t * 7 + round * 13) % 12) * 16;
                    let payload = heap.allocate(size).expect("arena sized for all threads");
                    assert_eq!(payload.as_ptr() as usize % PAYLOAD_GRANULE, 0);

                    if round % 2 == 0 {
                        // SAFETY: `payload` is live and came from this heap.
                        unsafe { heap.release(payload.as_ptr()) };
                    } else {
                        kept.push((payload.as_ptr() as usize, size));
                    }
                }
                kept
            }));
        }
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let live: Vec<(usize, usize)> = survivors.into_iter().flatten().collect();
    assert_eq!(live.len(), THREADS * ROUNDS / 2);

    // No two threads were ever handed the same block.
    let unique: HashSet<usize> = live.iter().map(|&(addr, _)| addr).collect();
    assert_eq!(unique.len(), live.len());
    assert_disjoint(&live);

    // The list survived the interleaving: acyclic, ordered, singly
    // terminated, with accounting that matches the survivors.
    let summary = heap.audit().expect("ledger must stay sound");
    assert_eq!(summary.blocks - summary.free_blocks, live.len());
    assert_eq!(heap.stats().live_blocks, live.len());
}

#[test]
fn deterministic_trace_preserves_accounting_invariants() {
    fn lcg(state: &mut u64) -> u64 {
        *state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        *state
    }

    let heap = arena_heap(1 << 20);
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut rng = 0xA5A5_5A5A_DEAD_BEEFu64;

    for step in 0..1500 {
        let r = lcg(&mut rng);
        match r % 3 {
            0 => {
                let size = ((r >> 8) as usize % 512) + 1;
                if let Some(payload) = heap.allocate(size) {
                    live.push((payload.as_ptr() as usize, size));
                }
            }
            1 if !live.is_empty() => {
                let idx = (r as usize) % live.len();
                let (addr, _) = live.swap_remove(idx);
                // SAFETY: the tracked pointer is live and came from this heap.
                unsafe { heap.release(addr as *mut u8) };
            }
            2 if !live.is_empty() => {
                let idx = (r as usize) % live.len();
                let (addr, _) = live[idx];
                let new_size = ((r >> 16) as usize % 512) + 1;
                // SAFETY: the tracked pointer is live and came from this heap.
                if let Some(payload) = unsafe { heap.resize(addr as *mut u8, new_size) } {
                    live[idx] = (payload.as_ptr() as usize, new_size);
                }
            }
            _ => {}
        }

        if step % 64 == 0 {
            let summary = heap.audit().expect("ledger must stay sound mid-trace");
            assert_eq!(summary.blocks - summary.free_blocks, live.len());
            assert_eq!(heap.stats().live_blocks, live.len());
            assert_disjoint(&live);
        }
    }

    // Draining every survivor leaves no live block behind; whatever cannot
    // shrink stays parked in the ledger as free capacity.
    for (addr, _) in live.drain(..) {
        // SAFETY: each tracked pointer is live and came from this heap.
        unsafe { heap.release(addr as *mut u8) };
    }
    let summary = heap.audit().expect("ledger must stay sound after drain");
    assert_eq!(summary.blocks, summary.free_blocks);

    let HeapStats {
        live_blocks,
        carved_bytes,
        ..
    } = heap.stats();
    assert_eq!(live_blocks, 0);
    assert_eq!(carved_bytes, summary.payload_bytes);
}
