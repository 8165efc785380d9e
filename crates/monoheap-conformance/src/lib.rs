//! Conformance scenarios for the monoheap allocator.
//!
//! Each scenario drives a fresh arena-backed heap through one contract
//! behavior and returns a structured outcome; the full set feeds the JSON
//! and markdown reports emitted by the CLI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use monoheap::{ArenaSegment, HeapAllocator, HeapLogLevel, HeapStats, PAYLOAD_GRANULE};

/// Report schema identifier, bumped on breaking report changes.
pub const SCHEMA_VERSION: &str = "v1";

/// Scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// One scenario's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
    pub details: String,
}

/// The full conformance run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub schema_version: String,
    pub scenarios: Vec<ScenarioResult>,
    pub passed: usize,
    pub failed: usize,
}

impl ScenarioReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Failure while emitting a report to disk.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode report: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Scenario {
    name: &'static str,
    run: fn() -> Result<String, String>,
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "zero_requests_refused",
        run: zero_requests_refused,
    },
    Scenario {
        name: "first_fit_reuse",
        run: first_fit_reuse,
    },
    Scenario {
        name: "sole_block_unwind",
        run: sole_block_unwind,
    },
    Scenario {
        name: "overflow_product_refused",
        run: overflow_product_refused,
    },
    Scenario {
        name: "resize_preserves_prefix",
        run: resize_preserves_prefix,
    },
    Scenario {
        name: "resize_to_zero_keeps_ownership",
        run: resize_to_zero_keeps_ownership,
    },
    Scenario {
        name: "growth_failure_isolated",
        run: growth_failure_isolated,
    },
    Scenario {
        name: "parallel_interleaving_audit",
        run: parallel_interleaving_audit,
    },
];

/// Names of every scenario, in run order.
pub fn scenario_names() -> Vec<&'static str> {
    SCENARIOS.iter().map(|s| s.name).collect()
}

/// Runs the full scenario set against fresh arena-backed heaps.
pub fn run_all() -> ScenarioReport {
    let mut scenarios = Vec::with_capacity(SCENARIOS.len());
    let mut passed = 0;
    let mut failed = 0;
    for scenario in SCENARIOS {
        let result = match (scenario.run)() {
            Ok(details) => {
                passed += 1;
                ScenarioResult {
                    name: scenario.name.to_string(),
                    outcome: Outcome::Pass,
                    details,
                }
            }
            Err(details) => {
                failed += 1;
                ScenarioResult {
                    name: scenario.name.to_string(),
                    outcome: Outcome::Fail,
                    details,
                }
            }
        };
        scenarios.push(result);
    }
    ScenarioReport {
        schema_version: SCHEMA_VERSION.to_string(),
        scenarios,
        passed,
        failed,
    }
}

/// Renders the human-readable half of the report pair.
pub fn render_markdown(report: &ScenarioReport) -> String {
    let mut out = String::new();
    out.push_str("# monoheap conformance report\n\n");
    out.push_str(&format!("- schema: {}\n", report.schema_version));
    out.push_str(&format!("- passed: {}\n", report.passed));
    out.push_str(&format!("- failed: {}\n\n", report.failed));
    out.push_str("| scenario | outcome | details |\n|---|---|---|\n");
    for scenario in &report.scenarios {
        let outcome = match scenario.outcome {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
        };
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            scenario.name, outcome, scenario.details
        ));
    }
    out
}

fn arena_heap(capacity: usize) -> HeapAllocator<ArenaSegment> {
    HeapAllocator::new(ArenaSegment::with_capacity(capacity))
}

fn ensure(cond: bool, msg: &str) -> Result<(), String> {
    if cond { Ok(()) } else { Err(msg.to_string()) }
}

fn zero_requests_refused() -> Result<String, String> {
    let heap = arena_heap(4096);
    ensure(heap.allocate(0).is_none(), "allocate(0) must refuse")?;
    ensure(
        heap.zero_allocate(0, 8).is_none(),
        "zero_allocate(0, n) must refuse",
    )?;
    ensure(
        heap.zero_allocate(8, 0).is_none(),
        "zero_allocate(n, 0) must refuse",
    )?;
    ensure(
        heap.stats() == HeapStats::default(),
        "refusals must not touch the ledger",
    )?;
    Ok("all zero-sized requests refused with no side effects".to_string())
}

fn first_fit_reuse() -> Result<String, String> {
    let heap = arena_heap(1 << 16);
    let a = heap.allocate(100).ok_or("allocate(100) failed")?;
    let b = heap.allocate(200).ok_or("allocate(200) failed")?;
    ensure(b > a, "second carve must sit above the first")?;

    // SAFETY: `a` is live and came from this heap.
    unsafe { heap.release(a.as_ptr()) };
    let c = heap.allocate(50).ok_or("allocate(50) failed")?;
    ensure(c == a, "first-fit must reuse the earliest free block")?;
    ensure(heap.stats().reuse_hits == 1, "reuse must be served from the ledger")?;
    Ok(format!("block at {:#x} reused first-fit", a.as_ptr() as usize))
}

fn sole_block_unwind() -> Result<String, String> {
    let heap = arena_heap(4096);
    let p = heap.allocate(48).ok_or("allocate(48) failed")?;
    // SAFETY: `p` is live and came from this heap.
    unsafe { heap.release(p.as_ptr()) };

    let stats = heap.stats();
    ensure(stats.shrink_count == 1, "sole-block release must shrink")?;
    ensure(stats.carved_bytes == 0, "shrink must return every carved byte")?;

    let q = heap.allocate(48).ok_or("regrow failed")?;
    ensure(q == p, "the heap must regrow to the identical address")?;
    Ok("segment unwound and regrown identically".to_string())
}

fn overflow_product_refused() -> Result<String, String> {
    let heap = arena_heap(4096);
    ensure(
        heap.zero_allocate(usize::MAX, 2).is_none(),
        "overflowing product must refuse",
    )?;
    let logged = heap
        .lifecycle_logs()
        .iter()
        .any(|r| r.level == HeapLogLevel::Warn && r.event == "product_overflow");
    ensure(logged, "overflow refusal must be recorded")?;
    ensure(
        heap.audit().map_err(|f| f.to_string())?.blocks == 0,
        "overflow refusal must not carve",
    )?;
    Ok("unrepresentable byte size rejected before any segment effect".to_string())
}

fn resize_preserves_prefix() -> Result<String, String> {
    let heap = arena_heap(1 << 16);
    let a = heap.allocate(32).ok_or("allocate(32) failed")?;
    let _guard = heap.allocate(16).ok_or("guard allocation failed")?;

    // SAFETY: `a` is a live 32-byte payload.
    unsafe {
        for i in 0..32 {
            a.as_ptr().add(i).write(i as u8);
        }
    }
    // SAFETY: `a` is live and came from this heap.
    let grown = unsafe { heap.resize(a.as_ptr(), 200) }.ok_or("resize growth failed")?;
    ensure(grown != a, "growth past capacity must move the block")?;
    // SAFETY: `grown` holds at least 200 usable bytes.
    let prefix = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 32) };
    ensure(
        prefix.iter().enumerate().all(|(i, &b)| b == i as u8),
        "old contents must survive the move",
    )?;
    ensure(
        heap.stats().free_blocks == 1,
        "the outgrown block must return to the ledger",
    )?;
    Ok("prefix preserved across a moving resize".to_string())
}

fn resize_to_zero_keeps_ownership() -> Result<String, String> {
    let heap = arena_heap(4096);
    let p = heap.allocate(64).ok_or("allocate(64) failed")?;
    // SAFETY: `p` is live and came from this heap.
    let result = unsafe { heap.resize(p.as_ptr(), 0) };
    ensure(result.is_none(), "resize to zero must refuse")?;

    let summary = heap.audit().map_err(|f| f.to_string())?;
    ensure(
        summary.free_blocks == 0,
        "resize to zero must not release the block",
    )?;
    Ok("caller keeps ownership across resize(p, 0)".to_string())
}

fn growth_failure_isolated() -> Result<String, String> {
    let heap = arena_heap(160);
    let _a = heap.allocate(64).ok_or("first carve failed")?;
    let before = heap.audit().map_err(|f| f.to_string())?;

    ensure(
        heap.allocate(64).is_none(),
        "exhausted segment must refuse growth",
    )?;
    let after = heap.audit().map_err(|f| f.to_string())?;
    ensure(before == after, "a refused carve must leave the ledger intact")?;

    ensure(
        heap.allocate(16).is_some(),
        "smaller requests must still succeed",
    )?;
    Ok("exhaustion failed cleanly and recoverably".to_string())
}

fn parallel_interleaving_audit() -> Result<String, String> {
    const THREADS: usize = 4;
    const ROUNDS: usize = 32;

    let heap = arena_heap(1 << 18);
    let survivors: Vec<Vec<usize>> = std::thread::scope(|scope| {
        let mut workers = Vec::new();
        for t in 0..THREADS {
            let heap = &heap;
            workers.push(scope.spawn(move || {
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    let size = 16 + ((t + round) % 8) * 16;
                    let Some(payload) = heap.allocate(size) else {
                        continue;
                    };
                    if round % 2 == 0 {
                        // SAFETY: `payload` is live and came from this heap.
                        unsafe { heap.release(payload.as_ptr()) };
                    } else {
                        kept.push(payload.as_ptr() as usize);
                    }
                }
                kept
            }));
        }
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    let mut live: Vec<usize> = survivors.into_iter().flatten().collect();
    live.sort_unstable();
    let unique = live.windows(2).all(|w| w[0] != w[1]);
    ensure(unique, "no block may be handed to two threads")?;
    ensure(
        live.iter().all(|addr| addr % PAYLOAD_GRANULE == 0),
        "every payload must stay granule aligned",
    )?;

    let summary = heap.audit().map_err(|f| f.to_string())?;
    ensure(
        summary.blocks - summary.free_blocks == live.len(),
        "audit accounting must match the surviving blocks",
    )?;
    Ok(format!(
        "{} threads interleaved, {} survivors, ledger sound",
        THREADS,
        live.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_scenario_passes() {
        let report = run_all();
        assert!(
            report.all_passed(),
            "failing scenarios: {:?}",
            report
                .scenarios
                .iter()
                .filter(|s| s.outcome == Outcome::Fail)
                .collect::<Vec<_>>()
        );
        assert_eq!(report.passed, scenario_names().len());
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = run_all();
        let body = serde_json::to_string_pretty(&report).unwrap();
        let decoded: ScenarioReport = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, report);
        assert_eq!(decoded.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn markdown_lists_every_scenario() {
        let report = run_all();
        let rendered = render_markdown(&report);
        for name in scenario_names() {
            assert!(rendered.contains(name), "missing {name} in markdown");
        }
    }
}
