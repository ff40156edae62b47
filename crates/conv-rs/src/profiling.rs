//! Scope-guard profiler for layer, functional, and backend phases.
//!
//! Scopes are free when the `profiler` feature is off: guards compile to empty structs and
//! metadata closures are never evaluated. With the feature on, each thread keeps a guard stack
//! so parents report exclusive time separately from time spent in nested scopes.

#[cfg(feature = "profiler")]
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
#[cfg(feature = "profiler")]
use std::time::Instant;

use serde::Serialize;

#[cfg_attr(not(feature = "profiler"), allow(dead_code))]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ProfilerKey {
    Layer {
        name: &'static str,
    },
    Functional {
        op: &'static str,
        implementation: &'static str,
    },
    Backend {
        name: &'static str,
    },
    Cache {
        name: &'static str,
    },
}

impl ProfilerKey {
    fn kind(&self) -> &'static str {
        match self {
            ProfilerKey::Layer { .. } => "layer",
            ProfilerKey::Functional { .. } => "functional",
            ProfilerKey::Backend { .. } => "backend",
            ProfilerKey::Cache { .. } => "cache",
        }
    }

    fn label(&self) -> String {
        match self {
            ProfilerKey::Layer { name }
            | ProfilerKey::Backend { name }
            | ProfilerKey::Cache { name } => (*name).to_string(),
            ProfilerKey::Functional { op, implementation } => format!("{op}[{implementation}]"),
        }
    }
}

#[cfg_attr(not(feature = "profiler"), allow(dead_code))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkStats {
    pub elements: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub flops: u64,
    pub alloc_bytes: u64,
    pub alloc_count: u64,
}

impl WorkStats {
    #[cfg_attr(not(feature = "profiler"), allow(dead_code))]
    fn accumulate(&mut self, other: WorkStats) {
        self.elements = self.elements.saturating_add(other.elements);
        self.bytes_read = self.bytes_read.saturating_add(other.bytes_read);
        self.bytes_written = self.bytes_written.saturating_add(other.bytes_written);
        self.flops = self.flops.saturating_add(other.flops);
        self.alloc_bytes = self.alloc_bytes.saturating_add(other.alloc_bytes);
        self.alloc_count = self.alloc_count.saturating_add(other.alloc_count);
    }
}

#[derive(Default, Clone)]
struct Stat {
    calls: u64,
    exclusive_ns: u128,
    inclusive_ns: u128,
    work: WorkStats,
}

struct Profiler {
    stats: Mutex<HashMap<ProfilerKey, Stat>>,
}

impl Profiler {
    fn instance() -> &'static Self {
        static INSTANCE: OnceLock<Profiler> = OnceLock::new();
        INSTANCE.get_or_init(|| Profiler {
            stats: Mutex::new(HashMap::new()),
        })
    }

    #[cfg_attr(not(feature = "profiler"), allow(dead_code))]
    fn record(&self, key: ProfilerKey, exclusive: Duration, inclusive: Duration, work: WorkStats) {
        let mut stats = self.stats.lock().expect("profiler mutex poisoned");
        let entry = stats.entry(key).or_default();
        entry.calls = entry.calls.saturating_add(1);
        entry.exclusive_ns = entry.exclusive_ns.saturating_add(exclusive.as_nanos());
        entry.inclusive_ns = entry.inclusive_ns.saturating_add(inclusive.as_nanos());
        entry.work.accumulate(work);
    }

    fn take_stats(&self) -> HashMap<ProfilerKey, Stat> {
        let mut stats = self.stats.lock().expect("profiler mutex poisoned");
        std::mem::take(&mut *stats)
    }
}

#[cfg(feature = "profiler")]
struct GuardFrame {
    key: ProfilerKey,
    start: Instant,
    child_time: Duration,
    work: WorkStats,
}

#[cfg(feature = "profiler")]
thread_local! {
    static ACTIVE_GUARDS: RefCell<Vec<GuardFrame>> = const { RefCell::new(Vec::new()) };
}

pub struct ScopeGuard {
    #[cfg(feature = "profiler")]
    key: Option<ProfilerKey>,
}

impl ScopeGuard {
    #[inline(always)]
    fn new(key: ProfilerKey) -> Self {
        Self::new_with_work(key, WorkStats::default())
    }

    #[inline(always)]
    fn new_with_work(key: ProfilerKey, work: WorkStats) -> Self {
        #[cfg(feature = "profiler")]
        {
            ACTIVE_GUARDS.with(|stack| {
                stack.borrow_mut().push(GuardFrame {
                    key,
                    start: Instant::now(),
                    child_time: Duration::ZERO,
                    work,
                });
            });
            ScopeGuard { key: Some(key) }
        }
        #[cfg(not(feature = "profiler"))]
        {
            let _ = key;
            let _ = work;
            ScopeGuard {}
        }
    }
}

#[cfg(feature = "profiler")]
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(expected) = self.key else {
            return;
        };
        ACTIVE_GUARDS.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.pop() else {
                return;
            };
            debug_assert!(frame.key == expected, "scope guard stack corrupted");

            let elapsed = frame.start.elapsed();
            let exclusive = elapsed.saturating_sub(frame.child_time);
            Profiler::instance().record(frame.key, exclusive, elapsed, frame.work);

            if let Some(parent) = stack.last_mut() {
                parent.child_time = parent.child_time.saturating_add(elapsed);
            }
        });
    }
}

#[derive(Default, Clone, Copy)]
pub struct ScopeMeta {
    work: WorkStats,
}

impl ScopeMeta {
    pub fn with_work(mut self, work: WorkStats) -> Self {
        self.work = work;
        self
    }
}

#[inline(always)]
pub fn layer_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard::new(ProfilerKey::Layer { name })
}

#[inline(always)]
pub fn functional_scope(op: &'static str, implementation: &'static str) -> ScopeGuard {
    ScopeGuard::new(ProfilerKey::Functional { op, implementation })
}

#[inline(always)]
pub fn backend_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard::new(ProfilerKey::Backend { name })
}

#[inline(always)]
pub fn backend_scope_with_meta<F>(name: &'static str, meta: F) -> ScopeGuard
where
    F: FnOnce() -> ScopeMeta,
{
    #[cfg(feature = "profiler")]
    {
        ScopeGuard::new_with_work(ProfilerKey::Backend { name }, meta().work)
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = meta;
        backend_scope(name)
    }
}

/// Counts a zero-duration event such as a cache hit or miss.
#[inline(always)]
pub fn cache_event(name: &'static str) {
    #[cfg(feature = "profiler")]
    {
        Profiler::instance().record(
            ProfilerKey::Cache { name },
            Duration::ZERO,
            Duration::ZERO,
            WorkStats::default(),
        );
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRow {
    pub kind: &'static str,
    pub name: String,
    pub calls: u64,
    pub exclusive_ms: f64,
    pub inclusive_ms: f64,
    pub work: WorkStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfilerReport {
    pub rows: Vec<ProfileRow>,
}

impl ProfilerReport {
    pub fn row(&self, kind: &str, name: &str) -> Option<&ProfileRow> {
        self.rows
            .iter()
            .find(|row| row.kind == kind && row.name == name)
    }

    /// Fixed-width table, one row per scope, heaviest exclusive time first.
    pub fn format_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<10} {:<48} {:>8} {:>12} {:>12} {:>14}",
            "kind", "name", "calls", "excl_ms", "incl_ms", "flops"
        );
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{:<10} {:<48} {:>8} {:>12.3} {:>12.3} {:>14}",
                row.kind, row.name, row.calls, row.exclusive_ms, row.inclusive_ms, row.work.flops
            );
        }
        out
    }
}

fn ns_to_ms(ns: u128) -> f64 {
    ns as f64 / 1_000_000.0
}

/// Drains accumulated stats. Returns `None` when nothing was recorded.
pub fn take_report() -> Option<ProfilerReport> {
    let stats = Profiler::instance().take_stats();
    if stats.is_empty() {
        return None;
    }
    let mut rows: Vec<ProfileRow> = stats
        .into_iter()
        .map(|(key, stat)| ProfileRow {
            kind: key.kind(),
            name: key.label(),
            calls: stat.calls,
            exclusive_ms: ns_to_ms(stat.exclusive_ns),
            inclusive_ms: ns_to_ms(stat.inclusive_ns),
            work: stat.work,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.exclusive_ms
            .total_cmp(&a.exclusive_ms)
            .then_with(|| a.kind.cmp(b.kind))
            .then_with(|| a.name.cmp(&b.name))
    });
    Some(ProfilerReport { rows })
}

/// Discards everything recorded so far.
pub fn reset() {
    let _ = Profiler::instance().take_stats();
}
