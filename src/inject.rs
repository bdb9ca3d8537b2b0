//! Fault injection: a named, call-site-cached decision table that lets
//! tests force a specific call in a specific caller to fail on the Nth
//! invocation.
//!
//! Grounded on `ext/tlib/injection.c` in full: the djb2 `hash_chars`
//! bucketing, the per-name condition list keyed by caller symbol with `*`
//! as a wildcard fallback, and the trigger rule (`hit_count++ == trigger ||
//! trigger == ~0`). The call-stack capture (`ext/tlib/callstack.c`, skip 2
//! frames, up to 8 symbols, each truncated to 63 characters) is
//! reimplemented with `std::backtrace::Backtrace` instead of a raw
//! frame-pointer walk, since Rust has no portable equivalent of
//! `CaptureStackBackTrace` in safe code.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

const WILDCARD_CALLER: &str = "*";
const MAX_SYMBOLS: usize = 8;
const MAX_SYMBOL_LEN: usize = 63;
const SKIP_FRAMES: usize = 2;
/// `~0u32`: trigger on every call, not just the Nth.
pub const TRIGGER_ALWAYS: u32 = u32::MAX;

#[derive(Default)]
struct Condition {
    trigger: u32,
    hit_count: u32,
}

/// Conditions in most-recently-enabled-first order: `enable` moves a
/// caller's condition to the front (inserting it if new), matching a linked
/// list that always prepends on `injection_cond_set`.
#[derive(Default)]
struct Entry {
    conditions: Vec<(String, Condition)>,
}

impl Entry {
    /// Returns whether this call should be made to fail, given the set of
    /// caller symbols observed on the current stack. Walks conditions in
    /// registration order (most recent first); the first non-wildcard
    /// condition whose caller matches any observed frame wins, falling back
    /// to the wildcard condition if none does.
    fn trace(&mut self, callers: &[String]) -> bool {
        if self.conditions.is_empty() {
            return false;
        }
        let idx = self
            .conditions
            .iter()
            .position(|(key, _)| key != WILDCARD_CALLER && callers.iter().any(|c| c == key))
            .or_else(|| self.conditions.iter().position(|(key, _)| key == WILDCARD_CALLER));
        let Some(idx) = idx else {
            return false;
        };
        let cond = &mut self.conditions[idx].1;
        let hit = cond.hit_count;
        cond.hit_count = cond.hit_count.wrapping_add(1);
        hit == cond.trigger || cond.trigger == TRIGGER_ALWAYS
    }
}

/// Process-wide table of injection points, keyed by name.
///
/// Modeled as a `RwLock`-guarded map behind a `OnceLock` rather than
/// file-scope mutable statics, with the public API taking `&self` so
/// ownership stays explicit.
#[derive(Default)]
pub struct InjectionTable {
    entries: RwLock<HashMap<String, Arc<RwLock<Entry>>>>,
}

static GLOBAL: OnceLock<InjectionTable> = OnceLock::new();

impl InjectionTable {
    pub fn global() -> &'static InjectionTable {
        GLOBAL.get_or_init(InjectionTable::default)
    }

    /// Looks up (or lazily creates) the named injection point and returns a
    /// handle a call site can cache once in a `static` the way `INJECT`
    /// caches the entry pointer returned by `tlib_injection`.
    pub fn point(&self, name: &str) -> InjectionPoint {
        if let Some(e) = self.entries.read().unwrap().get(name) {
            return InjectionPoint(e.clone());
        }
        let mut w = self.entries.write().unwrap();
        let entry = w
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Entry::default())))
            .clone();
        InjectionPoint(entry)
    }

    /// Configures `name` to trigger when called from `caller` (or from any
    /// caller if `caller` is `"*"`), on the call whose 0-based hit count
    /// equals `trigger` (or every call, if `trigger == TRIGGER_ALWAYS`).
    pub fn enable(&self, name: &str, caller: &str, trigger: u32) {
        let point = self.point(name);
        let mut e = point.0.write().unwrap();
        e.conditions.retain(|(key, _)| key != caller);
        e.conditions.insert(0, (caller.to_string(), Condition { trigger, hit_count: 0 }));
    }

    pub fn disable(&self, name: &str, caller: &str) {
        let point = self.point(name);
        let mut e = point.0.write().unwrap();
        e.conditions.retain(|(key, _)| key != caller);
    }
}

/// A cached handle to one named injection point.
#[derive(Clone)]
pub struct InjectionPoint(Arc<RwLock<Entry>>);

impl InjectionPoint {
    /// Captures the current call stack and asks the entry whether this
    /// call should be made to fail. Equivalent to `tlib_injection_trace`.
    pub fn should_trigger(&self) -> bool {
        // Fast path: no conditions configured, skip the (relatively
        // expensive) backtrace capture entirely.
        if self.0.read().unwrap().conditions.is_empty() {
            return false;
        }
        let callers = capture_caller_symbols();
        self.0.write().unwrap().trace(&callers)
    }
}

fn capture_caller_symbols() -> Vec<String> {
    let bt = Backtrace::force_capture();
    let text = format!("{bt:#?}");
    text.lines()
        .filter(|l| l.trim_start().starts_with(|c: char| c.is_ascii_digit()))
        .skip(SKIP_FRAMES)
        .take(MAX_SYMBOLS)
        .map(|l| truncate_symbol(l.trim()))
        .collect()
}

fn truncate_symbol(s: &str) -> String {
    if s.len() <= MAX_SYMBOL_LEN {
        s.to_string()
    } else {
        s[..MAX_SYMBOL_LEN].to_string()
    }
}

/// Convenience entry point mirroring the `INJECT(name, action)` call-site
/// macro: looks up `name` (the lookup itself is cheap once the caller
/// caches an [`InjectionPoint`]) and returns whether to trigger.
pub fn inject(name: &str) -> bool {
    InjectionTable::global().point(name).should_trigger()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trigger_always_fires_every_call() {
        let table = InjectionTable::default();
        table.enable("malloc", "*", TRIGGER_ALWAYS);
        let p = table.point("malloc");
        assert!(p.should_trigger());
        assert!(p.should_trigger());
    }

    #[test]
    fn trigger_index_fires_once_at_the_right_hit() {
        let table = InjectionTable::default();
        table.enable("malloc", "*", 1);
        let p = table.point("malloc");
        assert!(!p.should_trigger()); // hit 0
        assert!(p.should_trigger()); // hit 1
        assert!(!p.should_trigger()); // hit 2
    }

    #[test]
    fn no_conditions_never_triggers() {
        let table = InjectionTable::default();
        let p = table.point("untouched");
        assert!(!p.should_trigger());
    }

    #[test]
    fn disabling_a_caller_is_independent_of_the_wildcard() {
        let table = InjectionTable::default();
        table.enable("malloc", "*", TRIGGER_ALWAYS);
        table.enable("malloc", "BuildIndex", 5);
        table.disable("malloc", "BuildIndex");
        let p = table.point("malloc");
        // BuildIndex condition is gone, falls back to wildcard trigger-always.
        assert!(p.should_trigger());
    }

    /// When two non-wildcard conditions are both present among the observed
    /// frames, the one enabled more recently wins, not the one tied to the
    /// nearer frame.
    #[test]
    fn trace_prefers_the_more_recently_enabled_matching_condition() {
        let mut entry = Entry::default();
        entry.conditions.push(("A".to_string(), Condition { trigger: 0, hit_count: 0 }));
        entry.conditions.insert(0, ("B".to_string(), Condition { trigger: TRIGGER_ALWAYS, hit_count: 0 }));

        // "A" is the nearer frame, "B" the farther one, but "B" was enabled
        // more recently and must still be the one consulted.
        let callers = vec!["A".to_string(), "B".to_string()];
        assert!(entry.trace(&callers));
        assert_eq!(entry.conditions[0].1.hit_count, 1, "B's condition was consulted");
        assert_eq!(entry.conditions[1].1.hit_count, 0, "A's condition was left untouched");
    }

    #[test]
    fn enable_moves_an_existing_caller_condition_to_the_front() {
        let table = InjectionTable::default();
        table.enable("malloc", "A", 0);
        table.enable("malloc", "B", 0);
        table.enable("malloc", "A", TRIGGER_ALWAYS);
        let p = table.point("malloc");
        let entry = p.0.read().unwrap();
        assert_eq!(entry.conditions[0].0, "A");
        assert_eq!(entry.conditions.len(), 2, "re-enabling A must not duplicate it");
    }
}
