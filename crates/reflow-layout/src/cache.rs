//! Memoization of layout results keyed by node identity and size constraint.
//!
//! The cache is the single synchronization point of the layout engine. Every
//! key `(node, constraint)` holds at most one RESOLVED result, stamped with the
//! epoch it belongs to, plus at most one PENDING computation per epoch.
//!
//! ## Lookup rules
//!
//! - RESOLVED at the lookup's epoch: returned immediately.
//! - RESOLVED at an older epoch: returned (and re-stamped) only when the caller
//!   asserts the node's inputs are unchanged. The cache trusts that flag and
//!   never verifies it.
//! - PENDING at the lookup's epoch: the caller blocks until the computation
//!   finishes and receives its outcome, success or failure.
//! - Otherwise the caller becomes the leader: it inserts a PENDING entry, runs
//!   the compute function with no lock held, stores the result and wakes every
//!   waiter. Failed computations are removed so the next call retries.
//!
//! Results from an older epoch never replace a newer RESOLVED entry.
//!
//! ## Invalidation floors
//!
//! [`invalidate_before`](ResolutionCache::invalidate_before) records, per
//! node, the first epoch whose results are trustworthy. Entries stamped below
//! a node's floor are never served or reused, and computations started below
//! it finish without being stored, however late they settle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use reflow_core::{Epoch, LayoutError, NodeId, SizeConstraint};

use crate::result::LayoutResult;

/// Cache key: a node and the constraint it is measured under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub node: NodeId,
    pub constraint: SizeConstraint,
}

impl CacheKey {
    pub fn new(node: NodeId, constraint: SizeConstraint) -> Self {
        Self { node, constraint }
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// This caller ran the compute function
    Computed,
    /// Resolved at the same epoch
    Hit,
    /// Resolved at an older epoch, reused because inputs were unchanged
    Reused,
    /// Waited on another caller's in-flight computation
    Joined,
    /// A result under a different but compatible constraint was substituted
    Remeasured,
}

/// Observable state of a cache entry for a given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Resolved,
    /// In flight, but invalidated; its result will not be stored
    Invalidated,
}

/// Snapshot of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub reuses: u64,
    pub joins: u64,
    pub misses: u64,
    pub failures: u64,
    pub invalidations: u64,
    /// Resolved entries currently held
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups that did not run a compute function.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.reuses + self.joins;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    reuses: AtomicU64,
    joins: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    invalidations: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct ResolvedEntry {
    epoch: Epoch,
    result: Arc<LayoutResult>,
}

impl ResolvedEntry {
    fn usable_at(&self, epoch: Epoch, inputs_unchanged: bool, floor: Epoch) -> bool {
        self.epoch >= floor && (self.epoch == epoch || (self.epoch < epoch && inputs_unchanged))
    }
}

type Outcome = Result<Arc<LayoutResult>, LayoutError>;

/// A computation in progress that other callers can wait on.
struct InFlight {
    epoch: Epoch,
    outcome: Mutex<Option<Outcome>>,
    done: Condvar,
    waiters: AtomicUsize,
    discarded: AtomicBool,
}

impl InFlight {
    fn new(epoch: Epoch) -> Arc<Self> {
        Arc::new(Self {
            epoch,
            outcome: Mutex::new(None),
            done: Condvar::new(),
            waiters: AtomicUsize::new(0),
            discarded: AtomicBool::new(false),
        })
    }

    fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::Acquire)
    }

    fn discard(&self) {
        self.discarded.store(true, Ordering::Release);
    }

    fn wait(&self) -> Outcome {
        let mut outcome = self.outcome.lock();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let finished = loop {
            if let Some(finished) = outcome.as_ref() {
                break finished.clone();
            }
            self.done.wait(&mut outcome);
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        finished
    }

    fn finish(&self, finished: Outcome) {
        *self.outcome.lock() = Some(finished);
        self.done.notify_all();
    }
}

#[derive(Default)]
struct Slot {
    resolved: Option<ResolvedEntry>,
    in_flight: SmallVec<[Arc<InFlight>; 1]>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.resolved.is_none() && self.in_flight.is_empty()
    }

    /// The live (not discarded) computation for `epoch`.
    fn flight(&self, epoch: Epoch) -> Option<&Arc<InFlight>> {
        self.in_flight
            .iter()
            .find(|f| f.epoch == epoch && !f.is_discarded())
    }
}

#[derive(Default)]
struct Entries {
    slots: FxHashMap<CacheKey, Slot>,
    /// Constraints with a slot, per node
    by_node: FxHashMap<NodeId, SmallVec<[SizeConstraint; 2]>>,
    /// Oldest epoch whose results may be stored or served, per node
    floors: FxHashMap<NodeId, Epoch>,
    floor_all: Epoch,
}

impl Entries {
    fn floor(&self, node: NodeId) -> Epoch {
        self.floors
            .get(&node)
            .map_or(self.floor_all, |&floor| floor.max(self.floor_all))
    }

    fn raise_floor(&mut self, node: NodeId, epoch: Epoch) {
        let floor = self.floors.entry(node).or_insert(epoch);
        *floor = (*floor).max(epoch);
    }

    fn raise_floor_all(&mut self, epoch: Epoch) {
        self.floor_all = self.floor_all.max(epoch);
        let floor_all = self.floor_all;
        self.floors.retain(|_, floor| *floor > floor_all);
    }

    fn slot_mut(&mut self, key: CacheKey) -> &mut Slot {
        if !self.slots.contains_key(&key) {
            self.by_node.entry(key.node).or_default().push(key.constraint);
        }
        self.slots.entry(key).or_default()
    }

    fn remove_if_empty(&mut self, key: CacheKey) {
        if self.slots.get(&key).is_some_and(Slot::is_empty) {
            self.slots.remove(&key);
            if let Some(constraints) = self.by_node.get_mut(&key.node) {
                constraints.retain(|c| *c != key.constraint);
                if constraints.is_empty() {
                    self.by_node.remove(&key.node);
                }
            }
        }
    }

    fn constraints_of(&self, node: NodeId) -> SmallVec<[SizeConstraint; 2]> {
        self.by_node.get(&node).cloned().unwrap_or_default()
    }

    /// Drop the resolved entry and discard in-flight work for `key`.
    fn evict(&mut self, key: CacheKey) -> bool {
        let Some(slot) = self.slots.get_mut(&key) else {
            return false;
        };
        for flight in &slot.in_flight {
            flight.discard();
        }
        let evicted = slot.resolved.take().is_some();
        self.remove_if_empty(key);
        evicted
    }
}

enum Role {
    Lead(Arc<InFlight>),
    Join(Arc<InFlight>),
}

/// Settles an in-flight entry as abandoned if the compute function unwinds.
struct FlightGuard<'a> {
    cache: &'a ResolutionCache,
    key: CacheKey,
    flight: &'a Arc<InFlight>,
    armed: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let abandoned = LayoutError::Abandoned {
                node: self.key.node,
                constraint: self.key.constraint,
            };
            self.cache.settle(self.key, self.flight, Err(abandoned));
        }
    }
}

/// Memoizes layout results and deduplicates concurrent computations.
///
/// Owned by one component tree (or injected by the host); there is no global
/// instance.
#[derive(Default)]
pub struct ResolutionCache {
    entries: Mutex<Entries>,
    counters: Counters,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the result for `(node, constraint)` at `epoch`, computing it at
    /// most once per key and epoch.
    ///
    /// `inputs_unchanged` is the caller's assertion that nothing relevant to
    /// measuring `node` changed since the epoch of a stored result.
    ///
    /// # Panics
    ///
    /// Panics with a [`ConstraintViolation`](reflow_core::ConstraintViolation)
    /// if `compute` returns a result that violates `constraint` or belongs to
    /// another key.
    pub fn get_or_compute<F>(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
        epoch: Epoch,
        inputs_unchanged: bool,
        compute: F,
    ) -> Result<Arc<LayoutResult>, LayoutError>
    where
        F: FnOnce() -> Result<LayoutResult, LayoutError>,
    {
        self.lookup_or_compute(node, constraint, epoch, inputs_unchanged, compute)
            .map(|(result, _)| result)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting how the
    /// lookup was satisfied.
    pub fn lookup_or_compute<F>(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
        epoch: Epoch,
        inputs_unchanged: bool,
        compute: F,
    ) -> Result<(Arc<LayoutResult>, CacheOutcome), LayoutError>
    where
        F: FnOnce() -> Result<LayoutResult, LayoutError>,
    {
        let key = CacheKey::new(node, constraint);

        let role = {
            let mut entries = self.entries.lock();
            let floor = entries.floor(node);
            let slot = entries.slot_mut(key);

            // A live computation at this epoch decides the result for every
            // caller, whatever they assert about their inputs.
            if let Some(flight) = slot.flight(epoch) {
                Role::Join(Arc::clone(flight))
            } else {
                if let Some(entry) = slot.resolved.as_mut() {
                    if entry.epoch == epoch && epoch >= floor {
                        bump(&self.counters.hits);
                        trace!(node = %node, %constraint, %epoch, "layout cache hit");
                        return Ok((Arc::clone(&entry.result), CacheOutcome::Hit));
                    }
                    if entry.usable_at(epoch, inputs_unchanged, floor) {
                        trace!(
                            node = %node,
                            %constraint,
                            from = %entry.epoch,
                            to = %epoch,
                            "reusing previous layout"
                        );
                        entry.epoch = epoch;
                        bump(&self.counters.reuses);
                        return Ok((Arc::clone(&entry.result), CacheOutcome::Reused));
                    }
                }

                let flight = InFlight::new(epoch);
                slot.in_flight.push(Arc::clone(&flight));
                Role::Lead(flight)
            }
        };

        match role {
            Role::Join(flight) => {
                bump(&self.counters.joins);
                trace!(node = %node, %constraint, %epoch, "waiting on in-flight layout");
                flight.wait().map(|result| (result, CacheOutcome::Joined))
            }
            Role::Lead(flight) => {
                bump(&self.counters.misses);
                trace!(node = %node, %constraint, %epoch, "layout cache miss");
                self.run(key, &flight, compute)
                    .map(|result| (result, CacheOutcome::Computed))
            }
        }
    }

    fn run<F>(&self, key: CacheKey, flight: &Arc<InFlight>, compute: F) -> Outcome
    where
        F: FnOnce() -> Result<LayoutResult, LayoutError>,
    {
        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            armed: true,
        };

        let outcome = compute().map(|result| {
            check_result(key, &result);
            Arc::new(result)
        });

        guard.armed = false;
        self.settle(key, flight, outcome.clone());
        outcome
    }

    /// Retire an in-flight entry, store a successful result and wake waiters.
    fn settle(&self, key: CacheKey, flight: &Arc<InFlight>, outcome: Outcome) {
        {
            let mut entries = self.entries.lock();
            let below_floor = flight.epoch < entries.floor(key.node);
            if let Some(slot) = entries.slots.get_mut(&key) {
                slot.in_flight.retain(|f| !Arc::ptr_eq(f, flight));

                if let Ok(result) = &outcome {
                    let superseded = slot
                        .resolved
                        .as_ref()
                        .is_some_and(|entry| entry.epoch > flight.epoch);
                    if !flight.is_discarded() && !superseded && !below_floor {
                        slot.resolved = Some(ResolvedEntry {
                            epoch: flight.epoch,
                            result: Arc::clone(result),
                        });
                    }
                }
            }
            entries.remove_if_empty(key);
        }

        if let Err(err) = &outcome {
            bump(&self.counters.failures);
            debug!(
                node = %key.node,
                constraint = %key.constraint,
                error = %err,
                "layout computation failed"
            );
        }
        flight.finish(outcome);
    }

    /// Find a reusable result for a deferred node without computing anything.
    ///
    /// The exact key is preferred; otherwise any resolved constraint of `node`
    /// whose result is still valid under `constraint` is returned as
    /// [`CacheOutcome::Remeasured`]. Nothing is stored under the new key.
    /// An older entry is not reused for a key with a live computation at
    /// `epoch`.
    pub fn find_compatible(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
        epoch: Epoch,
        inputs_unchanged: bool,
    ) -> Option<(Arc<LayoutResult>, CacheOutcome)> {
        let mut entries = self.entries.lock();
        let floor = entries.floor(node);

        let key = CacheKey::new(node, constraint);
        if let Some(slot) = entries.slots.get_mut(&key) {
            let computing = slot.flight(epoch).is_some();
            if let Some(entry) = slot.resolved.as_mut() {
                let reusable = entry.epoch == epoch || !computing;
                if reusable && entry.usable_at(epoch, inputs_unchanged, floor) {
                    let outcome = if entry.epoch == epoch {
                        bump(&self.counters.hits);
                        CacheOutcome::Hit
                    } else {
                        entry.epoch = epoch;
                        bump(&self.counters.reuses);
                        CacheOutcome::Reused
                    };
                    return Some((Arc::clone(&entry.result), outcome));
                }
            }
        }

        for previous in entries.constraints_of(node) {
            if previous == constraint {
                continue;
            }
            let Some(entry) = entries
                .slots
                .get(&CacheKey::new(node, previous))
                .and_then(|s| s.resolved.as_ref())
            else {
                continue;
            };
            let measured = (entry.result.width(), entry.result.height());
            if entry.usable_at(epoch, inputs_unchanged, floor)
                && previous.is_compatible_with(&constraint, measured)
            {
                bump(&self.counters.hits);
                trace!(
                    node = %node,
                    from = %previous,
                    to = %constraint,
                    "remeasure reused compatible layout"
                );
                return Some((Arc::clone(&entry.result), CacheOutcome::Remeasured));
            }
        }

        None
    }

    /// Remove every entry of `node`. Returns the number of resolved entries
    /// evicted; in-flight work for the node finishes but is not stored.
    pub fn invalidate(&self, node: NodeId) -> usize {
        let mut entries = self.entries.lock();
        let evicted = Self::evict_node(&mut entries, node);
        drop(entries);

        self.record_invalidations(evicted);
        debug!(node = %node, evicted, "invalidated node layouts");
        evicted
    }

    /// Like [`invalidate`](Self::invalidate), and also refuse every result of
    /// `node` from an epoch older than `epoch`, including results of
    /// computations that settle after this call.
    pub fn invalidate_before(&self, node: NodeId, epoch: Epoch) -> usize {
        let mut entries = self.entries.lock();
        entries.raise_floor(node, epoch);
        let evicted = Self::evict_node(&mut entries, node);
        drop(entries);

        self.record_invalidations(evicted);
        debug!(node = %node, floor = %epoch, evicted, "invalidated node layouts");
        evicted
    }

    /// Remove every entry.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let evicted = Self::evict_all(&mut entries);
        drop(entries);

        self.record_invalidations(evicted);
        debug!(evicted, "invalidated all layouts");
        evicted
    }

    /// Remove every entry and refuse results of any node from an epoch older
    /// than `epoch`.
    pub fn invalidate_all_before(&self, epoch: Epoch) -> usize {
        let mut entries = self.entries.lock();
        entries.raise_floor_all(epoch);
        let evicted = Self::evict_all(&mut entries);
        drop(entries);

        self.record_invalidations(evicted);
        debug!(floor = %epoch, evicted, "invalidated all layouts");
        evicted
    }

    fn evict_node(entries: &mut Entries, node: NodeId) -> usize {
        entries
            .constraints_of(node)
            .into_iter()
            .filter(|&constraint| entries.evict(CacheKey::new(node, constraint)))
            .count()
    }

    fn evict_all(entries: &mut Entries) -> usize {
        let keys: Vec<CacheKey> = entries.slots.keys().copied().collect();
        keys.into_iter().filter(|&key| entries.evict(key)).count()
    }

    /// Evict resolved entries of `node` that were measured with an exact axis
    /// and are not compatible with `constraint`.
    pub fn invalidate_incompatible(&self, node: NodeId, constraint: SizeConstraint) -> usize {
        let mut entries = self.entries.lock();
        let mut evicted = 0;

        for previous in entries.constraints_of(node) {
            let key = CacheKey::new(node, previous);
            let Some(slot) = entries.slots.get_mut(&key) else {
                continue;
            };
            let stale = slot.resolved.as_ref().is_some_and(|entry| {
                let measured = (entry.result.width(), entry.result.height());
                previous.has_exact_axis() && !previous.is_compatible_with(&constraint, measured)
            });
            if stale {
                slot.resolved = None;
                evicted += 1;
                entries.remove_if_empty(key);
            }
        }
        drop(entries);

        if evicted > 0 {
            self.record_invalidations(evicted);
            debug!(node = %node, %constraint, evicted, "invalidated incompatible exact layouts");
        }
        evicted
    }

    fn record_invalidations(&self, evicted: usize) {
        self.counters
            .invalidations
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// State of the entry for `(node, constraint)` at `epoch`, if any.
    pub fn entry_state(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
        epoch: Epoch,
    ) -> Option<EntryState> {
        let entries = self.entries.lock();
        let slot = entries.slots.get(&CacheKey::new(node, constraint))?;

        if slot.flight(epoch).is_some() {
            Some(EntryState::Pending)
        } else if slot.resolved.as_ref().is_some_and(|entry| entry.epoch == epoch) {
            Some(EntryState::Resolved)
        } else if slot.in_flight.iter().any(|f| f.epoch == epoch) {
            Some(EntryState::Invalidated)
        } else {
            None
        }
    }

    /// The stored result for `(node, constraint)` at exactly `epoch`.
    pub fn peek(
        &self,
        node: NodeId,
        constraint: SizeConstraint,
        epoch: Epoch,
    ) -> Option<Arc<LayoutResult>> {
        let entries = self.entries.lock();
        entries
            .slots
            .get(&CacheKey::new(node, constraint))
            .and_then(|slot| slot.resolved.as_ref())
            .filter(|entry| entry.epoch == epoch)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Number of callers blocked on the in-flight computation for a key.
    pub fn pending_waiters(&self, node: NodeId, constraint: SizeConstraint, epoch: Epoch) -> usize {
        let entries = self.entries.lock();
        entries
            .slots
            .get(&CacheKey::new(node, constraint))
            .and_then(|slot| slot.flight(epoch))
            .map_or(0, |flight| flight.waiters.load(Ordering::SeqCst))
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .slots
            .values()
            .filter(|slot| slot.resolved.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            reuses: load(&self.counters.reuses),
            joins: load(&self.counters.joins),
            misses: load(&self.counters.misses),
            failures: load(&self.counters.failures),
            invalidations: load(&self.counters.invalidations),
            entries: self.len(),
        }
    }
}

impl fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("stats", &self.stats())
            .finish()
    }
}

fn check_result(key: CacheKey, result: &LayoutResult) {
    if result.node() != key.node || result.constraint() != key.constraint {
        panic!(
            "layout result for node {} under {} cannot be stored under node {} with {}",
            result.node(),
            result.constraint(),
            key.node,
            key.constraint
        );
    }
    if let Some(violation) = result.violation() {
        panic!("{violation}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure::Measurement;
    use reflow_core::MeasureError;
    use std::cell::Cell;
    use std::time::{Duration, Instant};

    const EPOCH: Epoch = Epoch::INITIAL;

    fn layout(node: NodeId, constraint: SizeConstraint, width: u32, height: u32) -> LayoutResult {
        LayoutResult::new(node, constraint, Measurement::new(width, height), Vec::new(), EPOCH)
    }

    /// Compute and store a `width` x `height` result at `epoch`.
    fn store(
        cache: &ResolutionCache,
        node: NodeId,
        constraint: SizeConstraint,
        size: (u32, u32),
        epoch: Epoch,
    ) {
        cache
            .get_or_compute(node, constraint, epoch, false, || {
                Ok(layout(node, constraint, size.0, size.1))
            })
            .unwrap();
    }

    fn failure(node: NodeId, constraint: SizeConstraint) -> LayoutError {
        LayoutError::MeasurementFailed {
            node,
            constraint,
            source: MeasureError::new("boom"),
        }
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::exact(100, 50);
        let calls = Cell::new(0);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(layout(node, constraint, 100, 50))
        };
        let (first, outcome) = cache
            .lookup_or_compute(node, constraint, EPOCH, false, compute)
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);

        let compute = || {
            calls.set(calls.get() + 1);
            Ok(layout(node, constraint, 100, 50))
        };
        let (second, outcome) = cache
            .lookup_or_compute(node, constraint, EPOCH, false, compute)
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);

        assert_eq!(calls.get(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.entry_state(node, constraint, EPOCH), Some(EntryState::Resolved));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_constraints_are_separate_keys() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let a = SizeConstraint::exact(10, 10);
        let b = SizeConstraint::exact(20, 20);

        store(&cache, node, a, (10, 10), EPOCH);
        store(&cache, node, b, (20, 20), EPOCH);

        assert_eq!(cache.peek(node, b, EPOCH).map(|r| r.width()), Some(20));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reuse_requires_unchanged_inputs() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::at_most(100, 100);
        let next = EPOCH.next();

        store(&cache, node, constraint, (40, 40), EPOCH);

        let (_, outcome) = cache
            .lookup_or_compute(node, constraint, next, true, || unreachable!("inputs unchanged"))
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Reused);
        assert_eq!(cache.entry_state(node, constraint, next), Some(EntryState::Resolved));

        let later = next.next();
        let calls = Cell::new(0);
        let (result, outcome) = cache
            .lookup_or_compute(node, constraint, later, false, || {
                calls.set(calls.get() + 1);
                Ok(layout(node, constraint, 60, 60))
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(calls.get(), 1);
        assert_eq!(result.width(), 60);
    }

    #[test]
    fn test_live_computation_wins_over_reuse() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::at_most(100, 100);
        let next = EPOCH.next();
        store(&cache, node, constraint, (40, 40), EPOCH);

        std::thread::scope(|scope| {
            let leader = scope.spawn(|| {
                cache.lookup_or_compute(node, constraint, next, false, || {
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while cache.pending_waiters(node, constraint, next) == 0
                        && Instant::now() < deadline
                    {
                        std::thread::yield_now();
                    }
                    Ok(layout(node, constraint, 60, 60))
                })
            });

            while cache.entry_state(node, constraint, next) != Some(EntryState::Pending) {
                std::thread::yield_now();
            }
            let (joined, outcome) = cache
                .lookup_or_compute(node, constraint, next, true, || {
                    unreachable!("a computation is already running")
                })
                .unwrap();
            let (led, led_outcome) = leader.join().unwrap().unwrap();

            assert_eq!(outcome, CacheOutcome::Joined);
            assert_eq!(led_outcome, CacheOutcome::Computed);
            assert!(Arc::ptr_eq(&joined, &led));
            assert_eq!(joined.width(), 60);
        });

        assert_eq!(cache.peek(node, constraint, next).map(|r| r.width()), Some(60));
        assert_eq!(cache.stats().reuses, 0);
    }

    #[test]
    fn test_failure_is_not_stored() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::exact(10, 10);

        let err = cache
            .get_or_compute(node, constraint, EPOCH, false, || Err(failure(node, constraint)))
            .unwrap_err();
        assert_eq!(err, failure(node, constraint));
        assert_eq!(cache.entry_state(node, constraint, EPOCH), None);
        assert!(cache.is_empty());

        let calls = Cell::new(0);
        cache
            .get_or_compute(node, constraint, EPOCH, false, || {
                calls.set(calls.get() + 1);
                Ok(layout(node, constraint, 10, 10))
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    #[should_panic(expected = "violates")]
    fn test_inconsistent_result_panics() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::exact(10, 10);
        store(&cache, node, constraint, (11, 10), EPOCH);
    }

    #[test]
    fn test_panicking_compute_is_abandoned() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::exact(10, 10);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.get_or_compute(node, constraint, EPOCH, false, || {
                panic!("measure exploded")
            });
        }));
        assert!(unwound.is_err());
        assert_eq!(cache.entry_state(node, constraint, EPOCH), None);

        let result = cache
            .get_or_compute(node, constraint, EPOCH, false, || Ok(layout(node, constraint, 10, 10)))
            .unwrap();
        assert_eq!(result.width(), 10);
    }

    #[test]
    fn test_older_epoch_does_not_overwrite_newer() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::at_most(50, 50);
        let next = EPOCH.next();

        store(&cache, node, constraint, (30, 30), next);
        let stale = cache
            .get_or_compute(node, constraint, EPOCH, false, || Ok(layout(node, constraint, 20, 20)))
            .unwrap();

        assert_eq!(stale.width(), 20);
        assert_eq!(cache.peek(node, constraint, next).map(|r| r.width()), Some(30));
        assert!(cache.peek(node, constraint, EPOCH).is_none());
    }

    #[test]
    fn test_find_compatible() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let loose = SizeConstraint::at_most(100, 100);
        store(&cache, node, loose, (60, 40), EPOCH);
        let stricter = SizeConstraint::at_most(80, 80);

        // Stricter bound that still fits the measurement
        let (result, outcome) = cache.find_compatible(node, stricter, EPOCH, false).unwrap();
        assert_eq!(outcome, CacheOutcome::Remeasured);
        assert_eq!((result.width(), result.height()), (60, 40));

        // Exact size equal to the measurement
        let exact = SizeConstraint::exact(60, 40);
        assert!(cache.find_compatible(node, exact, EPOCH, false).is_some());

        // Too small
        let small = SizeConstraint::at_most(50, 50);
        assert!(cache.find_compatible(node, small, EPOCH, false).is_none());

        // Older epoch needs the reuse assertion
        assert!(cache.find_compatible(node, stricter, EPOCH.next(), false).is_none());
        assert!(cache.find_compatible(node, stricter, EPOCH.next(), true).is_some());

        // The compatible result is never stored under the new key
        assert!(cache.peek(node, stricter, EPOCH).is_none());
    }

    #[test]
    fn test_invalidate_node() {
        let cache = ResolutionCache::new();
        let a = NodeId::next();
        let b = NodeId::next();
        let c1 = SizeConstraint::exact(1, 1);
        let c2 = SizeConstraint::exact(2, 2);

        store(&cache, a, c1, (1, 1), EPOCH);
        store(&cache, a, c2, (2, 2), EPOCH);
        store(&cache, b, c1, (1, 1), EPOCH);

        assert_eq!(cache.invalidate(a), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate(a), 0);
        assert_eq!(cache.invalidate_all(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[test]
    fn test_invalidate_during_computation_discards_result() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::exact(5, 5);

        let result = cache
            .get_or_compute(node, constraint, EPOCH, false, || {
                assert_eq!(cache.entry_state(node, constraint, EPOCH), Some(EntryState::Pending));
                cache.invalidate(node);
                let state = cache.entry_state(node, constraint, EPOCH);
                assert_eq!(state, Some(EntryState::Invalidated));
                Ok(layout(node, constraint, 5, 5))
            })
            .unwrap();

        assert_eq!(result.width(), 5);
        assert_eq!(cache.entry_state(node, constraint, EPOCH), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidation_floor_refuses_older_results() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let constraint = SizeConstraint::at_most(50, 50);
        let next = EPOCH.next();

        // Invalidated while computing at the old epoch
        let late = cache
            .get_or_compute(node, constraint, EPOCH, false, || {
                cache.invalidate_before(node, next);
                Ok(layout(node, constraint, 20, 20))
            })
            .unwrap();
        assert_eq!(late.width(), 20);
        assert!(cache.is_empty());

        // Started after the invalidation, still at the old epoch
        store(&cache, node, constraint, (20, 20), EPOCH);
        assert!(cache.peek(node, constraint, EPOCH).is_none());
        assert!(cache.find_compatible(node, constraint, next, true).is_none());

        let calls = Cell::new(0);
        let (_, outcome) = cache
            .lookup_or_compute(node, constraint, next, true, || {
                calls.set(calls.get() + 1);
                Ok(layout(node, constraint, 30, 30))
            })
            .unwrap();
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.peek(node, constraint, next).map(|r| r.width()), Some(30));

        // A global floor covers every node
        let other = NodeId::next();
        store(&cache, other, constraint, (10, 10), next);
        assert_eq!(cache.invalidate_all_before(next.next()), 2);
        store(&cache, other, constraint, (10, 10), next);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_incompatible_only_touches_exact_entries() {
        let cache = ResolutionCache::new();
        let node = NodeId::next();
        let exact = SizeConstraint::exact(100, 100);
        let loose = SizeConstraint::at_most(100, 100);

        store(&cache, node, exact, (100, 100), EPOCH);
        store(&cache, node, loose, (30, 30), EPOCH);

        // Same exact size stays compatible
        assert_eq!(cache.invalidate_incompatible(node, SizeConstraint::exact(100, 100)), 0);

        assert_eq!(cache.invalidate_incompatible(node, SizeConstraint::exact(200, 200)), 1);
        assert!(cache.peek(node, exact, EPOCH).is_none());
        assert!(cache.peek(node, loose, EPOCH).is_some());
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            hits: 2,
            reuses: 1,
            joins: 1,
            misses: 4,
            ..Default::default()
        };
        assert!((stats.hit_ratio() - 0.5).abs() < 1e-9);
        assert_eq!(CacheStats::default().hit_ratio(), 0.0);
    }
}
