//! Incremental reconciliation of one run's candidates against stored history.
//!
//! Both axes follow the same pattern: snapshot the flagged set before touching
//! anything, raise the flag on candidates that lack it, then clear it on every
//! snapshot member that is no longer a candidate. Differences are always taken
//! against the pre-run snapshot, never against a store that is being mutated.

use crate::collab::Failure;
use crate::store::{StateStore, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

/// What to do when the store reports `DuplicateKey` or `NotFound` mid-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Fail the pass with the store error.
    Abort,
    /// Log it, record it on the delta and carry on with the next domain.
    Skip,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ViolationPolicy::Abort
        } else {
            ViolationPolicy::Skip
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Active,
    Live,
}

impl Axis {
    fn label(self) -> &'static str {
        match self {
            Axis::Active => "active",
            Axis::Live => "live",
        }
    }

    fn snapshot<S: StateStore + ?Sized>(self, store: &S) -> Result<BTreeSet<String>, StoreError> {
        match self {
            Axis::Active => store.list_active(),
            Axis::Live => store.list_live(),
        }
    }

    fn set<S: StateStore + ?Sized>(self, store: &S, domain: &str, value: bool) -> Result<(), StoreError> {
        match self {
            Axis::Active => store.set_active(domain, value),
            Axis::Live => store.set_live(domain, value),
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AxisDelta {
    pub added: Vec<String>,
    pub deprecated: Vec<String>,
    /// Invariant violations skipped under [`ViolationPolicy::Skip`].
    pub skipped: Vec<Failure>,
}

/// The four lists reported to the operator after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub new_active: Vec<String>,
    pub new_live: Vec<String>,
    pub deprecated_active: Vec<String>,
    pub deprecated_live: Vec<String>,
}

impl Delta {
    pub fn from_axes(active: &AxisDelta, live: &AxisDelta) -> Self {
        Delta {
            new_active: active.added.clone(),
            new_live: live.added.clone(),
            deprecated_active: active.deprecated.clone(),
            deprecated_live: live.deprecated.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.new_active.is_empty()
            && self.new_live.is_empty()
            && self.deprecated_active.is_empty()
            && self.deprecated_live.is_empty()
    }
}

pub struct Reconciler<'a, S: StateStore + ?Sized> {
    store: &'a S,
    policy: ViolationPolicy,
}

impl<'a, S: StateStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Reconciler { store, policy: ViolationPolicy::default() }
    }

    pub fn with_policy(mut self, policy: ViolationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Active axis over this run's deduplicated candidate set. Unknown domains
    /// are inserted, known inactive ones reactivated, and previously active
    /// domains missing from `candidates` deprecated.
    pub fn active(&self, candidates: &BTreeSet<String>) -> Result<AxisDelta, StoreError> {
        self.pass(Axis::Active, candidates)
    }

    /// Live axis. Only domains that are both in `active_candidates` and reported
    /// by the probe are eligible; anything else the probe returned is ignored.
    pub fn live(
        &self,
        active_candidates: &BTreeSet<String>,
        responsive: &BTreeSet<String>,
    ) -> Result<AxisDelta, StoreError> {
        let stray = responsive.difference(active_candidates).count();
        if stray > 0 {
            warn!(stray, "probe reported hosts outside the active candidate set; ignoring them");
        }
        let eligible: BTreeSet<String> = responsive.intersection(active_candidates).cloned().collect();
        self.pass(Axis::Live, &eligible)
    }

    fn pass(&self, axis: Axis, candidates: &BTreeSet<String>) -> Result<AxisDelta, StoreError> {
        let prior = axis.snapshot(self.store)?;
        let mut delta = AxisDelta::default();

        for domain in candidates {
            if prior.contains(domain) {
                continue;
            }
            // not in the snapshot: either unseen, or seen and currently unflagged
            let result = if axis == Axis::Active && !self.store.exists(domain)? {
                self.store.insert(domain)
            } else {
                axis.set(self.store, domain, true)
            };
            match result {
                Ok(()) => {
                    debug!(axis = axis.label(), %domain, "flag raised");
                    delta.added.push(domain.clone());
                }
                Err(e) => self.absorb(axis, e, &mut delta)?,
            }
        }

        for domain in prior.difference(candidates) {
            match axis.set(self.store, domain, false) {
                Ok(()) => {
                    debug!(axis = axis.label(), %domain, "flag cleared");
                    delta.deprecated.push(domain.clone());
                }
                Err(e) => self.absorb(axis, e, &mut delta)?,
            }
        }

        info!(
            axis = axis.label(),
            candidates = candidates.len(),
            added = delta.added.len(),
            deprecated = delta.deprecated.len(),
            "reconciliation pass complete"
        );
        Ok(delta)
    }

    fn absorb(&self, axis: Axis, err: StoreError, delta: &mut AxisDelta) -> Result<(), StoreError> {
        if !err.is_invariant_violation() || self.policy == ViolationPolicy::Abort {
            return Err(err);
        }
        error!(axis = axis.label(), error = %err, "skipping domain after store invariant violation");
        delta.skipped.push(Failure::new(format!("reconcile:{}", axis.label()), "invariant", &err));
        Ok(())
    }
}
