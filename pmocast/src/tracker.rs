//! One-shot completions and single-slot request bookkeeping.
//!
//! A [`Completion`] is resolved exactly once: resolving consumes it, and
//! dropping it unresolved reports [`CastError::Cancelled`]. A [`RequestSlot`]
//! holds at most one pending completion together with a generation number
//! so that late results for an older request can be recognised and dropped.

use std::fmt;

use crossbeam_channel::{Receiver, bounded};
use tracing::debug;

use crate::errors::{CastError, CastResult};

type Callback<T> = Box<dyn FnOnce(CastResult<T>) + Send>;

pub struct Completion<T> {
    callback: Option<Callback<T>>,
}

impl<T> Completion<T> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(CastResult<T>) + Send + 'static,
    {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    /// A completion that forwards its outcome to the returned receiver.
    pub fn channel() -> (Self, Receiver<CastResult<T>>)
    where
        T: Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let completion = Self::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (completion, rx)
    }

    /// A completion whose outcome nobody waits for.
    pub fn ignore() -> Self {
        Self { callback: None }
    }

    pub fn resolve(mut self, outcome: CastResult<T>) {
        if let Some(callback) = self.callback.take() {
            callback(outcome);
        }
    }

    pub fn succeed(self, value: T) {
        self.resolve(Ok(value));
    }

    pub fn fail(self, error: CastError) {
        self.resolve(Err(error));
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(Err(CastError::Cancelled));
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}

/// At most one pending request, tagged with a monotonically increasing
/// generation.
#[derive(Debug)]
pub struct RequestSlot<T> {
    name: &'static str,
    generation: u64,
    pending: Option<Completion<T>>,
}

impl<T> RequestSlot<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            generation: 0,
            pending: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.pending.is_some() && self.generation == generation
    }

    /// Installs `completion` unless a request is already pending, in which
    /// case the newcomer is failed with `Busy` and the pending one is left
    /// untouched.
    pub fn install_exclusive(&mut self, completion: Completion<T>) -> Option<u64> {
        if self.pending.is_some() {
            debug!(slot = self.name, generation = self.generation, "Request slot busy");
            completion.fail(CastError::Busy);
            return None;
        }
        Some(self.install(completion))
    }

    /// Resolves any pending request with `Superseded`, then installs
    /// `completion`.
    pub fn supersede(&mut self, completion: Completion<T>) -> u64 {
        if let Some(previous) = self.pending.take() {
            debug!(slot = self.name, generation = self.generation, "Superseding pending request");
            previous.fail(CastError::Superseded);
        }
        self.install(completion)
    }

    fn install(&mut self, completion: Completion<T>) -> u64 {
        self.generation += 1;
        self.pending = Some(completion);
        self.generation
    }

    /// Resolves the pending request if `generation` is still current.
    /// Returns false, dropping `outcome`, for stale generations.
    pub fn resolve(&mut self, generation: u64, outcome: CastResult<T>) -> bool {
        if !self.is_current(generation) {
            debug!(
                slot = self.name,
                generation,
                current = self.generation,
                "Dropping stale request outcome"
            );
            return false;
        }
        if let Some(completion) = self.pending.take() {
            completion.resolve(outcome);
        }
        true
    }

    pub fn take_current(&mut self) -> Option<(u64, Completion<T>)> {
        self.pending
            .take()
            .map(|completion| (self.generation, completion))
    }
}
