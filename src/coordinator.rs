//! Optimistic mutations over an in-memory collection view
//!
//! A mutation changes the local view first, then runs the remote write. If
//! the remote write fails, only the mutated record is put back to its state
//! from just before the local change; other records keep whatever they hold
//! at that moment, including changes of mutations still in flight. Nothing is
//! put back once an authoritative snapshot has arrived in between.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::Record;

/// Outcome of a mutation whose local half has already been applied
pub type Pending = BoxFuture<'static, Result<()>>;

struct ViewState<R> {
    records: Vec<R>,
    /// Bumped by every authoritative snapshot
    generation: u64,
}

/// Shared, ordered list of records rendered by the dashboard
pub struct CollectionView<R> {
    state: Arc<RwLock<ViewState<R>>>,
}

impl<R> Clone for CollectionView<R> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<R: Record> Default for CollectionView<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> CollectionView<R> {
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn from_records(records: Vec<R>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ViewState {
                records,
                generation: 0,
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewState<R>> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewState<R>> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current records, in display order
    pub fn snapshot(&self) -> Vec<R> {
        self.read().records.clone()
    }

    pub fn get(&self, id: &str) -> Option<R> {
        self.read().records.iter().find(|r| r.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the current records without copying them
    pub fn with<T>(&self, f: impl FnOnce(&[R]) -> T) -> T {
        f(&self.read().records)
    }

    /// Number of authoritative snapshots received so far
    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Install an authoritative snapshot from the store
    pub fn replace(&self, records: Vec<R>) {
        let mut state = self.write();
        state.records = records;
        state.generation += 1;
    }

    /// Change the records locally; the change is not a snapshot and leaves
    /// the generation alone
    pub fn modify(&self, f: impl FnOnce(&mut Vec<R>)) {
        f(&mut self.write().records);
    }

    /// Put the record `id` back to `prior` (its index and value captured at
    /// `generation`), or drop it when it did not exist then. Refused when a
    /// newer authoritative snapshot has been installed since.
    fn revert(&self, id: &str, prior: Option<(usize, R)>, generation: u64) -> bool {
        let mut state = self.write();
        if state.generation != generation {
            return false;
        }
        let current = state.records.iter().position(|r| r.id() == id);
        match (current, prior) {
            (Some(index), Some((_, record))) => state.records[index] = record,
            (Some(index), None) => {
                state.records.remove(index);
            }
            (None, Some((index, record))) => {
                let index = index.min(state.records.len());
                state.records.insert(index, record);
            }
            (None, None) => {}
        }
        true
    }
}

/// Applies mutations to a view before the store confirms them
pub struct OptimisticCoordinator<R> {
    view: CollectionView<R>,
}

impl<R> Clone for OptimisticCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<R: Record> OptimisticCoordinator<R> {
    pub fn new(view: CollectionView<R>) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &CollectionView<R> {
        &self.view
    }

    /// Apply `local` to the view now and return the remote outcome
    ///
    /// `local` must only touch the record `entity_id`. The view reflects the
    /// change as soon as this returns, before the returned future is first
    /// polled.
    pub fn apply<F, Fut>(
        &self,
        entity_id: &str,
        local: impl FnOnce(&mut Vec<R>),
        remote: F,
    ) -> Pending
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.apply_checked(entity_id, |_| Ok(()), local, remote) {
            Ok(pending) => pending,
            Err(e) => Box::pin(futures_util::future::ready(Err(e))),
        }
    }

    /// Like [`apply`](Self::apply), but first evaluate `check` against the
    /// current records; a failed check leaves the view untouched and never
    /// calls `remote`
    pub fn apply_checked<F, Fut>(
        &self,
        entity_id: &str,
        check: impl FnOnce(&[R]) -> Result<()>,
        local: impl FnOnce(&mut Vec<R>),
        remote: F,
    ) -> Result<Pending>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (prior, generation) = {
            let mut state = self.view.write();
            check(&state.records)?;
            let prior = state
                .records
                .iter()
                .position(|r| r.id() == entity_id)
                .map(|index| (index, state.records[index].clone()));
            local(&mut state.records);
            (prior, state.generation)
        };

        let remote = remote();
        let view = self.view.clone();
        let id = entity_id.to_string();
        Ok(Box::pin(async move {
            match remote.await {
                Ok(()) => {
                    debug!("Remote write for {} confirmed", id);
                    Ok(())
                }
                Err(e) => {
                    if view.revert(&id, prior, generation) {
                        warn!("Remote write for {} failed, rolled back: {}", id, e);
                    } else {
                        debug!(
                            "Remote write for {} failed after a newer snapshot arrived, keeping it: {}",
                            id, e
                        );
                    }
                    Err(e)
                }
            }
        }))
    }

    /// Optimistically change the record with `id`
    pub fn update<F, Fut>(&self, id: &str, change: impl FnOnce(&mut R), remote: F) -> Pending
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let target = id.to_string();
        self.apply(
            id,
            move |records| {
                if let Some(record) = records.iter_mut().find(|r| r.id() == target) {
                    change(record);
                }
            },
            remote,
        )
    }

    /// Optimistically remove the record with `id`; a rollback puts the
    /// identical record back at its former position
    pub fn delete<F, Fut>(&self, id: &str, remote: F) -> Pending
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.delete_checked(id, |_| Ok(()), remote) {
            Ok(pending) => pending,
            Err(e) => Box::pin(futures_util::future::ready(Err(e))),
        }
    }

    /// Guarded form of [`delete`](Self::delete)
    pub fn delete_checked<F, Fut>(
        &self,
        id: &str,
        check: impl FnOnce(&[R]) -> Result<()>,
        remote: F,
    ) -> Result<Pending>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let target = id.to_string();
        self.apply_checked(
            id,
            check,
            move |records| records.retain(|r| r.id() != target),
            remote,
        )
    }
}
