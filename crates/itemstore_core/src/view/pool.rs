//! Reusable views bound to one repository.
//!
//! # Responsibility
//! - Hand out views through an RAII guard and take them back on drop.
//! - Return every view to callers clean: no pending changes, latest version.
//!
//! # Invariants
//! - Acquire and release are O(1) pushes/pops on a free list.
//! - The pool grows when empty and never shrinks; `len` counts every view it
//!   created.

use crate::config::RepositoryConfig;
use crate::repo::{RepoResult, Repository};
use crate::view::repository_view::RepositoryView;
use log::{debug, warn};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Default)]
struct PoolState {
    available: Vec<RepositoryView>,
    created: usize,
}

/// Pool of `RepositoryView`s over one repository.
#[derive(Debug)]
pub struct ViewPool {
    repo: Arc<Repository>,
    state: Mutex<PoolState>,
}

impl ViewPool {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self {
            repo,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pool holding `config.pool_prewarm` views up front.
    pub fn with_config(repo: Arc<Repository>, config: &RepositoryConfig) -> RepoResult<Self> {
        let pool = Self::new(repo);
        let mut views = Vec::with_capacity(config.pool_prewarm);
        for _ in 0..config.pool_prewarm {
            views.push(pool.create_view()?);
        }
        pool.lock().available.extend(views);
        Ok(pool)
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Hands out a clean view at the latest committed version.
    ///
    /// Reuses an available view (cancelled, then refreshed) or creates a new
    /// one when none is available. A closed view found in the free list is
    /// replaced.
    pub fn get_view(&self) -> RepoResult<PooledView<'_>> {
        let started_at = Instant::now();
        let reused = self.lock().available.pop();

        let view = match reused {
            Some(mut view) if view.is_open() => {
                if let Err(err) = view.cancel().and_then(|_| view.refresh()) {
                    warn!(
                        "event=pool_acquire module=pool status=error view={} error={err}",
                        view.name()
                    );
                    self.lock().available.push(view);
                    return Err(err);
                }
                view
            }
            Some(closed) => {
                debug!(
                    "event=pool_replace module=pool status=ok view={}",
                    closed.name()
                );
                self.replacement_view(closed)?
            }
            None => self.create_view()?,
        };

        debug!(
            "event=pool_acquire module=pool status=ok view={} version={} duration_ms={}",
            view.name(),
            view.version(),
            started_at.elapsed().as_millis()
        );
        Ok(PooledView {
            view: Some(view),
            pool: self,
        })
    }

    /// Returns a view to the pool. Same as dropping the guard.
    pub fn release_view(&self, view: PooledView<'_>) {
        drop(view);
    }

    /// Views created by this pool.
    pub fn len(&self) -> usize {
        self.lock().created
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Views waiting in the free list.
    pub fn available(&self) -> usize {
        self.lock().available.len()
    }

    /// Views currently handed out.
    pub fn in_use(&self) -> usize {
        let state = self.lock();
        state.created - state.available.len()
    }

    fn create_view(&self) -> RepoResult<RepositoryView> {
        let mut state = self.lock();
        let name = format!("pool-{}", state.created + 1);
        let view = self.repo.create_view(name)?;
        state.created += 1;
        Ok(view)
    }

    /// A fresh open view that keeps the closed view's name and slot.
    fn replacement_view(&self, closed: RepositoryView) -> RepoResult<RepositoryView> {
        match self.repo.create_view(closed.name()) {
            Ok(view) => Ok(view),
            Err(err) => {
                self.lock().available.push(closed);
                Err(err)
            }
        }
    }

    fn give_back(&self, view: RepositoryView) {
        self.lock().available.push(view);
    }

    // The free list stays consistent across a panic (single push/pop), so a
    // poisoned lock is recovered instead of surfaced.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A view on loan from a `ViewPool`; returned to the pool on drop.
#[derive(Debug)]
pub struct PooledView<'pool> {
    view: Option<RepositoryView>,
    pool: &'pool ViewPool,
}

impl Deref for PooledView<'_> {
    type Target = RepositoryView;

    fn deref(&self) -> &Self::Target {
        // `view` is only taken in `drop`.
        self.view.as_ref().unwrap_or_else(|| unreachable!("pooled view already released"))
    }
}

impl DerefMut for PooledView<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.view.as_mut().unwrap_or_else(|| unreachable!("pooled view already released"))
    }
}

impl Drop for PooledView<'_> {
    fn drop(&mut self) {
        if let Some(view) = self.view.take() {
            self.pool.give_back(view);
        }
    }
}
