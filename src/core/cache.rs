// src/core/cache.rs
//! Session-scoped analysis cache with single-flight computation.
//!
//! The first caller for an id runs the computation; callers arriving while it
//! is in flight subscribe to a broadcast channel and receive the same outcome.
//! Only successes are stored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::CallGraphiteError;
use super::model::{AnalysisResult, FailureReason, FunctionId};

type Outcome = std::result::Result<AnalysisResult, FailureReason>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: AnalysisResult,
    /// Insertion order across the session, starting at 1
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The computation (ours or the one we waited on) failed
    Compute(FailureReason),
    /// An in-flight computation vanished without publishing an outcome
    Consistency(String),
}

impl From<CacheError> for CallGraphiteError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Compute(FailureReason::Analysis(a)) => CallGraphiteError::Analysis(a),
            CacheError::Compute(FailureReason::Cancelled) => CallGraphiteError::Cancelled,
            CacheError::Compute(FailureReason::CacheConsistency(msg)) => {
                CallGraphiteError::CacheConsistency(msg)
            }
            CacheError::Consistency(msg) => CallGraphiteError::CacheConsistency(msg),
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<FunctionId, CacheEntry>,
    in_flight: HashMap<FunctionId, broadcast::Sender<Outcome>>,
    next_sequence: u64,
    /// Bumped by `clear`; outcomes computed under an older generation are not stored
    generation: u64,
}

pub struct ResultCache {
    enabled: bool,
    state: Mutex<CacheState>,
}

enum Role<'a> {
    Leader(InFlightGuard<'a>),
    Waiter(broadcast::Receiver<Outcome>),
}

impl ResultCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the stored result for `id`, or run `compute` exactly once among
    /// all concurrent callers and share its outcome.
    pub async fn get_or_compute<F, Fut>(
        &self,
        id: &FunctionId,
        compute: F,
    ) -> std::result::Result<AnalysisResult, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        if !self.enabled {
            return compute().await.map_err(CacheError::Compute);
        }

        let role = {
            let mut state = self.lock();
            if let Some(entry) = state.entries.get(id) {
                debug!("Cache hit for {} (seq {})", id, entry.sequence);
                return Ok(entry.result.clone());
            }
            match state.in_flight.get(id) {
                Some(tx) => Role::Waiter(tx.subscribe()),
                None => {
                    // One result is ever sent per channel
                    let (tx, _) = broadcast::channel(1);
                    state.in_flight.insert(id.clone(), tx.clone());
                    Role::Leader(InFlightGuard {
                        cache: self,
                        id: id.clone(),
                        tx,
                        generation: state.generation,
                        published: false,
                    })
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => {
                debug!("Waiting for in-flight analysis of {}", id);
                match rx.recv().await {
                    Ok(outcome) => outcome.map_err(CacheError::Compute),
                    Err(e) => Err(CacheError::Consistency(format!(
                        "in-flight analysis of {} ended without a result: {}",
                        id, e
                    ))),
                }
            }
            Role::Leader(mut guard) => {
                let outcome = compute().await;
                guard.publish(&outcome);
                outcome.map_err(CacheError::Compute)
            }
        }
    }

    pub fn get(&self, id: &FunctionId) -> Option<AnalysisResult> {
        if !self.enabled {
            return None;
        }
        self.lock().entries.get(id).map(|e| e.result.clone())
    }

    pub fn entry(&self, id: &FunctionId) -> Option<CacheEntry> {
        self.lock().entries.get(id).cloned()
    }

    pub fn invalidate(&self, id: &FunctionId) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.generation += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }
}

/// Owned by the caller that runs the computation.
///
/// Publishing and subscribing both happen under the state lock, so a waiter
/// either subscribed before the send or finds the stored entry afterwards.
struct InFlightGuard<'a> {
    cache: &'a ResultCache,
    id: FunctionId,
    tx: broadcast::Sender<Outcome>,
    generation: u64,
    published: bool,
}

impl InFlightGuard<'_> {
    fn publish(&mut self, outcome: &Outcome) {
        let mut state = self.cache.lock();
        state.in_flight.remove(&self.id);

        if let Ok(result) = outcome {
            if state.generation == self.generation {
                state.next_sequence += 1;
                let sequence = state.next_sequence;
                state.entries.insert(
                    self.id.clone(),
                    CacheEntry {
                        result: result.clone(),
                        sequence,
                    },
                );
            } else {
                debug!("Cache cleared while {} was in flight; not storing", self.id);
            }
        }

        // No receivers is fine
        let _ = self.tx.send(outcome.clone());
        self.published = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            // The computing future was dropped mid-flight (cancellation)
            warn!("Analysis of {} abandoned before completion", self.id);
            let mut state = self.cache.lock();
            state.in_flight.remove(&self.id);
            let _ = self.tx.send(Err(FailureReason::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn id(line: usize) -> FunctionId {
        FunctionId {
            path: "src/lib.rs".into(),
            line,
            column: 1,
        }
    }

    fn result(text: &str) -> AnalysisResult {
        AnalysisResult {
            preliminary: text.to_string(),
            comprehensive: text.to_string(),
            ranked_calls: vec![],
            retained_children: vec![],
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let cache = Arc::new(ResultCache::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_compute(&id(1), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(result("parses args"))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 8);
        for r in results {
            assert_eq!(r.unwrap(), result("parses args"));
        }
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_waiters_share_failure_and_failure_is_not_cached() {
        let cache = Arc::new(ResultCache::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks = (0..4).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_compute(&id(2), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err(FailureReason::Analysis(AnalysisError::RateLimited))
                    })
                    .await
            }
        });
        for r in futures::future::join_all(tasks).await {
            assert_eq!(
                r,
                Err(CacheError::Compute(FailureReason::Analysis(AnalysisError::RateLimited)))
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        // A retry computes again
        let retried = cache
            .get_or_compute(&id(2), || async { Ok(result("ok now")) })
            .await
            .unwrap();
        assert_eq!(retried.preliminary, "ok now");
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let cache = ResultCache::new(false);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_compute(&id(3), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(result("x"))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.get(&id(3)).is_none());
    }

    #[tokio::test]
    async fn test_sequence_invalidate_and_clear() {
        let cache = ResultCache::new(true);
        cache.get_or_compute(&id(1), || async { Ok(result("a")) }).await.unwrap();
        cache.get_or_compute(&id(2), || async { Ok(result("b")) }).await.unwrap();

        assert_eq!(cache.entry(&id(1)).unwrap().sequence, 1);
        assert_eq!(cache.entry(&id(2)).unwrap().sequence, 2);

        assert!(cache.invalidate(&id(1)));
        assert!(!cache.invalidate(&id(1)));
        let again = cache
            .get_or_compute(&id(1), || async { Ok(result("a2")) })
            .await
            .unwrap();
        assert_eq!(again.preliminary, "a2");
        assert_eq!(cache.entry(&id(1)).unwrap().sequence, 3);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_during_flight_does_not_store() {
        let cache = Arc::new(ResultCache::new(true));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (finish_tx, finish_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&id(4), || async move {
                        let _ = started_tx.send(());
                        let _ = finish_rx.await;
                        Ok(result("stale"))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.clear();
        finish_tx.send(()).unwrap();

        assert!(leader.await.unwrap().is_ok());
        assert!(cache.get(&id(4)).is_none());
    }

    #[tokio::test]
    async fn test_abandoned_leader_releases_waiters() {
        let cache = Arc::new(ResultCache::new(true));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&id(5), || async move {
                        let _ = started_tx.send(());
                        std::future::pending::<Outcome>().await
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&id(5), || async { Ok(result("never")) })
                    .await
            })
        };
        // Let the waiter subscribe before the leader goes away
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        assert_eq!(
            waiter.await.unwrap(),
            Err(CacheError::Compute(FailureReason::Cancelled))
        );
        assert_eq!(cache.in_flight(), 0);
        assert!(cache.is_empty());
    }
}
