//! Everything one exploration accumulates: the call graph, the analysis
//! cache and the navigation history.

use std::sync::{Mutex, MutexGuard, PoisonError};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::cache::ResultCache;
use super::call_graph::{CallGraph, CallGraphStats, Claim, GraphSnapshot};
use super::model::{AnalysisResult, FailureReason, FunctionId, FunctionNode, LocatedFunction, NodeState};
use super::navigation::NavigationHistory;

const EVENT_CAPACITY: usize = 256;

/// Progress notification emitted whenever a node changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStateChange {
    pub id: FunctionId,
    pub name: String,
    pub old: NodeState,
    pub new: NodeState,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Reuse analysis results for repeated functions
    pub cache_results: bool,
    /// Let cached results survive [`Session::reset`]
    pub keep_cache_on_reset: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache_results: true,
            keep_cache_on_reset: false,
        }
    }
}

pub struct Session {
    graph: Mutex<CallGraph>,
    cache: ResultCache,
    history: Mutex<NavigationHistory>,
    events: broadcast::Sender<NodeStateChange>,
    options: SessionOptions,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            graph: Mutex::new(CallGraph::new()),
            cache: ResultCache::new(options.cache_results),
            history: Mutex::new(NavigationHistory::new()),
            events,
            options,
        }
    }

    /// Forget the graph and history; the cache goes too unless it is kept across resets
    pub fn reset(&self) {
        *lock(&self.graph) = CallGraph::new();
        lock(&self.history).clear();
        if !self.options.keep_cache_on_reset {
            self.cache.clear();
        }
        debug!("Session reset");
    }

    /// Drop everything, cache included
    pub fn clear(&self) {
        *lock(&self.graph) = CallGraph::new();
        lock(&self.history).clear();
        self.cache.clear();
        debug!("Session cleared");
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeStateChange> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        lock(&self.graph).snapshot()
    }

    pub fn statistics(&self) -> CallGraphStats {
        lock(&self.graph).get_statistics()
    }

    pub fn node(&self, id: &FunctionId) -> Option<FunctionNode> {
        lock(&self.graph).get(id).cloned()
    }

    /// Function the navigation history currently points at
    pub fn current_focus(&self) -> Option<FunctionId> {
        lock(&self.history).current().cloned()
    }

    pub fn move_back(&self) -> Option<FunctionId> {
        lock(&self.history).back()
    }

    pub fn move_forward(&self) -> Option<FunctionId> {
        lock(&self.history).forward()
    }

    pub fn can_go_back(&self) -> bool {
        lock(&self.history).can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        lock(&self.history).can_go_forward()
    }

    /// Run `f` with the graph locked. `f` must not block.
    pub(crate) fn with_graph<R>(&self, f: impl FnOnce(&mut CallGraph) -> R) -> R {
        f(&mut lock(&self.graph))
    }

    fn emit(&self, id: &FunctionId, name: &str, old: NodeState, new: NodeState) {
        // Nobody listening is fine
        let _ = self.events.send(NodeStateChange {
            id: id.clone(),
            name: name.to_string(),
            old,
            new,
        });
    }

    /// Take a node for traversal, announcing the transition to `in-progress`
    pub(crate) fn claim(&self, located: LocatedFunction, depth: usize) -> Claim {
        let id = located.id.clone();
        let name = located.name.clone();
        let claim = lock(&self.graph).claim(located, depth);
        if claim == Claim::Acquired {
            self.emit(&id, &name, NodeState::Unvisited, NodeState::InProgress);
        }
        claim
    }

    /// Hand a previously failed node back to the traversal
    pub(crate) fn retry(&self, id: &FunctionId) -> bool {
        let (old, name) = {
            let mut graph = lock(&self.graph);
            match graph.get(id) {
                Some(node) if node.state == NodeState::Failed => {}
                _ => return false,
            }
            let old = graph.set_state(id, NodeState::InProgress);
            (old, graph.get(id).map(|n| n.name.clone()).unwrap_or_default())
        };
        if let Some(old) = old {
            self.emit(id, &name, old, NodeState::InProgress);
        }
        true
    }

    /// Store a finished analysis and move navigation focus onto the node
    pub(crate) fn mark_analyzed(&self, id: &FunctionId, result: AnalysisResult) {
        let transition = {
            let mut graph = lock(&self.graph);
            graph
                .complete(id, result)
                .map(|old| (old, graph.get(id).map(|n| n.name.clone()).unwrap_or_default()))
        };
        if let Some((old, name)) = transition {
            lock(&self.history).visit(id.clone());
            self.emit(id, &name, old, NodeState::Analyzed);
        }
    }

    pub(crate) fn mark_failed(&self, id: &FunctionId, reason: FailureReason) {
        let transition = {
            let mut graph = lock(&self.graph);
            graph
                .fail(id, reason)
                .map(|old| (old, graph.get(id).map(|n| n.name.clone()).unwrap_or_default()))
        };
        if let Some((old, name)) = transition {
            self.emit(id, &name, old, NodeState::Failed);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}
