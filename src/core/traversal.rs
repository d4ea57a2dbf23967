//! Depth-first exploration of a call graph.
//!
//! Every claimed function goes through the same protocol: a preliminary
//! analysis of its own text, reference resolution, ranked and truncated
//! recursion into its callees, then a synthesis pass that folds the callees'
//! analyses into its own. The protocol runs inside the session cache, so a
//! function reached again (or in a later traversal that kept the cache) is
//! analyzed only once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AnalysisError, CallGraphiteError, Result};
use super::cache::CacheError;
use super::call_graph::{Claim, EdgeKind};
use super::llm::{AnalysisClient, prompts};
use super::locator::FunctionLocator;
use super::model::{AnalysisResult, CallSite, FailureReason, FunctionId, LocatedFunction, NodeState, Position};
use super::references::ReferenceResolver;
use super::session::Session;

#[derive(Debug, Clone)]
pub struct TraversalOptions {
    /// Deepest level that is analyzed; the root is depth 0
    pub max_depth: usize,
    pub max_breadth_per_node: usize,
    /// Sibling subtrees (and analysis requests) in flight at once
    pub max_parallel_branches: usize,
    /// Run the synthesis pass
    pub comprehensive: bool,
    /// Keep the session's graph, cache and history instead of resetting them
    pub resume: bool,
    pub analysis_timeout: Duration,
}

impl TraversalOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_depth: config.traversal.max_depth,
            max_breadth_per_node: config.traversal.max_breadth_per_node,
            max_parallel_branches: config.traversal.max_parallel_branches.max(1),
            comprehensive: config.analysis.comprehensive,
            resume: config.session.resume,
            analysis_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of one traversal; the graph itself stays in the session
#[derive(Debug, Clone, Serialize)]
pub struct TraversalReport {
    pub root: FunctionId,
    pub root_name: String,
    /// Nodes analyzed by this traversal
    pub analyzed: usize,
    /// Nodes that failed in this traversal
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

pub struct TraversalEngine {
    locator: Arc<dyn FunctionLocator>,
    resolver: Arc<dyn ReferenceResolver>,
    client: Arc<dyn AnalysisClient>,
    options: TraversalOptions,
    permits: Semaphore,
    cancel: CancellationToken,
}

impl TraversalEngine {
    pub fn new(
        locator: Arc<dyn FunctionLocator>,
        resolver: Arc<dyn ReferenceResolver>,
        client: Arc<dyn AnalysisClient>,
        options: TraversalOptions,
    ) -> Self {
        let permits = Semaphore::new(options.max_parallel_branches.max(1));
        Self {
            locator,
            resolver,
            client,
            options,
            permits,
            cancel: CancellationToken::new(),
        }
    }

    /// Share an externally owned token, e.g. one cancelled on Ctrl-C
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Explore the call graph below the function enclosing `root`.
    ///
    /// Fails only when the root cannot be located (or on a cache consistency
    /// violation). Node-level failures and cancellation are reported in the
    /// returned [`TraversalReport`].
    pub async fn traverse(&self, session: &Session, root: &Position) -> Result<TraversalReport> {
        let started = Instant::now();
        if !self.options.resume {
            session.reset();
        }
        if self.cancel.is_cancelled() {
            return Err(CallGraphiteError::Cancelled);
        }

        let located = self.locate(root).await?;
        let id = located.id.clone();
        let name = located.name.clone();
        info!(
            "Exploring calls from {} ({}) with depth {} and breadth {}",
            name, id, self.options.max_depth, self.options.max_breadth_per_node
        );

        let walk = Walk::new(self, session);
        let owned = match session.claim(located.clone(), 0) {
            Claim::Acquired => true,
            Claim::Taken(NodeState::Failed) => session.retry(&id),
            Claim::Taken(state) => {
                info!("{} is already {} in this session", name, state);
                false
            }
        };
        session.with_graph(|graph| graph.mark_root(&id));

        if owned {
            walk.visit(located, 0, Vec::new()).await;
        }

        if let Some(msg) = walk.consistency_error() {
            return Err(CallGraphiteError::CacheConsistency(msg));
        }

        let report = TraversalReport {
            root: id,
            root_name: name,
            analyzed: walk.analyzed.load(Ordering::Relaxed),
            failed: walk.failed.load(Ordering::Relaxed),
            cancelled: self.cancel.is_cancelled(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if report.cancelled {
            warn!(
                "Traversal of {} cancelled after {} analyzed, {} failed",
                report.root_name, report.analyzed, report.failed
            );
        } else {
            info!(
                "Traversal of {} finished: {} analyzed, {} failed in {}ms",
                report.root_name, report.analyzed, report.failed, report.elapsed_ms
            );
        }
        Ok(report)
    }

    async fn locate(&self, position: &Position) -> Result<LocatedFunction> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallGraphiteError::Cancelled),
            located = self.locator.locate(position) => located,
        }
    }

    /// Call sites of the function at `position`; a failed query counts as none
    async fn find_references(&self, position: &Position) -> std::result::Result<Vec<CallSite>, FailureReason> {
        if self.cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        let sites = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
            sites = self.resolver.find_references(position) => sites,
        };
        match sites {
            Ok(sites) => Ok(sites),
            Err(e) => {
                warn!("Reference query for {} failed, treating as leaf: {}", position, e);
                Ok(Vec::new())
            }
        }
    }

    /// One request to the reasoning service, bounded by the permit pool and the timeout
    async fn request(&self, prompt: String) -> std::result::Result<String, FailureReason> {
        if self.cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FailureReason::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| FailureReason::Cancelled)?,
        };

        let timeout = self.options.analysis_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(FailureReason::Cancelled),
            reply = tokio::time::timeout(timeout, self.client.analyze(&prompt)) => match reply {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(AnalysisError::Timeout(timeout.as_secs()).into()),
            },
        }
    }
}

/// Which in-progress nodes each in-progress node cannot finish without:
/// the children it is visiting and the sibling-owned nodes it is waiting for
#[derive(Debug, Default)]
struct WaitGraph {
    blocked_on: HashMap<FunctionId, Vec<FunctionId>>,
}

impl WaitGraph {
    /// Whether `from` transitively depends on `to`
    fn depends(&self, from: &FunctionId, to: &FunctionId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.blocked_on.get(id).into_iter().flatten());
            }
        }
        false
    }

    fn add(&mut self, waiter: &FunctionId, awaited: &FunctionId) {
        self.blocked_on
            .entry(waiter.clone())
            .or_default()
            .push(awaited.clone());
    }

    /// Add the dependency unless it would close a cycle
    fn try_add(&mut self, waiter: &FunctionId, awaited: &FunctionId) -> bool {
        if self.depends(awaited, waiter) {
            return false;
        }
        self.add(waiter, awaited);
        true
    }

    fn remove(&mut self, waiter: &FunctionId, awaited: &FunctionId) {
        if let Some(awaited_ids) = self.blocked_on.get_mut(waiter) {
            if let Some(i) = awaited_ids.iter().position(|id| id == awaited) {
                awaited_ids.swap_remove(i);
            }
            if awaited_ids.is_empty() {
                self.blocked_on.remove(waiter);
            }
        }
    }
}

/// State of one `traverse` call
struct Walk<'a> {
    engine: &'a TraversalEngine,
    session: &'a Session,
    analyzed: AtomicUsize,
    failed: AtomicUsize,
    consistency: Mutex<Option<String>>,
    waits: Mutex<WaitGraph>,
}

impl<'a> Walk<'a> {
    fn new(engine: &'a TraversalEngine, session: &'a Session) -> Self {
        Self {
            engine,
            session,
            analyzed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            consistency: Mutex::new(None),
            waits: Mutex::new(WaitGraph::default()),
        }
    }

    fn wait_graph(&self) -> MutexGuard<'_, WaitGraph> {
        self.waits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancelled(&self) -> bool {
        self.engine.cancel.is_cancelled()
    }

    fn consistency_error(&self) -> Option<String> {
        self.consistency
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the protocol for a node this walk has claimed and settle its state.
    /// Returns the comprehensive analysis on success.
    fn visit(
        &self,
        located: LocatedFunction,
        depth: usize,
        ancestors: Vec<FunctionId>,
    ) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let id = located.id.clone();
            let mut path = ancestors;
            path.push(id.clone());
            debug!("Analyzing {} ({}) at depth {}", located.name, id, depth);

            let mut computed = false;
            let outcome = self
                .session
                .cache()
                .get_or_compute(&id, || {
                    computed = true;
                    self.run_protocol(&located, depth, &path)
                })
                .await;

            match outcome {
                Ok(result) => {
                    if !computed {
                        // Rebuild the subtree below a cached node; its callees hit the cache too
                        debug!("Reusing cached analysis of {}", located.name);
                        self.walk_children(&id, depth, &path, &result.retained_children)
                            .await;
                    }
                    let comprehensive = result.comprehensive.clone();
                    self.session.mark_analyzed(&id, result);
                    self.analyzed.fetch_add(1, Ordering::Relaxed);
                    Some(comprehensive)
                }
                Err(CacheError::Compute(reason)) => {
                    if reason == FailureReason::Cancelled {
                        debug!("Analysis of {} cancelled", located.name);
                    } else {
                        warn!("Analysis of {} failed: {}", located.name, reason);
                    }
                    self.session.mark_failed(&id, reason);
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    None
                }
                Err(CacheError::Consistency(msg)) => {
                    self.consistency
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert_with(|| msg.clone());
                    self.session
                        .mark_failed(&id, FailureReason::CacheConsistency(msg));
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        })
    }

    async fn run_protocol(
        &self,
        located: &LocatedFunction,
        depth: usize,
        path: &[FunctionId],
    ) -> std::result::Result<AnalysisResult, FailureReason> {
        let engine = self.engine;

        let preliminary = engine
            .request(prompts::preliminary_prompt(&located.name, &located.text))
            .await?;
        let ranked_calls = prompts::parse_ranked_calls(&preliminary);

        let sites = engine.find_references(&located.id.position()).await?;
        let found = sites.len();
        let retained_children: Vec<Position> =
            prompts::order_call_sites(sites, &ranked_calls, engine.options.max_breadth_per_node)
                .into_iter()
                .map(|site| site.target)
                .collect();
        debug!(
            "{}: {} call sites, {} retained, ranking {:?}",
            located.name,
            found,
            retained_children.len(),
            ranked_calls
        );

        let children = self
            .walk_children(&located.id, depth, path, &retained_children)
            .await;
        if self.cancelled() {
            return Err(FailureReason::Cancelled);
        }

        let comprehensive = if engine.options.comprehensive && !children.is_empty() {
            let prompt = prompts::synthesis_prompt(&located.name, &preliminary, &children);
            match engine.request(prompt).await {
                Ok(text) => text,
                Err(FailureReason::Cancelled) => return Err(FailureReason::Cancelled),
                Err(reason) => {
                    warn!(
                        "Synthesis for {} failed ({}); keeping its preliminary analysis",
                        located.name, reason
                    );
                    preliminary.clone()
                }
            }
        } else {
            preliminary.clone()
        };

        Ok(AnalysisResult {
            preliminary,
            comprehensive,
            ranked_calls,
            retained_children,
        })
    }

    /// Visit call targets in order, `max_parallel_branches` at a time.
    /// Returns (name, comprehensive analysis) of every child analyzed successfully.
    async fn walk_children(
        &self,
        parent: &FunctionId,
        depth: usize,
        path: &[FunctionId],
        targets: &[Position],
    ) -> Vec<(String, String)> {
        let children: Vec<_> = targets
            .iter()
            .map(|target| self.walk_child(parent, depth, path, target))
            .collect();
        stream::iter(children)
            .buffered(self.engine.options.max_parallel_branches.max(1))
            .filter_map(|child| async move { child })
            .collect()
            .await
    }

    async fn walk_child(
        &self,
        parent: &FunctionId,
        parent_depth: usize,
        path: &[FunctionId],
        target: &Position,
    ) -> Option<(String, String)> {
        if self.cancelled() {
            return None;
        }
        let located = match self.engine.locate(target).await {
            Ok(located) => located,
            Err(e) => {
                debug!("Skipping call target {}: {}", target, e);
                return None;
            }
        };
        let id = located.id.clone();
        let name = located.name.clone();
        let depth = parent_depth + 1;

        if path.contains(&id) {
            debug!("Call to {} closes a cycle", name);
            self.session
                .with_graph(|graph| graph.add_edge(parent, &id, EdgeKind::Cyclic));
            return None;
        }

        let known = self.session.with_graph(|graph| graph.get(&id).map(|n| n.state));
        match known {
            Some(NodeState::InProgress) => {
                return self.join(parent, &id).await.map(|analysis| (name, analysis));
            }
            Some(state) if state != NodeState::Unvisited => {
                return self.link_existing(parent, &id).map(|analysis| (name, analysis));
            }
            _ if depth > self.engine.options.max_depth => {
                self.session.with_graph(|graph| {
                    graph.insert_placeholder(located, depth);
                    graph.add_edge(parent, &id, EdgeKind::Truncated);
                });
                return None;
            }
            _ => {}
        }

        match self.session.claim(located.clone(), depth) {
            Claim::Acquired => {
                self.session
                    .with_graph(|graph| graph.add_edge(parent, &id, EdgeKind::Expanded));
                self.wait_graph().add(parent, &id);
                let analysis = self.visit(located, depth, path.to_vec()).await;
                self.wait_graph().remove(parent, &id);
                analysis.map(|analysis| (name, analysis))
            }
            Claim::Taken(NodeState::InProgress) => {
                self.join(parent, &id).await.map(|analysis| (name, analysis))
            }
            Claim::Taken(_) => self.link_existing(parent, &id).map(|analysis| (name, analysis)),
        }
    }

    /// Link to a node another branch is analyzing and wait for its outcome.
    /// When the other branch is itself waiting on `parent`, link without waiting.
    async fn join(&self, parent: &FunctionId, id: &FunctionId) -> Option<String> {
        self.session
            .with_graph(|graph| graph.add_edge(parent, id, EdgeKind::Expanded));
        if !self.wait_graph().try_add(parent, id) {
            debug!("Not waiting for {}: its branch is waiting on {}", id, parent);
            return self.analysis_of(id);
        }
        self.settled(id).await;
        self.wait_graph().remove(parent, id);
        self.analysis_of(id)
    }

    /// Resolves once `id` is no longer in progress, or on cancellation
    async fn settled(&self, id: &FunctionId) {
        let mut events = self.session.subscribe();
        while self.session.with_graph(|graph| graph.get(id).map(|n| n.state))
            == Some(NodeState::InProgress)
        {
            tokio::select! {
                biased;
                _ = self.engine.cancel.cancelled() => return,
                event = events.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = event {
                        return;
                    }
                }
            }
        }
    }

    fn analysis_of(&self, id: &FunctionId) -> Option<String> {
        self.session.with_graph(|graph| {
            graph
                .get(id)
                .and_then(|node| node.analysis.as_ref())
                .map(|analysis| analysis.comprehensive.clone())
        })
    }

    /// Link to a node that is already part of the graph and reuse its analysis, if any
    fn link_existing(&self, parent: &FunctionId, id: &FunctionId) -> Option<String> {
        self.session
            .with_graph(|graph| graph.add_edge(parent, id, EdgeKind::Expanded));
        self.analysis_of(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use async_trait::async_trait;
    use crate::core::model::Span;
    use crate::core::session::SessionOptions;

    const FILE: &str = "app.rs";

    /// A fake program: function `i` starts at line `10 * i + 1`
    struct Program {
        functions: Vec<LocatedFunction>,
        calls: HashMap<FunctionId, Vec<CallSite>>,
    }

    impl Program {
        fn new(defs: &[(&str, &[&str])]) -> Arc<Self> {
            let functions: Vec<LocatedFunction> = defs
                .iter()
                .enumerate()
                .map(|(i, (name, _))| {
                    let line = 10 * i + 1;
                    let span = Span {
                        start_byte: 0,
                        end_byte: 0,
                        start: (line, 1),
                        end: (line + 8, 2),
                    };
                    LocatedFunction {
                        id: FunctionId::from_span(Path::new(FILE), &span),
                        name: name.to_string(),
                        text: format!("fn {}() {{ /* ... */ }}", name),
                        span,
                    }
                })
                .collect();

            let mut calls = HashMap::new();
            for ((_, callees), caller) in defs.iter().zip(&functions) {
                let sites = callees
                    .iter()
                    .enumerate()
                    .filter_map(|(k, callee)| {
                        let target = functions.iter().find(|f| f.name == *callee)?;
                        Some(CallSite {
                            callee: callee.to_string(),
                            site: Position::new(FILE, caller.span.start.0 + k + 1, 5),
                            target: target.id.position(),
                        })
                    })
                    .collect();
                calls.insert(caller.id.clone(), sites);
            }

            Arc::new(Self { functions, calls })
        }

        fn id(&self, name: &str) -> FunctionId {
            self.functions
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.id.clone())
                .unwrap()
        }

        fn root(&self) -> Position {
            // Somewhere inside the first function, not its first character
            Position::new(FILE, self.functions[0].span.start.0 + 2, 9)
        }
    }

    struct FakeLocator(Arc<Program>);

    #[async_trait]
    impl FunctionLocator for FakeLocator {
        async fn locate(&self, position: &Position) -> Result<LocatedFunction> {
            self.0
                .functions
                .iter()
                .find(|f| {
                    f.id.path == position.path && f.span.contains(position.line, position.column)
                })
                .cloned()
                .ok_or_else(|| CallGraphiteError::LocationNotFound {
                    path: position.path.clone(),
                    line: position.line,
                    column: position.column,
                })
        }
    }

    struct FakeResolver {
        program: Arc<Program>,
        broken: HashSet<FunctionId>,
    }

    #[async_trait]
    impl ReferenceResolver for FakeResolver {
        async fn find_references(&self, position: &Position) -> Result<Vec<CallSite>> {
            let caller = FakeLocator(self.program.clone()).locate(position).await?;
            if self.broken.contains(&caller.id) {
                return Err(CallGraphiteError::ReferenceQueryFailed("index unavailable".to_string()));
            }
            Ok(self.program.calls.get(&caller.id).cloned().unwrap_or_default())
        }
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Hang,
        RateLimited,
        FailSynthesis,
    }

    /// Replies deterministically from the function name in the prompt and
    /// records every request
    #[derive(Default)]
    struct ScriptedClient {
        rankings: HashMap<String, Vec<String>>,
        behaviors: HashMap<String, Behavior>,
        delay: Duration,
        log: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedClient {
        fn rank(mut self, name: &str, calls: &[&str]) -> Self {
            self.rankings
                .insert(name.to_string(), calls.iter().map(|c| c.to_string()).collect());
            self
        }

        fn behave(mut self, name: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(name.to_string(), behavior);
            self
        }

        fn requests(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, request: &str) -> usize {
            self.requests().iter().filter(|r| r.as_str() == request).count()
        }
    }

    #[async_trait]
    impl AnalysisClient for ScriptedClient {
        async fn analyze(&self, prompt: &str) -> std::result::Result<String, AnalysisError> {
            let name = prompt.split('`').nth(1).unwrap_or_default().to_string();
            let preliminary = prompt.starts_with("Analyze the function");
            let kind = if preliminary { "preliminary" } else { "synthesis" };
            self.log.lock().unwrap().push(format!("{}:{}", kind, name));

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match (self.behaviors.get(&name).copied(), preliminary) {
                (Some(Behavior::Hang), _) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(AnalysisError::RemoteError("hung".to_string()))
                }
                (Some(Behavior::RateLimited), true) => Err(AnalysisError::RateLimited),
                (Some(Behavior::FailSynthesis), false) => {
                    Err(AnalysisError::RemoteError("502 Bad Gateway".to_string()))
                }
                (_, true) => {
                    let ranked = self.rankings.get(&name).cloned().unwrap_or_default();
                    let list = if ranked.is_empty() {
                        "- none".to_string()
                    } else {
                        ranked.iter().map(|r| format!("- {}", r)).collect::<Vec<_>>().join("\n")
                    };
                    Ok(format!("{} does its job.\n\nKEY CALLS:\n{}", name, list))
                }
                (_, false) => {
                    let callees: Vec<&str> = prompt
                        .lines()
                        .filter_map(|l| l.strip_prefix("=== CALLEE: "))
                        .filter_map(|l| l.strip_suffix(" ==="))
                        .collect();
                    Ok(format!("{} overall [{}]", name, callees.join(", ")))
                }
            }
        }

        fn provider_name(&self) -> &str {
            "Scripted"
        }

        fn model_name(&self) -> &str {
            "scripted-1"
        }
    }

    fn options(max_depth: usize, max_breadth: usize) -> TraversalOptions {
        TraversalOptions {
            max_depth,
            max_breadth_per_node: max_breadth,
            max_parallel_branches: 1,
            comprehensive: true,
            resume: false,
            analysis_timeout: Duration::from_secs(5),
        }
    }

    fn engine(
        program: &Arc<Program>,
        client: &Arc<ScriptedClient>,
        options: TraversalOptions,
    ) -> TraversalEngine {
        engine_with_broken(program, client, options, HashSet::new())
    }

    fn engine_with_broken(
        program: &Arc<Program>,
        client: &Arc<ScriptedClient>,
        options: TraversalOptions,
        broken: HashSet<FunctionId>,
    ) -> TraversalEngine {
        TraversalEngine::new(
            Arc::new(FakeLocator(program.clone())),
            Arc::new(FakeResolver {
                program: program.clone(),
                broken,
            }),
            client.clone(),
            options,
        )
    }

    fn comprehensive(session: &Session, id: &FunctionId) -> String {
        session
            .node(id)
            .and_then(|n| n.analysis)
            .map(|a| a.comprehensive)
            .unwrap()
    }

    #[tokio::test]
    async fn test_ranked_child_is_explored_within_bounds() {
        let program = Program::new(&[
            ("main", &["parse_args", "run"]),
            ("parse_args", &[]),
            ("run", &["execute"]),
            ("execute", &[]),
        ]);
        let client = Arc::new(ScriptedClient::default().rank("main", &["run"]));
        let session = Session::default();

        let report = engine(&program, &client, options(2, 1))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.root, program.id("main"));
        assert_eq!(report.analyzed, 3);
        assert_eq!(report.failed, 0);
        assert!(!report.cancelled);

        let snapshot = session.snapshot();
        let names: Vec<_> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["main", "run", "execute"]);
        assert!(snapshot.node(&program.id("parse_args")).is_none());
        assert_eq!(snapshot.edges.len(), 2);
        assert!(snapshot.edges.iter().all(|e| e.kind == EdgeKind::Expanded));
        assert_eq!(snapshot.count(NodeState::Analyzed), 3);

        assert_eq!(comprehensive(&session, &program.id("main")), "main overall [run]");
        assert_eq!(comprehensive(&session, &program.id("run")), "run overall [execute]");
        let execute = session.node(&program.id("execute")).unwrap().analysis.unwrap();
        assert_eq!(execute.comprehensive, execute.preliminary);

        assert_eq!(client.requests()[0], "preliminary:main");
        assert_eq!(client.count("synthesis:execute"), 0);
        assert_eq!(session.current_focus(), Some(program.id("main")));
    }

    #[tokio::test]
    async fn test_depth_bound_leaves_placeholders() {
        let program = Program::new(&[
            ("main", &["parse_args", "run"]),
            ("parse_args", &[]),
            ("run", &["execute"]),
            ("execute", &[]),
        ]);
        let client = Arc::new(ScriptedClient::default().rank("main", &["run"]));
        let session = Session::default();

        engine(&program, &client, options(1, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        let snapshot = session.snapshot();
        let names: Vec<_> = snapshot.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["main", "run", "execute", "parse_args"]);

        let execute = snapshot.node(&program.id("execute")).unwrap();
        assert_eq!(execute.state, NodeState::Unvisited);
        assert_eq!(execute.depth, 2);
        assert!(execute.analysis.is_none());
        assert_eq!(client.count("preliminary:execute"), 0);

        let run = program.id("run");
        let truncated: Vec<_> = snapshot.edges_from(&run).collect();
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].kind, EdgeKind::Truncated);
        let run_analysis = session.node(&run).unwrap().analysis.unwrap();
        assert_eq!(run_analysis.comprehensive, run_analysis.preliminary);

        // Sibling order: ranked first, the rest positionally
        let main = program.id("main");
        let order: Vec<_> = snapshot.edges_from(&main).map(|e| e.callee.clone()).collect();
        assert_eq!(order, vec![run, program.id("parse_args")]);
    }

    #[tokio::test]
    async fn test_zero_depth_analyzes_only_the_root() {
        let program = Program::new(&[("main", &["run"]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        let report = engine(&program, &client, options(0, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 1);
        assert_eq!(session.snapshot().count(NodeState::Unvisited), 1);
        assert_eq!(client.requests(), vec!["preliminary:main"]);
    }

    #[tokio::test]
    async fn test_timed_out_helper_fails_alone() {
        let program = Program::new(&[("main", &["helper", "log"]), ("helper", &[]), ("log", &[])]);
        let client = Arc::new(ScriptedClient::default().behave("helper", Behavior::Hang));
        let session = Session::default();
        let mut opts = options(3, 8);
        opts.analysis_timeout = Duration::from_millis(50);

        let report = engine(&program, &client, opts)
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 2);
        assert_eq!(report.failed, 1);

        let helper = session.node(&program.id("helper")).unwrap();
        assert_eq!(helper.state, NodeState::Failed);
        assert!(helper.analysis.is_none());
        assert!(matches!(
            helper.failure,
            Some(FailureReason::Analysis(AnalysisError::Timeout(_)))
        ));

        assert_eq!(comprehensive(&session, &program.id("main")), "main overall [log]");
        // Failures are not cached
        assert!(session.cache().get(&program.id("helper")).is_none());
        assert_eq!(session.snapshot().nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_self_recursion_terminates_with_cyclic_self_edge() {
        let program = Program::new(&[("fact", &["fact"])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        let report = engine(&program, &client, options(10, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        let fact = program.id("fact");
        assert_eq!(report.analyzed, 1);
        assert_eq!(session.with_graph(|g| g.edge_kind(&fact, &fact)), Some(EdgeKind::Cyclic));
        let analysis = session.node(&fact).unwrap().analysis.unwrap();
        assert_eq!(analysis.comprehensive, analysis.preliminary);
        assert_eq!(client.count("preliminary:fact"), 1);
    }

    #[tokio::test]
    async fn test_mutual_recursion_terminates() {
        let program = Program::new(&[("is_even", &["is_odd"]), ("is_odd", &["is_even"])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        engine(&program, &client, options(10, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        let (even, odd) = (program.id("is_even"), program.id("is_odd"));
        session.with_graph(|g| {
            assert_eq!(g.edge_kind(&even, &odd), Some(EdgeKind::Expanded));
            assert_eq!(g.edge_kind(&odd, &even), Some(EdgeKind::Cyclic));
        });
        assert_eq!(session.snapshot().count(NodeState::Analyzed), 2);
        assert_eq!(comprehensive(&session, &even), "is_even overall [is_odd]");
    }

    #[tokio::test]
    async fn test_diamond_is_analyzed_once() {
        let program = Program::new(&[
            ("main", &["left", "right"]),
            ("left", &["shared"]),
            ("right", &["shared"]),
            ("shared", &[]),
        ]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        let report = engine(&program, &client, options(5, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 4);
        assert_eq!(client.count("preliminary:shared"), 1);
        assert_eq!(comprehensive(&session, &program.id("right")), "right overall [shared]");

        let shared = program.id("shared");
        let callers = session.with_graph(|g| g.get_callers(&shared).len());
        assert_eq!(callers, 2);
    }

    #[tokio::test]
    async fn test_known_node_past_depth_bound_is_reused() {
        let program = Program::new(&[
            ("main", &["shared", "a"]),
            ("shared", &[]),
            ("a", &["b"]),
            ("b", &["shared"]),
        ]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        engine(&program, &client, options(2, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        let (b, shared) = (program.id("b"), program.id("shared"));
        // b is at the bound, yet shared was already analyzed at depth 1
        assert_eq!(session.with_graph(|g| g.edge_kind(&b, &shared)), Some(EdgeKind::Expanded));
        assert_eq!(session.node(&shared).unwrap().depth, 1);
        assert_eq!(comprehensive(&session, &b), "b overall [shared]");
        assert_eq!(client.count("preliminary:shared"), 1);
        assert_eq!(session.snapshot().count(NodeState::Unvisited), 0);
    }

    #[tokio::test]
    async fn test_cached_results_rebuild_the_graph_without_requests() {
        let program = Program::new(&[("main", &["run"]), ("run", &["execute"]), ("execute", &[])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::new(SessionOptions {
            cache_results: true,
            keep_cache_on_reset: true,
        });
        let engine = engine(&program, &client, options(5, 8));

        engine.traverse(&session, &program.root()).await.unwrap();
        let first = session.snapshot();
        let requests = client.requests().len();

        let report = engine.traverse(&session, &program.root()).await.unwrap();
        assert_eq!(report.analyzed, 3);
        assert_eq!(client.requests().len(), requests);
        assert_eq!(session.snapshot(), first);
    }

    #[tokio::test]
    async fn test_failed_preliminary_skips_subtree() {
        let program = Program::new(&[("main", &["run"]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default().behave("main", Behavior::RateLimited));
        let session = Session::default();

        let report = engine(&program, &client, options(5, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!((report.analyzed, report.failed), (0, 1));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].state, NodeState::Failed);
        assert!(snapshot.nodes[0].failure.as_deref().unwrap().contains("rate limited"));
    }

    #[tokio::test]
    async fn test_failed_synthesis_keeps_preliminary() {
        let program = Program::new(&[("main", &["run"]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default().behave("main", Behavior::FailSynthesis));
        let session = Session::default();

        engine(&program, &client, options(5, 8))
            .traverse(&session, &program.root())
            .await
            .unwrap();

        let main = session.node(&program.id("main")).unwrap();
        assert_eq!(main.state, NodeState::Analyzed);
        let analysis = main.analysis.unwrap();
        assert_eq!(analysis.comprehensive, analysis.preliminary);
    }

    #[tokio::test]
    async fn test_reference_failure_means_no_children() {
        let program = Program::new(&[("main", &["run"]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();
        let broken = HashSet::from([program.id("main")]);

        let report = engine_with_broken(&program, &client, options(5, 8), broken)
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.analyzed, 1);
        assert_eq!(session.snapshot().nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_can_be_disabled() {
        let program = Program::new(&[("main", &["run"]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();
        let mut opts = options(5, 8);
        opts.comprehensive = false;

        engine(&program, &client, opts)
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(client.requests(), vec!["preliminary:main", "preliminary:run"]);
    }

    #[tokio::test]
    async fn test_unlocatable_root_is_an_error() {
        let program = Program::new(&[("main", &[])]);
        let client = Arc::new(ScriptedClient::default());
        let session = Session::default();

        let result = engine(&program, &client, options(5, 8))
            .traverse(&session, &Position::new(FILE, 500, 1))
            .await;
        assert!(matches!(result, Err(CallGraphiteError::LocationNotFound { line: 500, .. })));
        assert!(session.snapshot().nodes.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_fails_in_flight_nodes_only() {
        let program = Program::new(&[("main", &["parse_args", "run"]), ("parse_args", &[]), ("run", &[])]);
        let client = Arc::new(ScriptedClient::default().behave("run", Behavior::Hang));
        let session = Session::default();
        let engine = engine(&program, &client, options(5, 8));
        let token = engine.cancellation_token();
        let mut events = session.subscribe();

        let canceller = async {
            while let Ok(change) = events.recv().await {
                if change.name == "run" && change.new == NodeState::InProgress {
                    token.cancel();
                    break;
                }
            }
        };
        let root = program.root();
        let (report, _) = tokio::join!(engine.traverse(&session, &root), canceller);
        let report = report.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.analyzed, 1);
        assert_eq!(report.failed, 2);

        let state = |name: &str| session.node(&program.id(name)).unwrap();
        assert_eq!(state("parse_args").state, NodeState::Analyzed);
        assert_eq!(state("run").failure, Some(FailureReason::Cancelled));
        assert_eq!(state("main").failure, Some(FailureReason::Cancelled));
        assert_eq!(session.cache().len(), 1);
        assert_eq!(session.cache().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_parallel_branches_keep_sibling_order() {
        let program = Program::new(&[
            ("main", &["a", "b", "c"]),
            ("a", &["shared"]),
            ("b", &["shared"]),
            ("c", &[]),
            ("shared", &[]),
        ]);
        let client = Arc::new(ScriptedClient {
            delay: Duration::from_millis(20),
            ..ScriptedClient::default()
        });
        let session = Session::default();
        let mut opts = options(5, 8);
        opts.max_parallel_branches = 3;

        let report = engine(&program, &client, opts)
            .traverse(&session, &program.root())
            .await
            .unwrap();

        assert_eq!(report.failed, 0);
        assert!(client.peak_in_flight.load(Ordering::SeqCst) > 1);
        assert!(client.peak_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(client.count("preliminary:shared"), 1);

        let snapshot = session.snapshot();
        let main = program.id("main");
        let order: Vec<_> = snapshot.edges_from(&main).map(|e| e.callee.clone()).collect();
        assert_eq!(order, vec![program.id("a"), program.id("b"), program.id("c")]);
        assert_eq!(snapshot.count(NodeState::InProgress), 0);

        // Whichever branch reaches `shared` second waits for it instead of dropping it
        assert_eq!(comprehensive(&session, &program.id("a")), "a overall [shared]");
        assert_eq!(comprehensive(&session, &program.id("b")), "b overall [shared]");
        assert_eq!(comprehensive(&session, &program.id("main")), "main overall [a, b, c]");
    }

    #[tokio::test]
    async fn test_parallel_branches_reaching_each_other_do_not_deadlock() {
        let program = Program::new(&[("main", &["a", "b"]), ("a", &["b"]), ("b", &["a"])]);
        let client = Arc::new(ScriptedClient {
            delay: Duration::from_millis(20),
            ..ScriptedClient::default()
        });
        let session = Session::default();
        let mut opts = options(5, 8);
        opts.max_parallel_branches = 2;

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            engine(&program, &client, opts).traverse(&session, &program.root()),
        )
        .await
        .expect("branches waiting on each other")
        .unwrap();

        assert_eq!((report.analyzed, report.failed), (3, 0));
        let a = comprehensive(&session, &program.id("a"));
        let b = comprehensive(&session, &program.id("b"));
        // One branch waited for the other; the other could not wait back
        let one_waited = (a == "a overall [b]") != (b == "b overall [a]");
        assert!(one_waited, "a: {:?}, b: {:?}", a, b);
        assert_eq!(client.count("preliminary:a"), 1);
        assert_eq!(client.count("preliminary:b"), 1);
    }

    #[test]
    fn test_wait_graph_refuses_cycles() {
        let id = |line| FunctionId {
            path: FILE.into(),
            line,
            column: 1,
        };
        let (main, a, b, c) = (id(1), id(11), id(21), id(31));
        let mut waits = WaitGraph::default();
        waits.add(&main, &a);
        waits.add(&main, &b);
        waits.add(&a, &c);

        assert!(waits.try_add(&b, &c));
        assert!(!waits.try_add(&c, &a));
        assert!(!waits.try_add(&c, &main));

        waits.remove(&a, &c);
        assert!(waits.try_add(&c, &a));
        assert!(waits.depends(&main, &a));
        assert!(!waits.depends(&a, &main));
    }
}
