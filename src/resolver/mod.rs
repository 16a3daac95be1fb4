//! The resolution engine: walks referrals from a starting server set until
//! some server answers.

pub mod cache;
pub mod error;
pub mod hints;
pub mod referral;

pub use cache::AnswerCache;
pub use error::{NsResolutionError, QueryError, ResolveError};
pub use hints::RootHints;

use crate::config::ResolverConfig;
use crate::metrics::RESOLUTIONS_TOTAL;
use crate::transport::{Query, Transport};
use crate::types::{normalize_name, QType, RecordSet, Response};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use referral::NameserverLookup;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// What one query of a walk produced, reported to iterative callers.
#[derive(Debug, Clone)]
pub struct Hop {
    pub step: u32,
    pub server: SocketAddr,
    pub outcome: Result<Response, QueryError>,
}

pub type HopSender = mpsc::UnboundedSender<Hop>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub rrset: RecordSet,
    /// Seconds the answer stays valid, counted from now.
    pub ttl: u32,
    /// Referral steps taken, the answering query included; 0 for cache hits.
    pub steps: u32,
    pub from_cache: bool,
    pub server: Option<SocketAddr>,
}

/// Per-call bookkeeping: which servers to try next and which were already
/// queried.
struct ResolutionState {
    domain: String,
    candidates: VecDeque<SocketAddr>,
    visited: HashSet<SocketAddr>,
    step_count: u32,
}

impl ResolutionState {
    fn new(domain: &str, start: Vec<SocketAddr>) -> Self {
        Self { domain: domain.to_string(), candidates: start.into(), visited: HashSet::new(), step_count: 1 }
    }

    /// Pops the next server not yet queried in this call and marks it visited.
    fn next_candidate(&mut self) -> Option<SocketAddr> {
        while let Some(server) = self.candidates.pop_front() {
            if self.visited.insert(server) { return Some(server); }
        }
        None
    }

    fn follow(&mut self, referral: Vec<SocketAddr>, max_depth: u32) -> Result<(), ResolveError> {
        self.step_count += 1;
        if self.step_count > max_depth {
            return Err(ResolveError::Loop { domain: self.domain.clone(), steps: self.step_count });
        }
        let fresh: VecDeque<SocketAddr> = referral.into_iter().filter(|s| !self.visited.contains(s)).collect();
        if fresh.is_empty() {
            tracing::warn!("Referral for '{}' only names servers already queried", self.domain);
            return Err(ResolveError::Loop { domain: self.domain.clone(), steps: self.step_count });
        }
        self.candidates = fresh;
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct WalkCtx<'a> {
    hops: Option<&'a HopSender>,
    /// Remaining levels of NS sub-resolution allowed below this walk.
    nesting: u32,
    deadline: Option<Instant>,
    /// Names the enclosing walks are resolving.
    chasing: &'a [String],
}

#[derive(Clone)]
pub struct Resolver {
    config: ResolverConfig,
    hints: RootHints,
    cache: Arc<AnswerCache>,
    transport: Arc<dyn Transport>,
}

impl Resolver {
    pub fn new(config: ResolverConfig, cache: Arc<AnswerCache>, transport: Arc<dyn Transport>) -> Self {
        let hints = config.root_hints();
        Self { config, hints, cache, transport }
    }

    pub fn with_hints(mut self, hints: RootHints) -> Self {
        self.hints = hints;
        self
    }

    /// Overall limit applied to each subsequent resolution call.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn cache(&self) -> &AnswerCache { &self.cache }

    pub fn hints(&self) -> &RootHints { &self.hints }

    /// Walks the delegation chain from `start` (root hints by default),
    /// sending every hop to `hops` as it happens.
    pub async fn resolve_iterative(
        &self,
        domain: &str,
        start: Option<&[SocketAddr]>,
        hops: Option<&HopSender>,
    ) -> Result<Answer, ResolveError> {
        let question = Query::new(domain, QType::A);
        let start = start.map(<[SocketAddr]>::to_vec).unwrap_or_else(|| self.hints.servers().to_vec());
        let ctx = WalkCtx { hops, nesting: self.config.ns_depth, deadline: self.deadline(), chasing: &[] };
        let result = self.walk(&question, start, ctx).await;
        record("iterative", &question.name, &result);
        result
    }

    /// Without `upstream`, chases referrals from the root hints and only
    /// reports the result. With `upstream`, asks that server to recurse on our
    /// behalf in a single query.
    pub async fn resolve_recursive(&self, domain: &str, upstream: Option<SocketAddr>) -> Result<Answer, ResolveError> {
        let question = Query::new(domain, QType::A);
        let ctx = WalkCtx { hops: None, nesting: self.config.ns_depth, deadline: self.deadline(), chasing: &[] };
        let (mode, result) = match upstream {
            None => ("recursive", self.walk(&question, self.hints.servers().to_vec(), ctx).await),
            Some(server) => ("delegated", self.delegate(&question, server, ctx).await),
        };
        record(mode, &question.name, &result);
        result
    }

    /// One query to one server, no cache and no referral chasing.
    pub async fn single_step(&self, domain: &str, server: SocketAddr) -> Result<Response, QueryError> {
        let question = Query::new(domain, QType::A);
        self.transport.query(server, &question, self.config.timeout).await
    }

    fn deadline(&self) -> Option<Instant> {
        self.config.deadline.map(|d| Instant::now() + d)
    }

    /// Per-query limit: the configured timeout, clipped to what is left of
    /// the deadline.
    fn query_limit(&self, domain: &str, deadline: Option<Instant>) -> Result<Duration, ResolveError> {
        match deadline {
            None => Ok(self.config.timeout),
            Some(at) => {
                let left = at.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(ResolveError::Deadline { domain: domain.to_string() });
                }
                Ok(left.min(self.config.timeout))
            }
        }
    }

    fn cached(&self, question: &Query) -> Option<Answer> {
        let rrset = self.cache.get(&question.name, question.qtype)?;
        Some(Answer { ttl: rrset.min_ttl(), rrset, steps: 0, from_cache: true, server: None })
    }

    fn accept(&self, question: &Query, response: Response, server: SocketAddr, steps: u32) -> Answer {
        let rrset = RecordSet::new(&question.name, question.qtype, response.answer);
        self.cache.put(rrset.clone());
        Answer { ttl: rrset.min_ttl(), rrset, steps, from_cache: false, server: Some(server) }
    }

    fn walk<'a>(&'a self, question: &'a Query, start: Vec<SocketAddr>, ctx: WalkCtx<'a>) -> BoxFuture<'a, Result<Answer, ResolveError>> {
        async move {
            if let Some(answer) = self.cached(question) { return Ok(answer); }

            let chain: Vec<String> = ctx.chasing.iter().cloned().chain([question.name.clone()]).collect();
            let lookup = NsLookup {
                resolver: self,
                nesting: ctx.nesting,
                deadline: ctx.deadline,
                chasing: &chain,
                failed: Mutex::default(),
            };
            let mut state = ResolutionState::new(&question.name, start);
            loop {
                let mut next_hops = Vec::new();

                while let Some(server) = state.next_candidate() {
                    let limit = self.query_limit(&question.name, ctx.deadline)?;
                    tracing::debug!("Step {}: asking {} for '{}'", state.step_count, server, question.name);
                    let result = self.transport.query(server, question, limit).await;
                    if let Some(tx) = ctx.hops {
                        let _ = tx.send(Hop { step: state.step_count, server, outcome: result.clone() });
                    }

                    let response = match result {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::warn!("Step {}: {}, trying next server", state.step_count, e);
                            continue;
                        }
                    };

                    if response.is_answer() {
                        return Ok(self.accept(question, response, server, state.step_count));
                    }
                    if response.flags.aa && response.flags.rcode == 3 {
                        tracing::debug!("Step {}: {} is authoritative that '{}' does not exist", state.step_count, server, question.name);
                        return Err(ResolveError::NotFound { domain: question.name.clone() });
                    }

                    next_hops = referral::extract(&response, self.config.port, self.config.ns_lookups, &lookup).await;
                    if !next_hops.is_empty() { break; }
                    tracing::debug!("Step {}: {} gave no usable referral", state.step_count, server);
                }

                if next_hops.is_empty() {
                    self.query_limit(&question.name, ctx.deadline)?;
                    return Err(ResolveError::NotFound { domain: question.name.clone() });
                }
                state.follow(next_hops, self.config.max_depth)?;
            }
        }
        .boxed()
    }

    async fn delegate(&self, question: &Query, server: SocketAddr, ctx: WalkCtx<'_>) -> Result<Answer, ResolveError> {
        if let Some(answer) = self.cached(question) { return Ok(answer); }

        let limit = self.query_limit(&question.name, ctx.deadline)?;
        let response = match self.transport.query(server, &question.clone().recursive(), limit).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Upstream {} failed: {}", server, e);
                self.query_limit(&question.name, ctx.deadline)?;
                return Err(ResolveError::NotFound { domain: question.name.clone() });
            }
        };

        if response.is_answer() {
            return Ok(self.accept(question, response, server, 1));
        }
        if response.flags.ra {
            return Err(ResolveError::NotFound { domain: question.name.clone() });
        }
        if self.config.fallback_iterative {
            tracing::info!("{} does not offer recursion, chasing referrals for '{}' ourselves", server, question.name);
            return self.walk(question, self.hints.servers().to_vec(), ctx).await;
        }
        Err(ResolveError::RecursionUnsupported { server })
    }
}

/// Sub-resolution of glueless NS names through the full engine, one nesting
/// level down. One instance lives for the whole of a walk, so a name that
/// failed once is not chased again when another peer repeats the referral.
struct NsLookup<'a> {
    resolver: &'a Resolver,
    nesting: u32,
    deadline: Option<Instant>,
    /// The walk's own name plus every name being resolved above it.
    chasing: &'a [String],
    failed: Mutex<HashMap<String, ResolveError>>,
}

impl<'a> NsLookup<'a> {
    async fn chase(&self, ns: &str) -> Result<Ipv4Addr, ResolveError> {
        if self.nesting == 0 || self.chasing.iter().any(|name| name == ns) {
            return Err(ResolveError::Loop { domain: ns.to_string(), steps: 0 });
        }

        let question = Query::new(ns, QType::A);
        let ctx = WalkCtx { hops: None, nesting: self.nesting - 1, deadline: self.deadline, chasing: self.chasing };
        let answer = self.resolver.walk(&question, self.resolver.hints.servers().to_vec(), ctx).await?;
        let first = answer.rrset.addresses().next();
        first.ok_or_else(|| ResolveError::NotFound { domain: ns.to_string() })
    }
}

#[async_trait]
impl<'a> NameserverLookup for NsLookup<'a> {
    async fn lookup_ns(&self, ns: &str) -> Result<Ipv4Addr, NsResolutionError> {
        let ns = normalize_name(ns);
        let known = match self.failed.lock() {
            Ok(failed) => failed.get(&ns).cloned(),
            Err(_) => None,
        };
        let result = match known {
            Some(e) => Err(e),
            None => self.chase(&ns).await,
        };
        if let Err(e) = &result {
            if let Ok(mut failed) = self.failed.lock() {
                failed.entry(ns.clone()).or_insert_with(|| e.clone());
            }
        }
        result.map_err(|source| NsResolutionError { ns, source })
    }
}

fn record(mode: &str, domain: &str, result: &Result<Answer, ResolveError>) {
    match result {
        Ok(answer) => {
            let label = if answer.from_cache { "cached" } else { "answered" };
            RESOLUTIONS_TOTAL.with_label_values(&[mode, label]).inc();
            tracing::info!("Resolved '{}' ({}) in {} step(s), ttl {}s{}", domain, mode, answer.steps, answer.ttl,
                if answer.from_cache { " [cache]" } else { "" });
        }
        Err(e) => {
            RESOLUTIONS_TOTAL.with_label_values(&[mode, e.kind()]).inc();
            tracing::info!("Resolution of '{}' ({}) failed: {}", domain, mode, e);
        }
    }
}
