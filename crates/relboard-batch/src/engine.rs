//! Count batching engine
//!
//! Every strategy owns a FIFO queue and an in-flight counter. A pass over a
//! queue takes up to `batch_size` requests (sorted by target indices),
//! answers cache hits on the spot and sends the rest as one multi-search
//! call. Completions re-run the pass.
//!
//! Each request id carries a monotonic counter bumped on every enqueue; a
//! callback only fires when its request still holds the latest value, so
//! a superseded request never reports, whatever the completion order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use relboard_core::CountQuery;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::CountCache;
use crate::debounce::Debouncer;
use crate::error::{BatchError, CountError, Result};
use crate::msearch::{build_request, parse_response, slot_error, MsearchClient};
use crate::strategy::Strategy;

pub type CountResult = std::result::Result<Value, CountError>;
pub type CountCallback = Box<dyn FnOnce(CountResult) + Send + 'static>;

/// One count request: an id (dashboard or button), its query and the
/// callback receiving the response slot.
pub struct MetaDefinition {
    pub id: String,
    pub query: Option<CountQuery>,
    callback: CountCallback,
}

impl MetaDefinition {
    pub fn new<F>(id: impl Into<String>, query: CountQuery, callback: F) -> Self
    where
        F: FnOnce(CountResult) + Send + 'static,
    {
        Self {
            id: id.into(),
            query: Some(query),
            callback: Box::new(callback),
        }
    }

    /// Definition whose query could not be built. Rejected at enqueue.
    pub fn without_query<F>(id: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce(CountResult) + Send + 'static,
    {
        Self {
            id: id.into(),
            query: None,
            callback: Box::new(callback),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BatchError::InvalidDefinition {
                reason: "missing id".to_string(),
            });
        }
        match &self.query {
            None => Err(BatchError::InvalidDefinition {
                reason: format!("missing query for '{}'", self.id),
            }),
            Some(query) if query.indices.is_empty() || query.body.is_null() => {
                Err(BatchError::InvalidDefinition {
                    reason: format!("empty query for '{}'", self.id),
                })
            }
            Some(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for MetaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaDefinition")
            .field("id", &self.id)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Cache and debounce settings shared by every strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub debounce: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(750),
            cache_ttl: Duration::from_secs(60),
            cache_capacity: 500,
        }
    }
}

struct Pending {
    id: String,
    query: CountQuery,
    /// `header\nbody\n`, also the cache key.
    text: String,
    index_key: String,
    sequence: u64,
    retried: u32,
    callback: CountCallback,
}

#[derive(Default)]
struct StrategyQueue {
    pending: VecDeque<Pending>,
    in_flight: usize,
    resume_at: Option<Instant>,
}

#[derive(Default)]
struct EngineState {
    queues: HashMap<String, StrategyQueue>,
    /// Latest counter handed out per request id, across strategies.
    sent: HashMap<String, u64>,
}

impl EngineState {
    fn is_latest(&self, id: &str, sequence: u64) -> bool {
        self.sent.get(id) == Some(&sequence)
    }
}

/// Queue depth of one strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
}

struct EngineInner {
    client: Arc<dyn MsearchClient>,
    cache: CountCache,
    strategies: HashMap<String, Strategy>,
    debouncers: HashMap<String, Debouncer>,
    state: Mutex<EngineState>,
}

/// Thread-safe count engine. Cloning shares the same queues and cache.
///
/// Dispatching spawns Tokio tasks, so the engine must be driven from inside
/// a Tokio runtime.
#[derive(Clone)]
pub struct CountEngine {
    inner: Arc<EngineInner>,
}

impl CountEngine {
    pub fn new(
        client: Arc<dyn MsearchClient>,
        strategies: Vec<Strategy>,
        config: EngineConfig,
    ) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(strategies.len());
        let mut debouncers = HashMap::with_capacity(strategies.len());
        let mut queues = HashMap::with_capacity(strategies.len());
        for strategy in strategies {
            strategy.validate()?;
            if by_name.contains_key(&strategy.name) {
                return Err(BatchError::invalid_strategy(
                    &strategy.name,
                    "declared more than once",
                ));
            }
            debouncers.insert(strategy.name.clone(), Debouncer::new(config.debounce));
            queues.insert(strategy.name.clone(), StrategyQueue::default());
            by_name.insert(strategy.name.clone(), strategy);
        }

        Ok(Self {
            inner: Arc::new(EngineInner {
                client,
                cache: CountCache::new(config.cache_capacity, config.cache_ttl),
                strategies: by_name,
                debouncers,
                state: Mutex::new(EngineState {
                    queues,
                    sent: HashMap::new(),
                }),
            }),
        })
    }

    pub fn strategy(&self, name: &str) -> Option<&Strategy> {
        self.inner.strategies.get(name)
    }

    /// Queue definitions under `strategy` without processing them. Either
    /// every definition is queued or, when one is invalid, none is.
    pub fn enqueue(&self, strategy: &str, definitions: Vec<MetaDefinition>) -> Result<()> {
        self.inner.strategy(strategy)?;
        for definition in &definitions {
            definition.validate()?;
        }

        let mut state = self.inner.state.lock();
        let EngineState { queues, sent } = &mut *state;
        let queue = queues
            .get_mut(strategy)
            .ok_or_else(|| BatchError::UnknownStrategy {
                name: strategy.to_string(),
            })?;
        for definition in definitions {
            let Some(query) = definition.query else {
                continue;
            };
            let counter = sent.entry(definition.id.clone()).or_insert(0);
            *counter += 1;
            queue.pending.push_back(Pending {
                text: query.to_lines(),
                index_key: query.index_key(),
                id: definition.id,
                query,
                sequence: *counter,
                retried: 0,
                callback: definition.callback,
            });
        }
        debug!(strategy = %strategy, queued = queue.pending.len(), "Enqueued count requests");
        Ok(())
    }

    /// Process `strategy` after the debounce delay, restarting the delay on
    /// every call. `immediate` cancels any pending delay and processes now.
    pub fn schedule(&self, strategy: &str, immediate: bool) -> Result<()> {
        self.inner.strategy(strategy)?;
        let debouncer = self
            .inner
            .debouncers
            .get(strategy)
            .ok_or_else(|| BatchError::UnknownStrategy {
                name: strategy.to_string(),
            })?;
        if immediate {
            debouncer.cancel();
            self.inner.process_queue(strategy);
            return Ok(());
        }
        let weak = Arc::downgrade(&self.inner);
        let name = strategy.to_string();
        debouncer.trigger(move || {
            if let Some(inner) = weak.upgrade() {
                inner.process_queue(&name);
            }
        });
        Ok(())
    }

    /// Run one processing pass over `strategy` now.
    pub fn process_queue(&self, strategy: &str) {
        self.inner.process_queue(strategy);
    }

    pub fn stats(&self, strategy: &str) -> QueueStats {
        let state = self.inner.state.lock();
        state
            .queues
            .get(strategy)
            .map(|queue| QueueStats {
                queued: queue.pending.len(),
                in_flight: queue.in_flight,
            })
            .unwrap_or_default()
    }

    pub fn cache(&self) -> &CountCache {
        &self.inner.cache
    }
}

enum Pass {
    /// Nothing to do, or back-pressured.
    Idle,
    /// Only cache hits were taken; run another pass.
    Again,
    Dispatch(Vec<Pending>),
}

impl EngineInner {
    fn strategy(&self, name: &str) -> Result<&Strategy> {
        self.strategies
            .get(name)
            .ok_or_else(|| BatchError::UnknownStrategy {
                name: name.to_string(),
            })
    }

    fn process_queue(self: &Arc<Self>, name: &str) {
        let Ok(strategy) = self.strategy(name) else {
            warn!(strategy = %name, "Ignoring pass over an unknown strategy");
            return;
        };

        loop {
            let mut deliveries: Vec<(CountCallback, CountResult)> = Vec::new();
            let pass = self.take_batch(strategy, &mut deliveries);

            // Callbacks run without the state lock held.
            let cache_hits = deliveries.len();
            for (callback, result) in deliveries {
                callback(result);
            }

            match pass {
                Pass::Idle => return,
                Pass::Again => continue,
                Pass::Dispatch(batch) => {
                    debug!(
                        strategy = %name,
                        batch = batch.len(),
                        cache_hits,
                        "Dispatching count batch"
                    );
                    let engine = Arc::clone(self);
                    let name = name.to_string();
                    tokio::spawn(async move {
                        engine.send_batch(name, batch).await;
                    });
                }
            }
        }
    }

    fn take_batch(
        &self,
        strategy: &Strategy,
        deliveries: &mut Vec<(CountCallback, CountResult)>,
    ) -> Pass {
        let mut state = self.state.lock();
        let EngineState { queues, sent } = &mut *state;
        let Some(queue) = queues.get_mut(&strategy.name) else {
            return Pass::Idle;
        };

        if queue.in_flight >= strategy.parallel_requests || queue.pending.is_empty() {
            return Pass::Idle;
        }
        if let Some(resume_at) = queue.resume_at {
            if Instant::now() < resume_at {
                return Pass::Idle;
            }
            queue.resume_at = None;
        }

        queue
            .pending
            .make_contiguous()
            .sort_by(|a, b| a.index_key.cmp(&b.index_key));

        let mut batch = Vec::with_capacity(strategy.batch_size);
        let mut taken = 0;
        while taken < strategy.batch_size {
            let Some(item) = queue.pending.pop_front() else {
                break;
            };
            taken += 1;
            if sent.get(&item.id) != Some(&item.sequence) {
                debug!(id = %item.id, "Dropping superseded count request");
                continue;
            }
            match self.cache.get(&item.text) {
                Some(slot) => deliveries.push((item.callback, Ok(slot))),
                None => batch.push(item),
            }
        }

        if batch.is_empty() {
            return if queue.pending.is_empty() {
                Pass::Idle
            } else {
                Pass::Again
            };
        }
        queue.in_flight += 1;
        Pass::Dispatch(batch)
    }

    async fn send_batch(self: Arc<Self>, name: String, batch: Vec<Pending>) {
        let request = build_request(batch.iter().map(|p| &p.query));
        let outcome = match self.client.msearch(request).await {
            Ok(response) => parse_response(response),
            Err(e) => Err(e),
        };

        let mut deliveries: Vec<(CountCallback, CountResult)> = Vec::with_capacity(batch.len());
        let mut wake_after: Option<Duration> = None;
        {
            let mut state = self.state.lock();
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.in_flight = queue.in_flight.saturating_sub(1);
            }

            match outcome {
                Ok(slots) => {
                    let mut slots = slots.into_iter();
                    for item in batch {
                        let result = match slots.next() {
                            Some(slot) => match slot_error(&slot) {
                                Some(reason) => Err(CountError::BackendRejected { reason }),
                                None => {
                                    self.cache.put(&item.text, slot.clone());
                                    Ok(slot)
                                }
                            },
                            None => Err(CountError::MissingResponse),
                        };
                        if state.is_latest(&item.id, item.sequence) {
                            deliveries.push((item.callback, result));
                        } else {
                            debug!(id = %item.id, "Dropping stale count response");
                        }
                    }
                }
                Err(e) => {
                    let Some(strategy) = self.strategies.get(&name) else {
                        return;
                    };
                    let mut retrying = 0;
                    let mut max_attempt = 0;
                    let mut requeue = Vec::new();
                    for mut item in batch {
                        if !state.is_latest(&item.id, item.sequence) {
                            continue;
                        }
                        if item.retried < strategy.retry_on_error {
                            item.retried += 1;
                            max_attempt = max_attempt.max(item.retried);
                            retrying += 1;
                            requeue.push(item);
                        } else {
                            deliveries.push((
                                item.callback,
                                Err(CountError::RetriesExhausted {
                                    attempts: item.retried + 1,
                                    message: e.to_string(),
                                }),
                            ));
                        }
                    }
                    warn!(
                        strategy = %name,
                        error = %e,
                        retrying,
                        failed = deliveries.len(),
                        "Count batch failed"
                    );
                    if let Some(queue) = state.queues.get_mut(&name) {
                        queue.pending.extend(requeue);
                        if retrying > 0 {
                            if let Some(backoff) = strategy.backoff_for(max_attempt) {
                                queue.resume_at = Some(Instant::now() + backoff);
                                wake_after = Some(backoff);
                            }
                        }
                    }
                }
            }
        }

        for (callback, result) in deliveries {
            callback(result);
        }

        match wake_after {
            Some(backoff) => {
                let weak: Weak<EngineInner> = Arc::downgrade(&self);
                tokio::spawn(async move {
                    tokio::time::sleep(backoff).await;
                    if let Some(engine) = weak.upgrade() {
                        engine.process_queue(&name);
                    }
                });
            }
            None => self.process_queue(&name),
        }
    }
}
