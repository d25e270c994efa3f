// Handler registration contract for oracle and candidate runtimes (spec.md §6).
//
// The candidate runtime implementation itself is out of scope (spec.md §1);
// this module only defines the interface both runtimes register against.

use crate::value::OrderedMap;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Stable string key naming one verifiable workload.
pub type NodeId = String;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no handler registered for node: {0}")]
    NoHandler(NodeId),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// A callable mapping named inputs to named outputs. Handlers may be
/// synchronous under the hood but are always invoked through this async
/// trait object so the orchestrator can await oracle and candidate
/// concurrently regardless of which kind registered (spec.md §5).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, inputs: &OrderedMap) -> Result<OrderedMap, HandlerError>;
}

/// Adapts a plain closure into a `Handler`, for callers whose handler is a
/// cheap synchronous function (spec.md §5: "Handlers themselves may be
/// either blocking synchronous functions ... or cooperative asynchronous
/// functions").
pub struct FnHandler<F>(pub F)
where
    F: Fn(&OrderedMap) -> Result<OrderedMap, HandlerError> + Send + Sync;

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&OrderedMap) -> Result<OrderedMap, HandlerError> + Send + Sync,
{
    async fn call(&self, inputs: &OrderedMap) -> Result<OrderedMap, HandlerError> {
        (self.0)(inputs)
    }
}

/// A runtime (oracle or candidate) that handlers register against.
///
/// The set of registered nodes is open and mutable at runtime (spec.md §3),
/// so this is a `DashMap` rather than a `RwLock<HashMap<_>>` — registration
/// and execution happen concurrently without contending on a single lock.
#[derive(Clone)]
pub struct Runtime {
    name: &'static str,
    handlers: Arc<DashMap<NodeId, Arc<dyn Handler>>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("registered_nodes", &self.handlers.len())
            .finish()
    }
}

impl Runtime {
    pub fn new(name: &'static str) -> Self {
        Runtime {
            name,
            handlers: Arc::new(DashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register_handler(&self, node_id: impl Into<NodeId>, handler: Arc<dyn Handler>) {
        self.handlers.insert(node_id.into(), handler);
    }

    pub fn has_handler(&self, node_id: &str) -> bool {
        self.handlers.contains_key(node_id)
    }

    pub async fn execute(
        &self,
        node_id: &str,
        inputs: &OrderedMap,
    ) -> Result<OrderedMap, HandlerError> {
        let handler = self
            .handlers
            .get(node_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HandlerError::NoHandler(node_id.to_string()))?;
        handler.call(inputs).await
    }
}
