//! Dual-path verification framework: routes requests between an oracle and
//! a candidate implementation of the same workload, compares outputs, and
//! tracks statistical confidence to gate migration from oracle-only to
//! direct-only execution.

pub mod value;
pub mod node;
pub mod comparator;
pub mod confidence;
pub mod routing;
pub mod metrics;
pub mod divergence;
pub mod shadow;
pub mod orchestrator;
pub mod differential;
pub mod contracts;
pub mod config;
pub mod telemetry;

pub use comparator::{Comparator, ComparisonReport, Difference, DifferenceKind};
pub use confidence::{ConfidenceTracker, RuntimeMetrics, MIN_SAMPLE_SIZE};
pub use config::{load_routing_config, ConfigError};
pub use contracts::{ContractChecker, ContractError};
pub use differential::{
    DifferentialTestError, DifferentialTestResult, DifferentialTester, DivergenceReport, InputSource,
};
pub use divergence::{DivergenceRecord, DivergenceStats, DivergenceStore};
pub use metrics::{AggregateMetrics, ExecutionSample, MetricsCollector, PathMetrics};
pub use node::{FnHandler, Handler, HandlerError, NodeId, Runtime};
pub use orchestrator::{DualExecutionResult, ExecutionResult, Orchestrator};
pub use routing::{ExecutionRouter, FixedRngSource, Mode, RngSource, RoutingConfig, RoutingDecision};
pub use shadow::{ShadowExecutor, ShadowExecutorConfig};
pub use telemetry::init_tracing;
pub use value::{OrderedMap, Value};

/// Aggregated crate error for callers that want a single `Result` type
/// rather than matching on each component's own error enum.
pub type Result<T> = std::result::Result<T, VesperError>;

#[derive(Debug, thiserror::Error)]
pub enum VesperError {
    #[error("handler error: {0}")]
    Handler(#[from] node::HandlerError),

    #[error("contract violation: {0}")]
    Contract(#[from] contracts::ContractError),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
