use crate::value_objects::interval::Interval;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// A single request could never fit the budget. Configuration error.
    #[error("request cost {cost} exceeds budget ceiling {ceiling}")]
    CostExceedsCeiling { cost: u32, ceiling: u32 },

    /// The provider has no history for this symbol/interval. A skip, not a failure.
    #[error("no provider data for {symbol} {interval}")]
    NoDataAvailable { symbol: String, interval: Interval },

    #[error("transient fetch error: {0}")]
    TransientFetch(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("unknown symbol {symbol}")]
    UnknownSymbol {
        symbol: String,
        suggestions: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The task running a batch ended without producing an outcome.
    #[error("batch worker aborted: {0}")]
    WorkerAborted(String),
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::TransientFetch(_))
    }

    /// Short stable label, used as a metrics tag.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::CostExceedsCeiling { .. } => "cost_exceeds_ceiling",
            IngestError::NoDataAvailable { .. } => "no_data",
            IngestError::TransientFetch(_) => "transient",
            IngestError::MalformedResponse(_) => "malformed",
            IngestError::Persistence(_) => "persistence",
            IngestError::ProviderUnreachable(_) => "unreachable",
            IngestError::UnknownSymbol { .. } => "unknown_symbol",
            IngestError::Config(_) => "config",
            IngestError::WorkerAborted(_) => "aborted",
        }
    }
}
