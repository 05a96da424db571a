use hangouts_history::HistoryError;
use thiserror::Error;

/// Failures the engine reports to its callers.
///
/// Malformed records never show up here; the normalizer recovers them.
/// An unloaded conversation is signalled through `Option`/`ListUpdate`
/// rather than an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("message source unavailable: {0}")]
    SourceUnavailable(#[source] HistoryError),
    #[error("send to {address} failed: {source}")]
    SendFailure {
        address: String,
        #[source]
        source: HistoryError,
    },
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
