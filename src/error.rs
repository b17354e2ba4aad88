//! Error kinds shared by the services.
//!
//! Internals return `anyhow::Result`; service boundaries convert into
//! [`CoreError`] so callers can map a failure onto an HTTP status or a gRPC
//! code and the retry wrapper can tell transient failures from final ones.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("reply unavailable: the original comment was deleted")]
    ReplyUnavailable,
    #[error("event bus unavailable: {0:#}")]
    BusUnavailable(anyhow::Error),
    #[error("platform unavailable: {0:#}")]
    PlatformUnavailable(anyhow::Error),
    #[error("platform rejected request: {0}")]
    PlatformRejected(String),
    #[error("store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error("subscriber is too slow, dropping subscription")]
    SlowConsumer,
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Wrap a relational or object store failure.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        Self::StoreUnavailable(err.into())
    }

    /// Wrap an event bus failure.
    pub fn bus(err: impl Into<anyhow::Error>) -> Self {
        Self::BusUnavailable(err.into())
    }

    /// Wrap a platform transport failure, keeping a platform rejection as is.
    pub fn platform(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        match err.downcast::<CoreError>() {
            Ok(core) => core,
            Err(err) => Self::PlatformUnavailable(err),
        }
    }

    /// Transient failures that the retry wrapper may repeat.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BusUnavailable(_) | Self::PlatformUnavailable(_) | Self::StoreUnavailable(_)
        )
    }

    /// Short machine-readable name of the kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::ReplyUnavailable => "reply_unavailable",
            Self::BusUnavailable(_) => "bus_unavailable",
            Self::PlatformUnavailable(_) => "platform_unavailable",
            Self::PlatformRejected(_) => "platform_rejected",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::SlowConsumer => "slow_consumer",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl From<CoreError> for tonic::Status {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::Forbidden(_) => Self::permission_denied(message),
            CoreError::NotFound(_) => Self::not_found(message),
            CoreError::InvalidArgument(_) => Self::invalid_argument(message),
            CoreError::ReplyUnavailable | CoreError::PlatformRejected(_) => {
                Self::failed_precondition(message)
            }
            CoreError::BusUnavailable(_)
            | CoreError::PlatformUnavailable(_)
            | CoreError::StoreUnavailable(_) => Self::unavailable(message),
            CoreError::SlowConsumer => Self::resource_exhausted(message),
            CoreError::Fatal(_) => Self::internal(message),
        }
    }
}
