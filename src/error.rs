//! Error types shared by every provider adapter and the inbox machinery.

/// Errors returned by the crate.
///
/// Adapters produce the transport-level variants ([`Error::Request`],
/// [`Error::Status`], [`Error::ResponseParse`], [`Error::Json`]) internally and
/// wrap them into [`Error::AccountCreation`] or [`Error::Fetch`] at the
/// [`Provider`](crate::Provider) boundary, so callers can tell which operation
/// failed without inspecting the cause.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registration or token issuance failed (after the retry budget, where one applies).
    #[error("{provider}: account creation failed: {source}")]
    AccountCreation {
        /// Display name of the provider.
        provider: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// Message list, message detail, source or domain fetch failed.
    #[error("{provider}: fetch failed: {source}")]
    Fetch {
        /// Display name of the provider.
        provider: &'static str,
        /// Underlying cause.
        #[source]
        source: Box<Error>,
    },

    /// The adapter lacks an optional capability.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        /// Display name of the provider.
        provider: &'static str,
        /// Name of the missing operation.
        operation: &'static str,
    },

    /// Transport error or failure building the HTTP client.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The upstream answered with a non-2xx status.
    #[error("upstream returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The response parsed but did not have the expected shape.
    #[error("unexpected response: {0}")]
    ResponseParse(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing persisted accounts failed.
    #[error("account store error: {0}")]
    Store(#[from] std::io::Error),

    /// The operation needs an account in the ready state.
    #[error("no account is ready")]
    NotReady,

    /// No adapter is registered under this name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// No persisted account has this id.
    #[error("unknown account: {0}")]
    UnknownAccount(String),

    /// The message is not in the active inbox.
    #[error("unknown message: {0}")]
    UnknownMessage(String),
}

impl Error {
    pub(crate) fn account_creation(provider: &'static str, source: Error) -> Self {
        Error::AccountCreation {
            provider,
            source: Box::new(source),
        }
    }

    pub(crate) fn fetch(provider: &'static str, source: Error) -> Self {
        Error::Fetch {
            provider,
            source: Box::new(source),
        }
    }

    pub(crate) fn unsupported(provider: &'static str, operation: &'static str) -> Self {
        Error::Unsupported {
            provider,
            operation,
        }
    }

    /// Returns `true` for [`Error::Unsupported`].
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported { .. })
    }
}
