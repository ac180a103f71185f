//! Error types shared by State Store client implementations.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`StoreError`] failures.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures that can occur while talking to the State Store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Required environment variable is missing.
    #[error("missing State Store environment variable `{var}`")]
    MissingEnvVar {
        /// Name of the missing variable.
        var: &'static str,
    },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build State Store client")]
    ClientBuilder {
        /// Underlying builder failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request could not be sent.
    #[error("failed to send State Store request to `{path}`")]
    RequestSend {
        /// Endpoint path.
        path: String,
        /// Underlying transport failure.
        #[source]
        source: reqwest::Error,
    },
    /// The store returned an unexpected status code.
    #[error("unexpected State Store response status {status} for `{path}`")]
    RequestStatus {
        /// Endpoint path.
        path: String,
        /// Returned status.
        status: StatusCode,
    },
    /// Response payload could not be parsed.
    #[error("failed to decode State Store response for `{path}`")]
    DecodeResponse {
        /// Endpoint path.
        path: String,
        /// Underlying decode failure.
        #[source]
        source: reqwest::Error,
    },
    /// The referenced entity does not exist on the store.
    #[error("State Store has no entity at `{path}`")]
    NotFound {
        /// Endpoint path.
        path: String,
    },
}
