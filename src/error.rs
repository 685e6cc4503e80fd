//! Wire-level error taxonomy for the tool dispatcher.
//!
//! Every operation the dispatcher (see [`crate::dispatcher`]) exposes ends in either
//! `Ok` or a [`ServerError`]. This type is distinct from the `anyhow::Error` values
//! that flow through the library internals: the dispatcher is the single place an
//! `anyhow::Error` gets classified into one of these variants before it crosses the
//! wire, mirroring the `AppError` classification the HTTP layer used to do ad hoc.

use serde::Serialize;

/// The caller-facing error taxonomy.
///
/// `message` must never contain credentials, environment variable values, or
/// absolute filesystem paths of the server process — see [`ServerError::sanitized_message`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("llm call failed: {0}")]
    LlmFailed(String),

    #[error("vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("graph store unavailable: {0}")]
    GraphUnavailable(String),

    #[error("graph cleanup failed: {0}")]
    GraphCleanupFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Machine-readable discriminator for the wire-level error envelope.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    FetchFailed,
    EmbeddingFailed,
    LlmFailed,
    VectorStoreUnavailable,
    GraphUnavailable,
    GraphCleanupFailed,
    Cancelled,
    InternalError,
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServerError::FetchFailed(_) => ErrorKind::FetchFailed,
            ServerError::EmbeddingFailed(_) => ErrorKind::EmbeddingFailed,
            ServerError::LlmFailed(_) => ErrorKind::LlmFailed,
            ServerError::VectorStoreUnavailable(_) => ErrorKind::VectorStoreUnavailable,
            ServerError::GraphUnavailable(_) => ErrorKind::GraphUnavailable,
            ServerError::GraphCleanupFailed(_) => ErrorKind::GraphCleanupFailed,
            ServerError::Cancelled => ErrorKind::Cancelled,
            ServerError::InternalError(_) => ErrorKind::InternalError,
        }
    }

    /// Scrubs anything that looks like a secret or an absolute path before it
    /// is attached to an envelope sent to a caller.
    pub fn sanitized_message(&self) -> String {
        sanitize(&self.to_string())
    }

    /// Classifies an arbitrary internal error into the taxonomy. Used at the
    /// dispatcher boundary (`crate::dispatcher`) when a library call returns
    /// a plain `anyhow::Error` rather than a typed `ServerError`.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<ServerError>() {
                return match e {
                    ServerError::InvalidInput(m) => ServerError::InvalidInput(m.clone()),
                    ServerError::FetchFailed(m) => ServerError::FetchFailed(m.clone()),
                    ServerError::EmbeddingFailed(m) => ServerError::EmbeddingFailed(m.clone()),
                    ServerError::LlmFailed(m) => ServerError::LlmFailed(m.clone()),
                    ServerError::VectorStoreUnavailable(m) => {
                        ServerError::VectorStoreUnavailable(m.clone())
                    }
                    ServerError::GraphUnavailable(m) => ServerError::GraphUnavailable(m.clone()),
                    ServerError::GraphCleanupFailed(m) => {
                        ServerError::GraphCleanupFailed(m.clone())
                    }
                    ServerError::Cancelled => ServerError::Cancelled,
                    ServerError::InternalError(m) => ServerError::InternalError(m.clone()),
                };
            }
        }

        // Library calls that don't carry a typed ServerError still tag their
        // anyhow message with one of these prefixes (see fetch/code_extract/
        // enrich/graph::neo4j/store::managed) — classify by that before
        // giving up and calling it internal.
        let message = err.to_string();
        if let Some(rest) = message.strip_prefix("LLMFailed:") {
            ServerError::LlmFailed(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("FetchFailed:") {
            ServerError::FetchFailed(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("InvalidInput:") {
            ServerError::InvalidInput(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("GraphCleanupFailed:") {
            ServerError::GraphCleanupFailed(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("GraphUnavailable:") {
            ServerError::GraphUnavailable(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("StoreUnavailable:") {
            ServerError::VectorStoreUnavailable(rest.trim().to_string())
        } else if let Some(rest) = message.strip_prefix("EmbeddingFailed:") {
            ServerError::EmbeddingFailed(rest.trim().to_string())
        } else {
            ServerError::InternalError(message)
        }
    }
}

/// Strips absolute paths and common credential-shaped substrings from a message.
fn sanitize(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for word in message.split_inclusive(' ') {
        let trimmed = word.trim();
        if trimmed.starts_with('/') && trimmed.len() > 1 {
            out.push_str("<path> ");
        } else if trimmed.to_ascii_lowercase().contains("key=")
            || trimmed.to_ascii_lowercase().contains("token=")
            || trimmed.to_ascii_lowercase().contains("password=")
        {
            out.push_str("<redacted> ");
        } else {
            out.push_str(word);
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_paths_and_secrets() {
        let msg = sanitize("failed to open /home/user/.secrets/api_key=sk-abc123 for read");
        assert!(!msg.contains("/home/user"));
        assert!(msg.contains("<path>"));
    }

    #[test]
    fn kind_roundtrips_for_each_variant() {
        assert_eq!(
            ServerError::InvalidInput("x".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(ServerError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
