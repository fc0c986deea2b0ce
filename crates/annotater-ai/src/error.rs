use thiserror::Error;

/// Failure to obtain a response from the model. An empty candidate list is
/// not an error.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("authentication rejected ({status}): check GEMINI_API_KEY")]
    Auth { status: u16 },

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not decode model response: {0}")]
    Decode(String),

    #[error("prompt blocked by the model: {0}")]
    Blocked(String),

    #[error("could not read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
