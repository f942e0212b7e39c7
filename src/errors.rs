use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OAuth2 error: {0}")]
    OAuth2(String), // oauth2 request errors are generic over the HTTP client, stringify them

    #[error("Gmail API error: {0}")]
    GmailApi(#[from] google_gmail1::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Invalid HTTP request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Message body is not valid base64: {0}")]
    BodyDecode(#[from] base64::DecodeError),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Failed to read credentials: {0}")]
    CredentialsError(String),

    #[error("Summarization request failed: {0}")]
    Summarizer(String),
}
