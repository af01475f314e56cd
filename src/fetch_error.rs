#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Failed to decode provider payload: {0}")]
    Decode(#[from] serde_json::Error),
}
