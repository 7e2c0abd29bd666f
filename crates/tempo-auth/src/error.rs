#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing token")]
    Missing,

    #[error("invalid token: {0}")]
    Malformed(String),

    #[error("token expired")]
    Expired,

    #[error("token issue failed: {0}")]
    Issue(String),
}
