pub mod error;
pub mod token;

pub use error::AuthError;
pub use token::{
    bearer_token, derive_user_id, normalize_username, Claims, TokenKeys, DEFAULT_TOKEN_TTL,
};
