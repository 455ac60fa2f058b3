//! Authentication and session management

pub mod account;
pub mod cache;
pub mod expiry;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod refresh_tokens;

pub use cache::{AccountSnapshot, AuthCache};
pub use expiry::PasswordPolicy;
pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{parse_bearer, require_auth, AuthState, AuthUser};
pub use password::{
    generate_compliant_password, hash_password, validate_password_strength, verify_password,
};
pub use refresh_tokens::{RefreshCheck, RefreshTokenStore};
