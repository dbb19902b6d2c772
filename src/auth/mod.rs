//! Stateless session authentication
//!
//! Handles:
//! - Signing and verifying session tokens
//! - Reading the session cookie
//! - The session extractor for protected endpoints

mod middleware;
pub mod session;
pub mod token;

pub use middleware::{CurrentSession, authenticate_headers};
pub use session::{
    Session, SessionError, SessionIdentity, extract_session, removal_cookie, session_cookie,
};
pub use token::TokenError;

/// Name of the session cookie
pub const SESSION_COOKIE_NAME: &str = "faasr_session_v2";

/// Session lifetime in seconds (7 days)
pub const SESSION_TTL_SECS: i64 = 604_800;
