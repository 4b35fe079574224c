//! Authentication module for managing tokens and sign-in state.
//!
//! This module provides:
//! - `TokenSet`: the access/refresh pair with its absolute expiry
//! - `AuthBackend`: the hosted auth API contract, with `RestAuthBackend`
//! - `TokenManager`: expiry checks and de-duplicated refresh
//! - `AuthService`: sign-in with cached credentials, and sign-out

pub mod backend;
pub mod manager;
pub mod service;
pub mod tokens;

pub use backend::{AuthBackend, RestAuthBackend};
pub use manager::{TokenManager, DEFAULT_EXPIRY_BUFFER};
pub use service::AuthService;
pub use tokens::{AuthSession, Credentials, TokenSet, UserProfile};
