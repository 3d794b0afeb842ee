//! Impersonation-aware OAuth 2.0 token issuance
//!
//! ## Supported grants
//! - Client Credentials (RFC 6749 Section 4.4): the external service acts
//!   through its own service account
//! - JWT Bearer (RFC 7523): the external service acts on behalf of a user,
//!   bounded by the intersection of the user's permissions and the service's
//!   impersonate permissions

pub mod claims;
pub mod dispatcher;
pub mod error;
pub mod grants;
pub mod protocol;

pub use dispatcher::TokenDispatcher;
pub use error::OAuthError;
pub use grants::Collaborators;
pub use protocol::ProtocolEngine;
