//! Authentication and authorization extractors.
//!
//! - [`auth::AuthUser`] -- Extracts the authenticated workspace member from a JWT Bearer token.
//! - [`rbac::RequireAdmin`] -- Requires the workspace `admin` role.

pub mod auth;
pub mod rbac;
