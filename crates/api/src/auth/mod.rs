//! Authentication primitives.
//!
//! - [`jwt`] -- workspace-scoped JWT access tokens.

pub mod jwt;
