//! Well-known role name constants.
//!
//! These must match the role names issued in access-token claims.

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";
