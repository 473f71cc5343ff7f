//! Identifier and time aliases shared by every cadence crate.

/// Primary key of every stored record (workflows, steps, instances,
/// approvals, delegations, audit entries) and of users and workspaces.
/// Maps to a Postgres `BIGSERIAL`.
pub type DbId = i64;

/// Instants are always UTC; `TIMESTAMPTZ` in the database.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
