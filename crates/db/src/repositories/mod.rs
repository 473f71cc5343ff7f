//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async query methods that
//! accept `&PgPool` (or an open transaction) as the first argument.

pub mod approval_repo;
pub mod audit_repo;
pub mod delegation_repo;
pub mod instance_repo;
pub mod step_repo;
pub mod user_repo;
pub mod workflow_repo;

pub use approval_repo::ApprovalRepo;
pub use audit_repo::AuditLogRepo;
pub use delegation_repo::DelegationRepo;
pub use instance_repo::InstanceRepo;
pub use step_repo::{ConditionRepo, StepRepo};
pub use user_repo::{UserRepo, WorkspaceRepo};
pub use workflow_repo::WorkflowRepo;

/// Build an `ILIKE` pattern matching `term` anywhere, with wildcards in the
/// term itself escaped.
pub(crate) fn contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
