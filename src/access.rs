//! Authorization table: which roles may invoke which operation.
//!
//! The transport layer authorizes before calling into the engine; the engine
//! trusts the identity it is handed and only enforces business rules such as
//! manager equality.

use crate::error::{Error, Result};
use crate::user::{Identity, Role};

/// Engine entry points a transport can expose.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    CreateRequest,
    SetPriority,
    ApproveRequest,
    CancelRequest,
    CreateProject,
    UpdateProject,
    ReviewProject,
    ListProjectRequests,
}

pub fn allowed_roles(operation: Operation) -> &'static [Role] {
    use Operation::*;
    match operation {
        CreateRequest | SetPriority => &[Role::Student],
        ApproveRequest => &[Role::Mentor, Role::Teacher],
        CancelRequest => &[Role::Student, Role::Mentor, Role::Teacher, Role::Admin],
        CreateProject | UpdateProject => &[Role::Mentor, Role::Teacher],
        ReviewProject => &[Role::Admin],
        ListProjectRequests => &[Role::Mentor, Role::Teacher, Role::Admin],
    }
}

pub fn authorize(actor: &Identity, operation: Operation) -> Result<()> {
    if allowed_roles(operation).contains(&actor.role) {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}
