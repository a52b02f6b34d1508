use crate::error::{Error, Result};
use crate::project::ProjectId;
use crate::user::UserId;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// `Pending` requests compete for approval; the other two states are final.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequestStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Confirmed => "confirmed",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<RequestStatus> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "confirmed" => Ok(RequestStatus::Confirmed),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(Error::validation(format!("unknown request status: {other}"))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A student's request to join a project. Requests are never hard-deleted.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub user: UserId,
    pub project: ProjectId,
    /// Ordinal rank among the owner's pending requests, 1 is most wanted.
    pub priority: u32,
    pub status: RequestStatus,
    /// The owner already holds a confirmed request elsewhere; approval of
    /// this one is blocked without auto-rejecting it.
    pub approved_elsewhere: bool,
}

impl Request {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}

/// Creation record; new requests always start out pending.
#[derive(Clone, Debug)]
pub struct NewRequest {
    pub user: UserId,
    pub project: ProjectId,
    pub priority: u32,
    pub approved_elsewhere: bool,
}

#[test]
fn test_status_strings() {
    for status in [
        RequestStatus::Pending,
        RequestStatus::Confirmed,
        RequestStatus::Rejected,
    ] {
        assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
    }
    assert!("approved".parse::<RequestStatus>().is_err());
}
