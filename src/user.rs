use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Closed set of roles known to the system.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Student,
    Mentor,
    Teacher,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Mentor => "mentor",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Role> {
        match s {
            "student" => Ok(Role::Student),
            "mentor" => Ok(Role::Mentor),
            "teacher" => Ok(Role::Teacher),
            "admin" => Ok(Role::Admin),
            other => Err(Error::validation(format!("unknown role: {other}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    /// Entering year of the user's cohort, when one is on record.
    pub entering_year: Option<String>,
}

/// Caller identity, threaded explicitly through every operation.
#[derive(Clone, Copy, Debug)]
pub struct Identity {
    pub id: UserId,
    pub role: Role,
}

/// Read-only view of users and their academic cohorts.
pub struct UserDirectory {
    users: HashMap<UserId, User>,
}

impl UserDirectory {
    pub fn new(users: Vec<User>) -> UserDirectory {
        UserDirectory {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    pub fn get(&self, id: UserId) -> Result<&User> {
        self.users.get(&id).ok_or(Error::NotFound("user"))
    }

    pub fn identity(&self, id: UserId) -> Result<Identity> {
        let user = self.get(id)?;
        Ok(Identity {
            id: user.id,
            role: user.role,
        })
    }

    /// Entering year of the user's cohort. Approvals are undecidable for
    /// users without one, so a missing cohort surfaces as not-found.
    pub fn cohort_of(&self, id: UserId) -> Result<String> {
        self.get(id)?
            .entering_year
            .clone()
            .ok_or(Error::NotFound("user cohort"))
    }

    pub fn all(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }
}

#[test]
fn role_names_round_trip() {
    for role in [Role::Student, Role::Mentor, Role::Teacher, Role::Admin] {
        assert_eq!(role.as_str().parse::<Role>(), Ok(role));
    }
    assert!("dean".parse::<Role>().is_err());
}
