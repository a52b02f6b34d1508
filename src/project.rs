use crate::error::{Error, Result};
use crate::user::UserId;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle of a project: submitted, then opened or rejected by review.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProjectStatus {
    NotConfirmed,
    Opened,
    Rejected,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::NotConfirmed => "not_confirmed",
            ProjectStatus::Opened => "opened",
            ProjectStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<ProjectStatus> {
        match s {
            "not_confirmed" => Ok(ProjectStatus::NotConfirmed),
            "opened" => Ok(ProjectStatus::Opened),
            "rejected" => Ok(ProjectStatus::Rejected),
            other => Err(Error::validation(format!("unknown project status: {other}"))),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub manager: UserId,
    pub title: String,
    pub description: String,
    /// Stored poster file name; opaque to the engine.
    pub poster: Option<String>,
    pub status: ProjectStatus,
    pub max_members: u32,
    /// Cohort lock: set once by the first approved member, then required of
    /// every later one.
    pub team_year: Option<String>,
    pub team: Vec<UserId>,
}

impl Project {
    pub fn is_member(&self, user: UserId) -> bool {
        self.team.contains(&user)
    }

    pub fn is_full(&self) -> bool {
        self.team.len() >= self.max_members as usize
    }

    pub fn open_seats(&self) -> usize {
        (self.max_members as usize).saturating_sub(self.team.len())
    }
}

/// Store-level creation record; manager and capacity are fixed afterwards.
#[derive(Clone, Debug)]
pub struct NewProject {
    pub manager: UserId,
    pub title: String,
    pub description: String,
    pub poster: Option<String>,
    pub status: ProjectStatus,
    pub max_members: u32,
}

/// Partial update applied by the project store. Fields left `None` are kept.
#[derive(Clone, Debug, Default)]
pub struct ProjectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub poster: Option<String>,
    pub status: Option<ProjectStatus>,
    pub team_year: Option<String>,
}

/// Manager-facing submission of a new project.
#[derive(Clone, Debug)]
pub struct ProjectSubmission {
    pub title: String,
    pub description: String,
    pub poster: Option<String>,
    pub max_members: u32,
}

/// Manager-facing edit of an existing project.
#[derive(Clone, Debug, Default)]
pub struct ProjectEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub poster: Option<String>,
}

/// Administrator decision on a submitted project.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReviewDecision {
    Accept,
    Reject,
}

#[test]
fn test_open_seats() {
    let mut p = Project {
        id: ProjectId(1),
        manager: UserId(2),
        title: "compilers".into(),
        description: String::new(),
        poster: None,
        status: ProjectStatus::Opened,
        max_members: 2,
        team_year: None,
        team: Vec::new(),
    };
    assert_eq!(p.open_seats(), 2);
    assert!(!p.is_full());
    p.team.push(UserId(3));
    p.team.push(UserId(4));
    assert_eq!(p.open_seats(), 0);
    assert!(p.is_full());
    assert!(p.is_member(UserId(3)));
}

#[test]
fn test_status_strings() {
    assert_eq!(
        "not_confirmed".parse::<ProjectStatus>(),
        Ok(ProjectStatus::NotConfirmed)
    );
    assert_eq!("opened".parse::<ProjectStatus>(), Ok(ProjectStatus::Opened));
    assert!("open".parse::<ProjectStatus>().is_err());
}
