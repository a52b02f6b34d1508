//! In-memory request and project stores.
//!
//! Both stores hand out clones and keep their maps behind an `RwLock`, so a
//! read never observes a half-applied write. Cross-store transitions are
//! serialized by the engine, not here.

use crate::error::{Error, Result};
use crate::project::{NewProject, Project, ProjectId, ProjectPatch};
use crate::request::{NewRequest, Request, RequestId, RequestStatus};
use crate::user::{User, UserId};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

/// A full copy of the coordinator's state, as loaded from or written back to
/// the database.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub users: Vec<User>,
    pub projects: Vec<Project>,
    pub requests: Vec<Request>,
}

struct Requests {
    by_id: HashMap<RequestId, Request>,
    next_id: i64,
}

pub struct RequestStore {
    inner: RwLock<Requests>,
}

impl RequestStore {
    pub fn new(requests: Vec<Request>) -> RequestStore {
        let next_id = requests.iter().map(|r| r.id.0).max().unwrap_or(0) + 1;
        RequestStore {
            inner: RwLock::new(Requests {
                by_id: requests.into_iter().map(|r| (r.id, r)).collect(),
                next_id,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Requests> {
        self.inner.read().expect("request store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Requests> {
        self.inner.write().expect("request store lock poisoned")
    }

    pub fn get(&self, id: RequestId) -> Result<Request> {
        self.read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound("request"))
    }

    /// All requests of the user, ordered by priority ascending.
    pub fn list_for_user(&self, user: UserId) -> Vec<Request> {
        let mut requests = self
            .read()
            .by_id
            .values()
            .filter(|r| r.user == user)
            .cloned()
            .collect::<Vec<_>>();
        requests.sort_by_key(|r| (r.priority, r.id));
        requests
    }

    pub fn list_for_project(&self, project: ProjectId) -> Vec<Request> {
        let mut requests = self
            .read()
            .by_id
            .values()
            .filter(|r| r.project == project)
            .cloned()
            .collect::<Vec<_>>();
        requests.sort_by_key(|r| r.id);
        requests
    }

    pub fn create(&self, new: NewRequest) -> Result<Request> {
        if new.priority == 0 {
            return Err(Error::validation("priority must be positive"));
        }
        let mut inner = self.write();
        let id = RequestId(inner.next_id);
        inner.next_id += 1;
        let request = Request {
            id,
            user: new.user,
            project: new.project,
            priority: new.priority,
            status: RequestStatus::Pending,
            approved_elsewhere: new.approved_elsewhere,
        };
        inner.by_id.insert(id, request.clone());
        trace!(request = %id, user = %request.user, project = %request.project, "request stored");
        Ok(request)
    }

    /// Applies each `{id, priority}` pair independently, in the given order.
    /// The first failure is surfaced; earlier pairs stay applied.
    pub fn set_priority(&self, batch: &[(RequestId, u32)]) -> Result<Vec<Request>> {
        let mut inner = self.write();
        let mut updated = Vec::with_capacity(batch.len());
        for &(id, priority) in batch {
            if priority == 0 {
                return Err(Error::validation("priority must be positive"));
            }
            let request = inner.by_id.get_mut(&id).ok_or(Error::NotFound("request"))?;
            request.priority = priority;
            updated.push(request.clone());
        }
        Ok(updated)
    }

    pub fn update_status(&self, id: RequestId, status: RequestStatus) -> Result<Request> {
        let mut inner = self.write();
        let request = inner.by_id.get_mut(&id).ok_or(Error::NotFound("request"))?;
        request.status = status;
        trace!(request = %id, status = %status, "request status updated");
        Ok(request.clone())
    }

    /// Bulk write of the derived flag on every pending request of the user.
    /// Returns the number of requests touched.
    pub fn mark_approved_elsewhere(&self, user: UserId, value: bool) -> usize {
        let mut inner = self.write();
        let mut touched = 0;
        for request in inner.by_id.values_mut() {
            if request.user == user && request.is_pending() && request.approved_elsewhere != value {
                request.approved_elsewhere = value;
                touched += 1;
            }
        }
        touched
    }

    pub fn snapshot(&self) -> Vec<Request> {
        let mut requests = self.read().by_id.values().cloned().collect::<Vec<_>>();
        requests.sort_by_key(|r| r.id);
        requests
    }
}

struct Projects {
    by_id: HashMap<ProjectId, Project>,
    next_id: i64,
}

pub struct ProjectStore {
    inner: RwLock<Projects>,
}

impl ProjectStore {
    pub fn new(projects: Vec<Project>) -> ProjectStore {
        let next_id = projects.iter().map(|p| p.id.0).max().unwrap_or(0) + 1;
        ProjectStore {
            inner: RwLock::new(Projects {
                by_id: projects.into_iter().map(|p| (p.id, p)).collect(),
                next_id,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Projects> {
        self.inner.read().expect("project store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Projects> {
        self.inner.write().expect("project store lock poisoned")
    }

    pub fn get(&self, id: ProjectId) -> Result<Project> {
        self.read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound("project"))
    }

    pub fn list(&self) -> Vec<Project> {
        let mut projects = self.read().by_id.values().cloned().collect::<Vec<_>>();
        projects.sort_by_key(|p| p.id);
        projects
    }

    pub fn list_for_manager(&self, manager: UserId) -> Vec<Project> {
        let mut projects = self
            .read()
            .by_id
            .values()
            .filter(|p| p.manager == manager)
            .cloned()
            .collect::<Vec<_>>();
        projects.sort_by_key(|p| p.id);
        projects
    }

    pub fn insert(&self, new: NewProject) -> Result<Project> {
        if new.max_members == 0 {
            return Err(Error::validation("a project needs at least one seat"));
        }
        let mut inner = self.write();
        let id = ProjectId(inner.next_id);
        inner.next_id += 1;
        let project = Project {
            id,
            manager: new.manager,
            title: new.title,
            description: new.description,
            poster: new.poster,
            status: new.status,
            max_members: new.max_members,
            team_year: None,
            team: Vec::new(),
        };
        inner.by_id.insert(id, project.clone());
        trace!(project = %id, manager = %project.manager, "project stored");
        Ok(project)
    }

    /// Appends the user to the team; idempotent when already a member.
    pub fn add_team_member(&self, user: UserId, project: ProjectId) -> Result<Project> {
        let mut inner = self.write();
        let project = inner
            .by_id
            .get_mut(&project)
            .ok_or(Error::NotFound("project"))?;
        if !project.is_member(user) {
            project.team.push(user);
        }
        Ok(project.clone())
    }

    /// Applies a partial update. `status` and `team_year` move independently;
    /// capacity and manager cannot change after creation.
    pub fn update(&self, id: ProjectId, patch: ProjectPatch) -> Result<Project> {
        let mut inner = self.write();
        let project = inner.by_id.get_mut(&id).ok_or(Error::NotFound("project"))?;
        if let Some(title) = patch.title {
            project.title = title;
        }
        if let Some(description) = patch.description {
            project.description = description;
        }
        if let Some(poster) = patch.poster {
            project.poster = Some(poster);
        }
        if let Some(status) = patch.status {
            project.status = status;
        }
        if let Some(team_year) = patch.team_year {
            project.team_year = Some(team_year);
        }
        Ok(project.clone())
    }

    pub fn snapshot(&self) -> Vec<Project> {
        self.list()
    }
}
