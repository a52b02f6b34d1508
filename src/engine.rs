//! The allocation engine: decides whether a join request may be created, how
//! it is ranked against its siblings, and what an approval or rejection does
//! to team membership, the cohort lock and the owner's other requests.
//!
//! Each operation checks its preconditions in a fixed order, so the first
//! failing check determines the error the caller sees. Approvals serialize
//! per project and per user; a failed approval leaves no partial state, as
//! every fallible check runs before the first write and the writes cannot
//! fail while the locks are held.

use crate::error::{Conflict, Error, Result};
use crate::project::{
    NewProject, Project, ProjectEdit, ProjectId, ProjectPatch, ProjectStatus, ProjectSubmission,
    ReviewDecision,
};
use crate::request::{NewRequest, Request, RequestId, RequestStatus};
use crate::store::{Dataset, ProjectStore, RequestStore};
use crate::user::{Identity, Role, UserDirectory, UserId};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, instrument};

/// Fail-fast per-key locks. Acquisition never blocks: a busy key surfaces a
/// retryable conflict instead.
struct LockTable<K> {
    busy: Mutex<HashSet<K>>,
}

impl<K: Copy + Eq + Hash> LockTable<K> {
    fn new() -> LockTable<K> {
        LockTable {
            busy: Mutex::new(HashSet::new()),
        }
    }

    fn acquire(&self, key: K) -> Result<KeyGuard<'_, K>> {
        let mut busy = self
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !busy.insert(key) {
            return Err(Conflict::Busy.into());
        }
        Ok(KeyGuard { table: self, key })
    }
}

struct KeyGuard<'a, K: Copy + Eq + Hash> {
    table: &'a LockTable<K>,
    key: K,
}

impl<K: Copy + Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        let mut busy = self
            .table
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        busy.remove(&self.key);
    }
}

pub struct Engine {
    directory: UserDirectory,
    projects: ProjectStore,
    requests: RequestStore,
    max_pending: usize,
    project_locks: LockTable<ProjectId>,
    user_locks: LockTable<UserId>,
}

impl Engine {
    pub fn new(max_pending: usize, data: Dataset) -> Engine {
        Engine {
            directory: UserDirectory::new(data.users),
            projects: ProjectStore::new(data.projects),
            requests: RequestStore::new(data.requests),
            max_pending,
            project_locks: LockTable::new(),
            user_locks: LockTable::new(),
        }
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn snapshot(&self) -> Dataset {
        Dataset {
            users: self.directory.all().cloned().collect(),
            projects: self.projects.snapshot(),
            requests: self.requests.snapshot(),
        }
    }

    /// Files a join request for the caller. The new request lands at the end
    /// of the caller's pending queue; the project itself is untouched.
    pub fn create_request(&self, actor: &Identity, project: ProjectId) -> Result<Request> {
        let _user = self.user_locks.acquire(actor.id)?;
        let existing = self.requests.list_for_user(actor.id);
        let pending = existing.iter().filter(|r| r.is_pending()).count();
        if pending >= self.max_pending {
            return Err(Error::LimitExceeded(self.max_pending));
        }
        // The flag is inherited from the caller's earlier requests, not
        // recomputed from team membership.
        let approved_elsewhere = existing.iter().any(|r| r.approved_elsewhere);
        let request = self.requests.create(NewRequest {
            user: actor.id,
            project,
            priority: pending as u32 + 1,
            approved_elsewhere,
        })?;
        debug!(
            request = %request.id,
            user = %actor.id,
            project = %project,
            priority = request.priority,
            "join request filed",
        );
        Ok(request)
    }

    /// Reorders the caller's pending requests. The supplied pairs are applied
    /// verbatim, in array order, once the whole batch has been validated:
    /// every id must be a pending request of the caller, priorities must be
    /// positive, and the resulting pending set must not contain duplicates.
    pub fn set_priority(&self, actor: &Identity, batch: &[(RequestId, u32)]) -> Result<Vec<Request>> {
        let _user = self.user_locks.acquire(actor.id)?;
        let mut targets = HashSet::new();
        for &(id, priority) in batch {
            if priority == 0 {
                return Err(Error::validation("priority must be positive"));
            }
            if !targets.insert(id) {
                return Err(Error::validation(format!("request {id} listed twice")));
            }
            let request = self.requests.get(id)?;
            if request.user != actor.id {
                return Err(Error::Forbidden);
            }
            if !request.is_pending() {
                return Err(Error::validation(format!("request {id} is not pending")));
            }
        }
        let mut resulting: HashMap<RequestId, u32> = self
            .requests
            .list_for_user(actor.id)
            .into_iter()
            .filter(Request::is_pending)
            .map(|r| (r.id, r.priority))
            .collect();
        for &(id, priority) in batch {
            resulting.insert(id, priority);
        }
        let mut seen = HashSet::new();
        for &priority in resulting.values() {
            if !seen.insert(priority) {
                return Err(Error::validation(format!(
                    "duplicate priority {priority} in pending set"
                )));
            }
        }
        let updated = self.requests.set_priority(batch)?;
        debug!(user = %actor.id, updated = updated.len(), "request priorities reordered");
        Ok(updated)
    }

    /// Confirms a join request as the project manager. On success the
    /// requester joins the team, a previously unset cohort lock is set to the
    /// requester's cohort, and the requester's other pending requests are
    /// marked as committed elsewhere.
    #[instrument(skip_all, fields(approver = %actor.id, request = %request_id))]
    pub fn approve_request(&self, actor: &Identity, request_id: RequestId) -> Result<Request> {
        let probe = self.requests.get(request_id)?;
        let _project_guard = self.project_locks.acquire(probe.project)?;
        let _user_guard = self.user_locks.acquire(probe.user)?;
        // Re-read now that the project and the requester are locked.
        let request = self.requests.get(request_id)?;
        if request.approved_elsewhere {
            return Err(Conflict::CommittedElsewhere.into());
        }
        let project = self.projects.get(request.project)?;
        if project.manager != actor.id {
            return Err(Error::Forbidden);
        }
        if project.is_full() {
            return Err(Conflict::TeamFull.into());
        }
        let cohort = self.directory.cohort_of(request.user)?;
        let lock_cohort = match project.team_year.as_deref() {
            None => true,
            Some(year) if year == cohort => false,
            Some(year) => {
                return Err(Conflict::CohortMismatch {
                    team: year.to_owned(),
                    requester: cohort,
                }
                .into());
            }
        };
        // Commit. Nothing below can fail: both entities were validated under
        // the locks held above and requests are never deleted.
        let confirmed = self
            .requests
            .update_status(request_id, RequestStatus::Confirmed)?;
        self.projects.add_team_member(request.user, request.project)?;
        if lock_cohort {
            self.projects.update(
                request.project,
                ProjectPatch {
                    team_year: Some(cohort.clone()),
                    ..ProjectPatch::default()
                },
            )?;
        }
        let blocked = self.requests.mark_approved_elsewhere(request.user, true);
        info!(
            user = %request.user,
            project = %request.project,
            cohort = %cohort,
            blocked_siblings = blocked,
            "request approved",
        );
        Ok(confirmed)
    }

    /// Rejects a join request. Always legal regardless of the current status,
    /// idempotent when already rejected; no cascades, no capacity or cohort
    /// checks.
    pub fn cancel_request(&self, actor: &Identity, request_id: RequestId) -> Result<Request> {
        let request = self
            .requests
            .update_status(request_id, RequestStatus::Rejected)?;
        debug!(request = %request_id, actor = %actor.id, "request rejected");
        Ok(request)
    }

    /// The user's request queue, ordered by priority.
    pub fn requests_for_user(&self, user: UserId) -> Vec<Request> {
        self.requests.list_for_user(user)
    }

    /// The requests filed against a project; reserved to its manager.
    pub fn requests_for_project(
        &self,
        actor: &Identity,
        project: ProjectId,
    ) -> Result<Vec<Request>> {
        let project = self.projects.get(project)?;
        if project.manager != actor.id {
            return Err(Error::Forbidden);
        }
        Ok(self.requests.list_for_project(project.id))
    }

    pub fn project(&self, id: ProjectId) -> Result<Project> {
        self.projects.get(id)
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.list()
    }

    pub fn projects_for_manager(&self, manager: UserId) -> Vec<Project> {
        self.projects.list_for_manager(manager)
    }

    /// Submits a new project. Teachers open projects directly; anyone else's
    /// submission waits for review.
    pub fn create_project(
        &self,
        actor: &Identity,
        submission: ProjectSubmission,
    ) -> Result<Project> {
        let status = match actor.role {
            Role::Teacher => ProjectStatus::Opened,
            _ => ProjectStatus::NotConfirmed,
        };
        let project = self.projects.insert(NewProject {
            manager: actor.id,
            title: submission.title,
            description: submission.description,
            poster: submission.poster,
            status,
            max_members: submission.max_members,
        })?;
        info!(project = %project.id, manager = %actor.id, status = %project.status, "project submitted");
        Ok(project)
    }

    /// Edits a project as its manager. Any edit sends the project back to
    /// review; capacity and manager cannot change.
    pub fn update_project(
        &self,
        actor: &Identity,
        id: ProjectId,
        edit: ProjectEdit,
    ) -> Result<Project> {
        let _guard = self.project_locks.acquire(id)?;
        let project = self.projects.get(id)?;
        if project.manager != actor.id {
            return Err(Error::Forbidden);
        }
        let updated = self.projects.update(
            id,
            ProjectPatch {
                title: edit.title,
                description: edit.description,
                poster: edit.poster,
                status: Some(ProjectStatus::NotConfirmed),
                team_year: None,
            },
        )?;
        debug!(project = %id, "project edited, back to review");
        Ok(updated)
    }

    /// Administrator decision on a submitted project.
    pub fn review_project(
        &self,
        actor: &Identity,
        id: ProjectId,
        decision: ReviewDecision,
    ) -> Result<Project> {
        let _guard = self.project_locks.acquire(id)?;
        let status = match decision {
            ReviewDecision::Accept => ProjectStatus::Opened,
            ReviewDecision::Reject => ProjectStatus::Rejected,
        };
        let project = self.projects.update(
            id,
            ProjectPatch {
                status: Some(status),
                ..ProjectPatch::default()
            },
        )?;
        info!(project = %id, reviewer = %actor.id, status = %status, "project reviewed");
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;

    fn user(id: i64, name: &str, role: Role, year: Option<&str>) -> User {
        User {
            id: UserId(id),
            name: name.to_owned(),
            role,
            entering_year: year.map(str::to_owned),
        }
    }

    fn project(id: i64, manager: i64, max_members: u32) -> Project {
        Project {
            id: ProjectId(id),
            manager: UserId(manager),
            title: format!("project {id}"),
            description: String::new(),
            poster: None,
            status: ProjectStatus::Opened,
            max_members,
            team_year: None,
            team: Vec::new(),
        }
    }

    // Students 1, 3 and 4 share the 2020 cohort, student 2 entered in 2021.
    // User 5 manages all three projects; project 12 has a single seat.
    fn fixture() -> Engine {
        let users = vec![
            user(1, "Ada", Role::Student, Some("2020")),
            user(2, "Grace", Role::Student, Some("2021")),
            user(3, "Edsger", Role::Student, Some("2020")),
            user(4, "Barbara", Role::Student, Some("2020")),
            user(5, "Donald", Role::Mentor, None),
            user(6, "Niklaus", Role::Teacher, None),
            user(7, "Admin", Role::Admin, None),
            user(8, "Alan", Role::Student, None),
        ];
        let projects = vec![project(10, 5, 2), project(11, 5, 3), project(12, 5, 1)];
        Engine::new(
            5,
            Dataset {
                users,
                projects,
                requests: Vec::new(),
            },
        )
    }

    fn student(id: i64) -> Identity {
        Identity {
            id: UserId(id),
            role: Role::Student,
        }
    }

    fn manager() -> Identity {
        Identity {
            id: UserId(5),
            role: Role::Mentor,
        }
    }

    #[test]
    fn priorities_follow_creation_order() {
        let engine = fixture();
        for expected in 1..=3 {
            let request = engine.create_request(&student(1), ProjectId(10)).unwrap();
            assert_eq!(request.priority, expected);
            assert_eq!(request.status, RequestStatus::Pending);
        }
        let queue = engine.requests_for_user(UserId(1));
        assert_eq!(
            queue.iter().map(|r| r.priority).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn sixth_pending_request_is_rejected() {
        let engine = fixture();
        for n in 0..5 {
            engine.create_request(&student(1), ProjectId(100 + n)).unwrap();
        }
        let err = engine
            .create_request(&student(1), ProjectId(200))
            .unwrap_err();
        assert_eq!(err, Error::LimitExceeded(5));
        // rejected requests stop counting toward the limit
        let queue = engine.requests_for_user(UserId(1));
        engine.cancel_request(&student(1), queue[0].id).unwrap();
        engine.create_request(&student(1), ProjectId(200)).unwrap();
    }

    #[test]
    fn approval_commits_membership_and_cohort() {
        let engine = fixture();
        let request = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let confirmed = engine.approve_request(&manager(), request.id).unwrap();
        assert_eq!(confirmed.status, RequestStatus::Confirmed);
        let project = engine.project(ProjectId(10)).unwrap();
        assert_eq!(project.team, vec![UserId(1)]);
        assert_eq!(project.team_year.as_deref(), Some("2020"));
    }

    #[test]
    fn cohort_and_capacity_scenario() {
        let engine = fixture();
        let a = engine.create_request(&student(1), ProjectId(10)).unwrap();
        engine.approve_request(&manager(), a.id).unwrap();

        let b = engine.create_request(&student(2), ProjectId(10)).unwrap();
        let err = engine.approve_request(&manager(), b.id).unwrap_err();
        assert_eq!(
            err,
            Error::Conflict(Conflict::CohortMismatch {
                team: "2020".into(),
                requester: "2021".into(),
            })
        );

        let c = engine.create_request(&student(3), ProjectId(10)).unwrap();
        engine.approve_request(&manager(), c.id).unwrap();
        assert_eq!(
            engine.project(ProjectId(10)).unwrap().team,
            vec![UserId(1), UserId(3)]
        );

        let d = engine.create_request(&student(4), ProjectId(10)).unwrap();
        let err = engine.approve_request(&manager(), d.id).unwrap_err();
        assert_eq!(err, Error::Conflict(Conflict::TeamFull));
        // the failed approvals left no trace on the project
        let project = engine.project(ProjectId(10)).unwrap();
        assert_eq!(project.team.len(), 2);
        assert_eq!(project.team_year.as_deref(), Some("2020"));
    }

    #[test]
    fn approval_cascades_to_sibling_requests() {
        let engine = fixture();
        let first = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let second = engine.create_request(&student(1), ProjectId(11)).unwrap();
        engine.approve_request(&manager(), first.id).unwrap();

        let sibling = engine.requests.get(second.id).unwrap();
        assert!(sibling.is_pending());
        assert!(sibling.approved_elsewhere);
        let err = engine.approve_request(&manager(), second.id).unwrap_err();
        assert_eq!(err, Error::Conflict(Conflict::CommittedElsewhere));
    }

    #[test]
    fn new_requests_inherit_the_blocked_flag() {
        let engine = fixture();
        let first = engine.create_request(&student(1), ProjectId(10)).unwrap();
        engine.create_request(&student(1), ProjectId(11)).unwrap();
        engine.approve_request(&manager(), first.id).unwrap();
        let third = engine.create_request(&student(1), ProjectId(12)).unwrap();
        assert!(third.approved_elsewhere);
    }

    #[test]
    fn rejection_is_unguarded_and_idempotent() {
        let engine = fixture();
        let request = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let rejected = engine.cancel_request(&student(1), request.id).unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        let again = engine.cancel_request(&student(1), request.id).unwrap();
        assert_eq!(again.status, RequestStatus::Rejected);
        let err = engine
            .cancel_request(&student(1), RequestId(99))
            .unwrap_err();
        assert_eq!(err, Error::NotFound("request"));
    }

    #[test]
    fn approval_failure_precedence() {
        let engine = fixture();
        // unknown request wins over everything else
        let err = engine
            .approve_request(&manager(), RequestId(99))
            .unwrap_err();
        assert_eq!(err, Error::NotFound("request"));

        // a blocked request reports the commitment conflict even when its
        // project does not exist
        let kept = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let dangling = engine.create_request(&student(1), ProjectId(999)).unwrap();
        engine.approve_request(&manager(), kept.id).unwrap();
        let err = engine.approve_request(&manager(), dangling.id).unwrap_err();
        assert_eq!(err, Error::Conflict(Conflict::CommittedElsewhere));

        // an unblocked request to a missing project reports the project
        let dangling = engine.create_request(&student(2), ProjectId(999)).unwrap();
        let err = engine.approve_request(&manager(), dangling.id).unwrap_err();
        assert_eq!(err, Error::NotFound("project"));

        // manager check comes before capacity
        let request = engine.create_request(&student(2), ProjectId(12)).unwrap();
        let err = engine.approve_request(&student(3), request.id).unwrap_err();
        assert_eq!(err, Error::Forbidden);
    }

    #[test]
    fn approving_a_user_without_cohort_fails_cleanly() {
        let engine = fixture();
        let request = engine.create_request(&student(8), ProjectId(10)).unwrap();
        let err = engine.approve_request(&manager(), request.id).unwrap_err();
        assert_eq!(err, Error::NotFound("user cohort"));
        let project = engine.project(ProjectId(10)).unwrap();
        assert!(project.team.is_empty());
        assert!(project.team_year.is_none());
    }

    #[test]
    fn set_priority_reorders_pending_requests() {
        let engine = fixture();
        let first = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let second = engine.create_request(&student(1), ProjectId(11)).unwrap();
        let third = engine.create_request(&student(1), ProjectId(12)).unwrap();
        engine
            .set_priority(&student(1), &[(third.id, 1), (first.id, 3)])
            .unwrap();
        let queue = engine.requests_for_user(UserId(1));
        assert_eq!(
            queue.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![third.id, second.id, first.id]
        );
    }

    #[test]
    fn set_priority_validates_the_batch() {
        let engine = fixture();
        let first = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let second = engine.create_request(&student(1), ProjectId(11)).unwrap();
        let foreign = engine.create_request(&student(2), ProjectId(10)).unwrap();

        let err = engine
            .set_priority(&student(1), &[(first.id, 0)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine
            .set_priority(&student(1), &[(foreign.id, 1)])
            .unwrap_err();
        assert_eq!(err, Error::Forbidden);

        let err = engine
            .set_priority(&student(1), &[(RequestId(99), 1)])
            .unwrap_err();
        assert_eq!(err, Error::NotFound("request"));

        // a duplicate priority within the resulting pending set is refused
        let err = engine
            .set_priority(&student(1), &[(first.id, 2)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        // and nothing was applied
        assert_eq!(engine.requests.get(first.id).unwrap().priority, 1);
        assert_eq!(engine.requests.get(second.id).unwrap().priority, 2);

        let err = engine
            .set_priority(&student(1), &[(first.id, 2), (first.id, 1)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn racing_approvals_fill_exactly_one_slot() {
        let engine = fixture();
        let first = engine.create_request(&student(1), ProjectId(12)).unwrap();
        let second = engine.create_request(&student(3), ProjectId(12)).unwrap();
        let engine = &engine;
        let outcomes = std::thread::scope(|scope| {
            [first.id, second.id]
                .map(|id| scope.spawn(move || engine.approve_request(&manager(), id)))
                .map(|handle| handle.join().expect("approval thread panicked"))
        });
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert_eq!(engine.project(ProjectId(12)).unwrap().team.len(), 1);
    }

    #[test]
    fn project_requests_are_reserved_to_the_manager() {
        let engine = fixture();
        let request = engine.create_request(&student(1), ProjectId(10)).unwrap();
        let incoming = engine
            .requests_for_project(&manager(), ProjectId(10))
            .unwrap();
        assert_eq!(incoming, vec![request]);
        let err = engine
            .requests_for_project(&student(2), ProjectId(10))
            .unwrap_err();
        assert_eq!(err, Error::Forbidden);
        let err = engine
            .requests_for_project(&manager(), ProjectId(999))
            .unwrap_err();
        assert_eq!(err, Error::NotFound("project"));
    }

    #[test]
    fn project_submission_status_depends_on_role() {
        let engine = fixture();
        let submission = ProjectSubmission {
            title: "operating systems".into(),
            description: String::new(),
            poster: None,
            max_members: 4,
        };
        let teacher = Identity {
            id: UserId(6),
            role: Role::Teacher,
        };
        let opened = engine
            .create_project(&teacher, submission.clone())
            .unwrap();
        assert_eq!(opened.status, ProjectStatus::Opened);
        let submitted = engine.create_project(&manager(), submission).unwrap();
        assert_eq!(submitted.status, ProjectStatus::NotConfirmed);

        let admin = Identity {
            id: UserId(7),
            role: Role::Admin,
        };
        let reviewed = engine
            .review_project(&admin, submitted.id, ReviewDecision::Accept)
            .unwrap();
        assert_eq!(reviewed.status, ProjectStatus::Opened);
        let reviewed = engine
            .review_project(&admin, opened.id, ReviewDecision::Reject)
            .unwrap();
        assert_eq!(reviewed.status, ProjectStatus::Rejected);
    }

    #[test]
    fn editing_a_project_sends_it_back_to_review() {
        let engine = fixture();
        let err = engine
            .update_project(&student(1), ProjectId(10), ProjectEdit::default())
            .unwrap_err();
        assert_eq!(err, Error::Forbidden);
        let updated = engine
            .update_project(
                &manager(),
                ProjectId(10),
                ProjectEdit {
                    title: Some("renamed".into()),
                    ..ProjectEdit::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.status, ProjectStatus::NotConfirmed);
        assert_eq!(updated.max_members, 2);
    }
}
