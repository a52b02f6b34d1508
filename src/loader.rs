#![allow(clippy::cast_sign_loss)]

use crate::project::{Project, ProjectId};
use crate::request::{Request, RequestId};
use crate::store::Dataset;
use crate::user::{User, UserId};
use eyre::{Result, WrapErr};
use sqlx::any::{AnyConnectOptions, AnyRow};
use sqlx::{AnyConnection, Connection, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

pub struct Loader {
    conn: AnyConnection,
}

impl Loader {
    pub async fn new(url: &str) -> Result<Loader> {
        sqlx::any::install_default_drivers();
        let options = AnyConnectOptions::from_str(url).wrap_err("invalid database url")?;
        Ok(Loader {
            conn: AnyConnection::connect_with(&options)
                .await
                .wrap_err("cannot connect to database")?,
        })
    }

    pub async fn load(&mut self) -> Result<Dataset> {
        let users = self.load_users().await.wrap_err("cannot load users")?;
        let mut projects = self.load_projects().await.wrap_err("cannot load projects")?;
        let members = self
            .load_team_members()
            .await
            .wrap_err("cannot load team members")?;
        let requests = self.load_requests().await.wrap_err("cannot load requests")?;
        let index: HashMap<ProjectId, usize> = projects
            .iter()
            .enumerate()
            .map(|(n, p)| (p.id, n))
            .collect();
        for (project, user) in members {
            if let Some(&n) = index.get(&project) {
                projects[n].team.push(user);
            }
        }
        debug!(
            users = users.len(),
            projects = projects.len(),
            requests = requests.len(),
            "dataset loaded",
        );
        Ok(Dataset {
            users,
            projects,
            requests,
        })
    }

    async fn load_users(&mut self) -> Result<Vec<User>> {
        sqlx::query(
            "SELECT users.id, users.name, users.role, cohorts.entering_year \
             FROM users LEFT JOIN cohorts ON cohorts.id = users.cohort_id",
        )
        .map(|row: AnyRow| {
            Ok(User {
                id: UserId(row.get::<i64, _>("id")),
                name: row.get("name"),
                role: row.get::<String, _>("role").parse()?,
                entering_year: row
                    .get::<Option<String>, _>("entering_year")
                    .filter(|year| !year.is_empty()),
            })
        })
        .fetch_all(&mut self.conn)
        .await?
        .into_iter()
        .collect()
    }

    async fn load_projects(&mut self) -> Result<Vec<Project>> {
        sqlx::query(
            "SELECT id, title, description, poster, manager_id, status, max_members, team_year \
             FROM projects",
        )
        .map(|row: AnyRow| {
            Ok(Project {
                id: ProjectId(row.get::<i64, _>("id")),
                manager: UserId(row.get::<i64, _>("manager_id")),
                title: row.get("title"),
                description: row.get("description"),
                poster: row.get::<Option<String>, _>("poster"),
                status: row.get::<String, _>("status").parse()?,
                max_members: row.get::<i64, _>("max_members") as u32,
                team_year: row
                    .get::<Option<String>, _>("team_year")
                    .filter(|year| !year.is_empty()),
                team: Vec::new(),
            })
        })
        .fetch_all(&mut self.conn)
        .await?
        .into_iter()
        .collect()
    }

    async fn load_team_members(&mut self) -> Result<Vec<(ProjectId, UserId)>> {
        sqlx::query("SELECT project_id, user_id FROM team_members")
            .map(|row: AnyRow| {
                Ok((
                    ProjectId(row.get::<i64, _>("project_id")),
                    UserId(row.get::<i64, _>("user_id")),
                ))
            })
            .fetch_all(&mut self.conn)
            .await?
            .into_iter()
            .collect()
    }

    async fn load_requests(&mut self) -> Result<Vec<Request>> {
        sqlx::query(
            "SELECT id, user_id, project_id, priority, status, has_other_approved \
             FROM requests",
        )
        .map(|row: AnyRow| {
            Ok(Request {
                id: RequestId(row.get::<i64, _>("id")),
                user: UserId(row.get::<i64, _>("user_id")),
                project: ProjectId(row.get::<i64, _>("project_id")),
                priority: row.get::<i64, _>("priority") as u32,
                status: row.get::<String, _>("status").parse()?,
                approved_elsewhere: row.get("has_other_approved"),
            })
        })
        .fetch_all(&mut self.conn)
        .await?
        .into_iter()
        .collect()
    }

    #[allow(clippy::cast_possible_wrap)]
    pub async fn save(&mut self, changes: &Changes) -> Result<()> {
        let mut trans = self.conn.begin().await?;
        for request in &changes.new_requests {
            sqlx::query(
                "INSERT INTO requests (id, user_id, project_id, priority, status, has_other_approved) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(request.id.0)
            .bind(request.user.0)
            .bind(request.project.0)
            .bind(request.priority as i64)
            .bind(request.status.as_str())
            .bind(request.approved_elsewhere)
            .execute(&mut *trans)
            .await
            .wrap_err("cannot insert request")?;
        }
        for request in &changes.updated_requests {
            sqlx::query("UPDATE requests SET priority=?, status=?, has_other_approved=? WHERE id=?")
                .bind(request.priority as i64)
                .bind(request.status.as_str())
                .bind(request.approved_elsewhere)
                .bind(request.id.0)
                .execute(&mut *trans)
                .await
                .wrap_err("cannot update request")?;
        }
        for project in &changes.new_projects {
            sqlx::query(
                "INSERT INTO projects (id, title, description, poster, manager_id, status, max_members, team_year) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(project.id.0)
            .bind(&project.title)
            .bind(&project.description)
            .bind(&project.poster)
            .bind(project.manager.0)
            .bind(project.status.as_str())
            .bind(i64::from(project.max_members))
            .bind(&project.team_year)
            .execute(&mut *trans)
            .await
            .wrap_err("cannot insert project")?;
        }
        for project in &changes.updated_projects {
            sqlx::query(
                "UPDATE projects SET title=?, description=?, poster=?, status=?, team_year=? \
                 WHERE id=?",
            )
            .bind(&project.title)
            .bind(&project.description)
            .bind(&project.poster)
            .bind(project.status.as_str())
            .bind(&project.team_year)
            .bind(project.id.0)
            .execute(&mut *trans)
            .await
            .wrap_err("cannot update project")?;
        }
        for (project, user) in &changes.new_members {
            sqlx::query("INSERT INTO team_members (project_id, user_id) VALUES (?, ?)")
                .bind(project.0)
                .bind(user.0)
                .execute(&mut *trans)
                .await
                .wrap_err("cannot insert team member")?;
        }
        trans
            .commit()
            .await
            .wrap_err("error when committing transaction")?;
        Ok(())
    }
}

/// Rows to write back: the difference between the loaded snapshot and the
/// post-operation state. Users are read-only here and never diffed.
#[derive(Debug, Default)]
pub struct Changes {
    pub new_requests: Vec<Request>,
    pub updated_requests: Vec<Request>,
    pub new_projects: Vec<Project>,
    pub updated_projects: Vec<Project>,
    pub new_members: Vec<(ProjectId, UserId)>,
}

impl Changes {
    pub fn between(before: &Dataset, after: &Dataset) -> Changes {
        let mut changes = Changes::default();
        let requests: HashMap<RequestId, &Request> =
            before.requests.iter().map(|r| (r.id, r)).collect();
        for request in &after.requests {
            match requests.get(&request.id) {
                None => changes.new_requests.push(request.clone()),
                Some(&old) if old != request => changes.updated_requests.push(request.clone()),
                Some(_) => {}
            }
        }
        let projects: HashMap<ProjectId, &Project> =
            before.projects.iter().map(|p| (p.id, p)).collect();
        for project in &after.projects {
            match projects.get(&project.id) {
                None => changes.new_projects.push(project.clone()),
                Some(&old) => {
                    if Self::project_row_changed(old, project) {
                        changes.updated_projects.push(project.clone());
                    }
                    for &member in &project.team {
                        if !old.team.contains(&member) {
                            changes.new_members.push((project.id, member));
                        }
                    }
                }
            }
        }
        changes
    }

    // Membership lives in its own table, so the team is not part of the row.
    fn project_row_changed(old: &Project, new: &Project) -> bool {
        old.title != new.title
            || old.description != new.description
            || old.poster != new.poster
            || old.status != new.status
            || old.team_year != new.team_year
    }

    pub fn is_empty(&self) -> bool {
        self.new_requests.is_empty()
            && self.updated_requests.is_empty()
            && self.new_projects.is_empty()
            && self.updated_projects.is_empty()
            && self.new_members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStatus;
    use crate::request::RequestStatus;

    fn request(id: i64, priority: u32, status: RequestStatus) -> Request {
        Request {
            id: RequestId(id),
            user: UserId(1),
            project: ProjectId(10),
            priority,
            status,
            approved_elsewhere: false,
        }
    }

    fn project(id: i64, team: Vec<UserId>, team_year: Option<&str>) -> Project {
        Project {
            id: ProjectId(id),
            manager: UserId(5),
            title: "networks".into(),
            description: String::new(),
            poster: None,
            status: ProjectStatus::Opened,
            max_members: 3,
            team_year: team_year.map(str::to_owned),
            team,
        }
    }

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let data = Dataset {
            users: Vec::new(),
            projects: vec![project(10, vec![UserId(1)], Some("2020"))],
            requests: vec![request(1, 1, RequestStatus::Confirmed)],
        };
        assert!(Changes::between(&data, &data.clone()).is_empty());
    }

    #[test]
    fn diff_picks_up_an_approval() {
        let before = Dataset {
            users: Vec::new(),
            projects: vec![project(10, Vec::new(), None)],
            requests: vec![request(1, 1, RequestStatus::Pending)],
        };
        let after = Dataset {
            users: Vec::new(),
            projects: vec![project(10, vec![UserId(1)], Some("2020"))],
            requests: vec![
                request(1, 1, RequestStatus::Confirmed),
                request(2, 2, RequestStatus::Pending),
            ],
        };
        let changes = Changes::between(&before, &after);
        assert_eq!(changes.updated_requests.len(), 1);
        assert_eq!(changes.updated_requests[0].id, RequestId(1));
        assert_eq!(changes.new_requests.len(), 1);
        assert_eq!(changes.new_requests[0].id, RequestId(2));
        assert_eq!(changes.updated_projects.len(), 1);
        assert_eq!(changes.new_members, vec![(ProjectId(10), UserId(1))]);
        assert!(changes.new_projects.is_empty());
    }

    #[test]
    fn new_member_without_row_change_is_still_written() {
        let before = Dataset {
            users: Vec::new(),
            projects: vec![project(10, vec![UserId(1)], Some("2020"))],
            requests: Vec::new(),
        };
        let after = Dataset {
            users: Vec::new(),
            projects: vec![project(10, vec![UserId(1), UserId(2)], Some("2020"))],
            requests: Vec::new(),
        };
        let changes = Changes::between(&before, &after);
        assert!(changes.updated_projects.is_empty());
        assert_eq!(changes.new_members, vec![(ProjectId(10), UserId(2))]);
    }
}
