use crate::store::Dataset;
use crate::user::{User, UserId};
use eyre::{Result, bail};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Hard consistency requirements over a dataset; the first violation aborts.
pub fn ensure_consistent(data: &Dataset) -> Result<()> {
    let users: HashMap<UserId, &User> = data.users.iter().map(|u| (u.id, u)).collect();
    for project in &data.projects {
        if project.team.len() > project.max_members as usize {
            bail!(
                "project {} has {} members for {} seats",
                project.title,
                project.team.len(),
                project.max_members
            );
        }
        match &project.team_year {
            Some(year) => {
                for member in &project.team {
                    let cohort = users.get(member).and_then(|u| u.entering_year.as_deref());
                    if cohort != Some(year.as_str()) {
                        bail!(
                            "project {} is locked to cohort {} but member {} is not in it",
                            project.title,
                            year,
                            member
                        );
                    }
                }
            }
            None => {
                if !project.team.is_empty() {
                    bail!(
                        "project {} has members but no cohort lock",
                        project.title
                    );
                }
            }
        }
    }
    Ok(())
}

/// Softer diagnostics: warn and keep going.
pub fn warn_on_oddities(data: &Dataset, max_pending: usize) {
    let mut pending: HashMap<UserId, Vec<u32>> = HashMap::new();
    for request in data.requests.iter().filter(|r| r.is_pending()) {
        pending.entry(request.user).or_default().push(request.priority);
    }
    for (user, mut priorities) in pending {
        if priorities.len() > max_pending {
            warn!(
                user = %user,
                pending = priorities.len(),
                limit = max_pending,
                "user holds more pending requests than the limit",
            );
        }
        priorities.sort_unstable();
        if priorities
            .iter()
            .enumerate()
            .any(|(n, &priority)| priority as usize != n + 1)
        {
            warn!(user = %user, priorities = ?priorities, "pending priorities are not dense");
        }
    }
    let projects: HashSet<_> = data.projects.iter().map(|p| p.id).collect();
    let users: HashSet<_> = data.users.iter().map(|u| u.id).collect();
    for request in &data.requests {
        if !projects.contains(&request.project) {
            warn!(request = %request.id, project = %request.project, "request points at an unknown project");
        }
        if !users.contains(&request.user) {
            warn!(request = %request.id, user = %request.user, "request points at an unknown user");
        }
    }
}
