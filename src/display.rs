use crate::engine::Engine;
use crate::error::Result;
use crate::project::ProjectId;
use crate::request::Request;
use crate::stats;
use crate::user::UserId;

fn user_name(engine: &Engine, user: UserId) -> String {
    engine
        .directory()
        .get(user)
        .map(|u| u.name.clone())
        .unwrap_or_else(|_| format!("user {user}"))
}

fn project_title(engine: &Engine, project: ProjectId) -> String {
    engine
        .project(project)
        .map(|p| p.title)
        .unwrap_or_else(|_| format!("project {project}"))
}

/// Print a student's request queue, most wanted first.
pub fn display_queue(engine: &Engine, user: UserId) {
    let requests = engine.requests_for_user(user);
    let name = user_name(engine, user);
    if requests.is_empty() {
        println!("No requests for {name}");
        return;
    }
    println!("Requests of {name}:");
    for request in requests {
        print!(
            "  {}. {} [{}]",
            request.priority,
            project_title(engine, request.project),
            request.status
        );
        if request.approved_elsewhere {
            print!(" (committed elsewhere)");
        }
        println!();
    }
}

/// Print the requests filed against a project, oldest first.
pub fn display_incoming(engine: &Engine, requests: &[Request]) {
    if requests.is_empty() {
        println!("No incoming requests");
        return;
    }
    println!("Incoming requests:");
    for request in requests {
        print!(
            "  - #{} {} (priority {}) [{}]",
            request.id,
            user_name(engine, request.user),
            request.priority,
            request.status
        );
        if request.approved_elsewhere {
            print!(" (committed elsewhere)");
        }
        println!();
    }
}

pub fn display_roster(engine: &Engine, project: ProjectId) -> Result<()> {
    let project = engine.project(project)?;
    print!(
        "{} [{}]: {}/{} seats filled",
        project.title,
        project.status,
        project.team.len(),
        project.max_members
    );
    if let Some(year) = &project.team_year {
        print!(", cohort {year}");
    }
    println!();
    let mut members = project
        .team
        .iter()
        .map(|&m| user_name(engine, m))
        .collect::<Vec<_>>();
    members.sort();
    for member in members {
        println!("  - {member}");
    }
    Ok(())
}

pub fn display_projects(engine: &Engine) {
    let mut projects = engine.projects();
    projects.sort_by_key(|p| p.title.clone());
    for project in projects {
        println!(
            "{} (#{}) [{}]: managed by {}, {}/{} seats filled, {} open",
            project.title,
            project.id,
            project.status,
            user_name(engine, project.manager),
            project.team.len(),
            project.max_members,
            project.open_seats()
        );
    }
}

/// Print the projects a manager is responsible for.
pub fn display_managed(engine: &Engine, manager: UserId) {
    let projects = engine.projects_for_manager(manager);
    if projects.is_empty() {
        println!("No projects managed by {}", user_name(engine, manager));
        return;
    }
    println!("Projects managed by {}:", user_name(engine, manager));
    for project in projects {
        println!(
            "  - {} (#{}) [{}]: {}/{} seats filled",
            project.title,
            project.id,
            project.status,
            project.team.len(),
            project.max_members
        );
    }
}

pub fn display_stats(engine: &Engine) {
    let data = engine.snapshot();
    let counts = stats::tally(&data.requests);
    println!(
        "Requests pending/confirmed/rejected: {}/{}/{}",
        counts.pending, counts.confirmed, counts.rejected
    );
    let ranks = stats::priority_histogram(&data.requests);
    let cumul = ranks.iter().scan(0, |s, &r| {
        *s += r;
        Some(*s)
    });
    let total: usize = ranks.iter().sum();
    if total > 0 {
        println!("Pending requests by priority rank:");
        for (rank, (n, c)) in ranks.iter().zip(cumul).enumerate() {
            if *n != 0 {
                println!(
                    "  - rank {}: {} (cumulative {} - {:.2}%)",
                    rank + 1,
                    n,
                    c,
                    100.0 * c as f32 / total as f32
                );
            }
        }
    }
    let (filled, seats) = stats::occupancy(&data.projects);
    println!("Seats filled in opened projects: {filled}/{seats}");
}
