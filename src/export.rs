use crate::engine::Engine;
use eyre::{Result, WrapErr};
use std::path::Path;

/// Write the confirmed team rosters as CSV, one row per member.
pub fn export_rosters(engine: &Engine, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("cannot create export file {}", path.display()))?;
    writer
        .write_record(["project_id", "title", "team_year", "user_id", "member"])
        .wrap_err("cannot write export header")?;
    let mut projects = engine.projects();
    projects.sort_by_key(|p| p.title.clone());
    for project in projects {
        let mut members = project
            .team
            .iter()
            .map(|&member| {
                let name = engine
                    .directory()
                    .get(member)
                    .map(|u| u.name.clone())
                    .unwrap_or_else(|_| format!("user {member}"));
                (name, member)
            })
            .collect::<Vec<_>>();
        members.sort();
        for (name, member) in members {
            writer
                .write_record([
                    project.id.0.to_string(),
                    project.title.clone(),
                    project.team_year.clone().unwrap_or_default(),
                    member.0.to_string(),
                    name,
                ])
                .wrap_err("cannot write roster row")?;
        }
    }
    writer.flush().wrap_err("cannot flush export file")?;
    Ok(())
}
