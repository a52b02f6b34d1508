use crate::access::Operation;
use crate::config::Config;
use crate::engine::Engine;
use crate::loader::{Changes, Loader};
use crate::project::{ProjectEdit, ProjectId, ProjectSubmission, ReviewDecision};
use crate::request::RequestId;
use crate::user::UserId;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use eyre::Result;
use std::path::{Path, PathBuf};
use tracing::{Level, info};

mod access;
mod checks;
mod config;
mod display;
mod engine;
mod error;
mod export;
mod loader;
mod project;
mod request;
mod stats;
mod store;
mod user;

/// Coordinate student join requests for supervised projects.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Use FILE instead of rallot.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Do not write back results to database
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Set verbosity level
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// File a join request on behalf of a student
    Request { user: i64, project: i64 },
    /// Reorder a student's pending requests; the first id gets priority 1
    Prioritize {
        user: i64,
        #[arg(required = true)]
        requests: Vec<i64>,
    },
    /// Approve a join request as the project manager
    Approve { approver: i64, request: i64 },
    /// Reject or cancel a join request
    Cancel { actor: i64, request: i64 },
    /// Submit a new project
    NewProject {
        manager: i64,
        title: String,
        max_members: u32,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        poster: Option<String>,
    },
    /// Edit a project; any edit sends it back to review
    EditProject {
        manager: i64,
        project: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        poster: Option<String>,
    },
    /// Review a submitted project as an administrator
    Review {
        admin: i64,
        project: i64,
        decision: Decision,
    },
    /// Show a student's request queue
    Queue { user: i64 },
    /// Show the requests filed against a project
    Incoming { manager: i64, project: i64 },
    /// List all projects
    Projects,
    /// List the projects managed by a user
    Managed { manager: i64 },
    /// Show one project's roster
    Roster { project: i64 },
    /// Display aggregate statistics
    Stats,
    /// Run consistency checks over the stored data
    Check,
    /// Export confirmed team rosters as CSV
    Export { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    Accept,
    Reject,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    let config = Config::load(cli.config.as_deref().unwrap_or(Path::new("rallot.toml")))?;
    let mut loader = Loader::new(&config.database.url).await?;
    let loaded = loader.load().await?;
    let engine = Engine::new(config.engine.max_pending_requests, loaded.clone());
    run(&engine, &config, &cli.command)?;
    let changes = Changes::between(&loaded, &engine.snapshot());
    if cli.dry_run {
        info!("dry run, not writing back");
    } else if !changes.is_empty() {
        loader.save(&changes).await?;
    }
    Ok(())
}

fn run(engine: &Engine, config: &Config, command: &Command) -> Result<()> {
    match command {
        Command::Request { user, project } => {
            let actor = engine.directory().identity(UserId(*user))?;
            access::authorize(&actor, Operation::CreateRequest)?;
            let request = engine.create_request(&actor, ProjectId(*project))?;
            println!(
                "Request {} filed with priority {}",
                request.id, request.priority
            );
            display::display_queue(engine, actor.id);
        }
        Command::Prioritize { user, requests } => {
            let actor = engine.directory().identity(UserId(*user))?;
            access::authorize(&actor, Operation::SetPriority)?;
            let batch = requests
                .iter()
                .enumerate()
                .map(|(n, &id)| (RequestId(id), n as u32 + 1))
                .collect::<Vec<_>>();
            engine.set_priority(&actor, &batch)?;
            display::display_queue(engine, actor.id);
        }
        Command::Approve { approver, request } => {
            let actor = engine.directory().identity(UserId(*approver))?;
            access::authorize(&actor, Operation::ApproveRequest)?;
            let request = engine.approve_request(&actor, RequestId(*request))?;
            println!("Request {} confirmed", request.id);
            display::display_roster(engine, request.project)?;
        }
        Command::Cancel { actor, request } => {
            let actor = engine.directory().identity(UserId(*actor))?;
            access::authorize(&actor, Operation::CancelRequest)?;
            let request = engine.cancel_request(&actor, RequestId(*request))?;
            println!("Request {} rejected", request.id);
        }
        Command::NewProject {
            manager,
            title,
            max_members,
            description,
            poster,
        } => {
            let actor = engine.directory().identity(UserId(*manager))?;
            access::authorize(&actor, Operation::CreateProject)?;
            let project = engine.create_project(
                &actor,
                ProjectSubmission {
                    title: title.clone(),
                    description: description.clone().unwrap_or_default(),
                    poster: poster.clone(),
                    max_members: *max_members,
                },
            )?;
            println!("Project {} created with status {}", project.id, project.status);
        }
        Command::EditProject {
            manager,
            project,
            title,
            description,
            poster,
        } => {
            let actor = engine.directory().identity(UserId(*manager))?;
            access::authorize(&actor, Operation::UpdateProject)?;
            let project = engine.update_project(
                &actor,
                ProjectId(*project),
                ProjectEdit {
                    title: title.clone(),
                    description: description.clone(),
                    poster: poster.clone(),
                },
            )?;
            println!("Project {} updated, status {}", project.id, project.status);
        }
        Command::Review {
            admin,
            project,
            decision,
        } => {
            let actor = engine.directory().identity(UserId(*admin))?;
            access::authorize(&actor, Operation::ReviewProject)?;
            let decision = match decision {
                Decision::Accept => ReviewDecision::Accept,
                Decision::Reject => ReviewDecision::Reject,
            };
            let project = engine.review_project(&actor, ProjectId(*project), decision)?;
            println!("Project {} is now {}", project.id, project.status);
        }
        Command::Queue { user } => display::display_queue(engine, UserId(*user)),
        Command::Incoming { manager, project } => {
            let actor = engine.directory().identity(UserId(*manager))?;
            access::authorize(&actor, Operation::ListProjectRequests)?;
            let requests = engine.requests_for_project(&actor, ProjectId(*project))?;
            display::display_incoming(engine, &requests);
        }
        Command::Projects => display::display_projects(engine),
        Command::Managed { manager } => display::display_managed(engine, UserId(*manager)),
        Command::Roster { project } => display::display_roster(engine, ProjectId(*project))?,
        Command::Stats => display::display_stats(engine),
        Command::Check => {
            let data = engine.snapshot();
            checks::warn_on_oddities(&data, config.engine.max_pending_requests);
            checks::ensure_consistent(&data)?;
            println!("No inconsistencies found");
        }
        Command::Export { path } => export::export_rosters(engine, path)?,
    }
    Ok(())
}
