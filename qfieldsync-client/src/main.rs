use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use qfieldsync_client::{
    AppError, CheckoutPrompter, CloudSync, ConfigOverrides, SyncHandle, TransferEvent,
    logging::init_logging, resolve_config,
};
use qfieldsync_core::{CheckoutRejection, CloudProject, ProjectPayload, SyncChoice};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "qfieldsync", version, about = "Sync QGIS projects with QFieldCloud")]
struct Cli {
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Append logs to this file instead of stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        /// Defaults to the last used username.
        #[arg(long)]
        username: Option<String>,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        remember_me: bool,
    },
    Logout,
    Whoami,
    #[command(subcommand)]
    Projects(ProjectsCommand),
    /// List the files of a project with their versions.
    Files { project_id: String },
    /// Associate a project with a local directory and transfer it.
    Checkout {
        project_id: String,
        /// First directory to try; further prompts read stdin.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Sync a checked out project.
    Sync {
        project_id: String,
        /// Local copies win.
        #[arg(long, conflicts_with = "replace_local", required_unless_present = "replace_local")]
        replace_remote: bool,
        /// Remote copies win.
        #[arg(long)]
        replace_local: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectsCommand {
    List,
    Create {
        name: String,
        /// Defaults to the logged in user.
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        private: bool,
        #[arg(long)]
        local_dir: Option<PathBuf>,
    },
    Update {
        project_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        private: Option<bool>,
    },
    Delete {
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// `Ok(false)` when a transfer finished with failures.
async fn run(cli: Cli) -> Result<bool, AppError> {
    let config = resolve_config(&ConfigOverrides {
        server_url: cli.server_url,
        timeout_secs: cli.timeout_secs,
        config_dir: cli.config_dir,
    })?;
    let app = CloudSync::new(config)?;

    let command = match cli.command {
        Command::Login {
            username,
            password,
            remember_me,
        } => {
            let username = match username.or_else(|| app.preferences().last_username()) {
                Some(username) => username,
                None => read_line("Username: ")?.unwrap_or_default(),
            };
            let password = match password {
                Some(password) => password,
                None => read_line("Password: ")?.unwrap_or_default(),
            };
            let username = app.session().login(&username, &password, remember_me).await?;
            println!("Logged in as {username}");
            return Ok(true);
        }
        command => command,
    };

    let user = app.ensure_authenticated().await?;
    match command {
        Command::Login { .. } => Ok(true),
        Command::Logout => {
            app.logout().await?;
            println!("Logged out");
            Ok(true)
        }
        Command::Whoami => {
            match user.email {
                Some(email) => println!("{} <{email}>", user.username),
                None => println!("{}", user.username),
            }
            Ok(true)
        }
        Command::Projects(command) => run_projects(&app, &user.username, command).await,
        Command::Files { project_id } => {
            let files = app.catalog().list_files(&project_id).await?;
            if files.is_empty() {
                println!("No files yet");
            }
            for file in files {
                println!("{}\t{} bytes", file.name, file.size);
                for version in &file.versions {
                    println!(
                        "  {}\t{} bytes\t{}",
                        version.created_at.to_rfc3339(),
                        version.size,
                        version.sha256.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(true)
        }
        Command::Checkout { project_id, dir } => {
            let project = app.project(&project_id).await?;
            let mut prompter = TerminalPrompter { preset_dir: dir };
            match app.checkout(&project, &mut prompter).await? {
                Some(handle) => drive(handle).await,
                None => {
                    println!("Checkout cancelled");
                    Ok(true)
                }
            }
        }
        Command::Sync {
            project_id,
            replace_remote,
            ..
        } => {
            let handle = app.resync(&project_id, replace_remote).await?;
            drive(handle).await
        }
    }
}

async fn run_projects(
    app: &CloudSync,
    username: &str,
    command: ProjectsCommand,
) -> Result<bool, AppError> {
    match command {
        ProjectsCommand::List => {
            let projects = app.catalog().list().await?;
            if projects.is_empty() {
                println!("No projects");
            }
            for project in projects {
                print_project(&project);
            }
        }
        ProjectsCommand::Create {
            name,
            owner,
            description,
            private,
            local_dir,
        } => {
            let payload = ProjectPayload {
                name,
                owner: owner.unwrap_or_else(|| username.to_owned()),
                description,
                is_private: private,
            };
            let project = app.catalog().create(&payload, local_dir.as_deref()).await?;
            print_project(&project);
        }
        ProjectsCommand::Update {
            project_id,
            name,
            owner,
            description,
            private,
        } => {
            let current = app.project(&project_id).await?;
            let mut payload = ProjectPayload::from(&current);
            if let Some(name) = name {
                payload.name = name;
            }
            if let Some(owner) = owner {
                payload.owner = owner;
            }
            if let Some(description) = description {
                payload.description = description;
            }
            if let Some(private) = private {
                payload.is_private = private;
            }
            let project = app.catalog().update(&project_id, &payload).await?;
            print_project(&project);
        }
        ProjectsCommand::Delete { project_id } => {
            app.catalog().delete(&project_id).await?;
            let remaining = app.catalog().list().await?;
            println!("Deleted {project_id}; {} projects left", remaining.len());
        }
    }
    Ok(true)
}

fn print_project(project: &CloudProject) {
    let visibility = if project.is_private { "private" } else { "public" };
    let local = project
        .local_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "-".to_owned());
    println!(
        "{}\t{}\t{}\t{visibility}\t{local}",
        project.id, project.owner, project.name
    );
}

async fn drive(mut handle: SyncHandle) -> Result<bool, AppError> {
    let report = handle
        .run(|event| match event {
            TransferEvent::Progress {
                phase,
                file,
                index,
                total,
            } => eprintln!("[{phase} {}/{total}] {file}", index + 1),
            TransferEvent::Finished {
                phase,
                result: Ok(summary),
            } => eprintln!(
                "{phase} finished: {} files, {} bytes, {} skipped",
                summary.files, summary.bytes, summary.skipped
            ),
            TransferEvent::Finished {
                phase,
                result: Err(err),
            } => eprintln!("{phase} failed: {err}"),
        })
        .await?;
    Ok(report.is_success())
}

struct TerminalPrompter {
    preset_dir: Option<PathBuf>,
}

impl CheckoutPrompter for TerminalPrompter {
    fn choose_directory(&mut self, title: &str) -> Option<PathBuf> {
        if let Some(dir) = self.preset_dir.take() {
            return Some(dir);
        }
        read_line(&format!("{title} (empty to cancel): "))
            .ok()
            .flatten()
            .map(PathBuf::from)
    }

    fn warn(&mut self, rejection: &CheckoutRejection) {
        eprintln!("{}: {rejection}", rejection.title());
    }

    fn confirm_sync(&mut self, project: &CloudProject) -> SyncChoice {
        let prompt = format!(
            "Sync {}: [r]eplace remote with local, replace [l]ocal with remote, [c]ancel? ",
            project.name
        );
        match read_line(&prompt).ok().flatten().as_deref().map(str::trim) {
            Some("r" | "R") => SyncChoice::ReplaceRemote,
            Some("l" | "L") => SyncChoice::ReplaceLocal,
            _ => SyncChoice::Cancel,
        }
    }
}

/// `None` on end of input.
fn read_line(prompt: &str) -> io::Result<Option<String>> {
    eprint!("{prompt}");
    io::stderr().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}
