//! `shellq`: command-line client for the shell job queue.
//!
//! Queues jobs into a jobs directory, lists jobs by state, and asks a running
//! `shellqd` to cancel its current job.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shellq::client::{DEFAULT_API_URL, request_cancel};
use shellq::core::state::JobState;
use shellq::core::types::{Lane, sanitize_job_name};
use shellq::exit_codes;
use shellq::io::config::{JOBS_DIR_ENV, resolve_jobs_dir};
use shellq::io::init::{InitOptions, init_jobs_dir};
use shellq::io::loader::peek_queue;
use shellq::io::producer::push_job;
use shellq::io::store::QueueStore;

#[derive(Parser)]
#[command(name = "shellq", version, about = "Directory-backed shell job queue")]
struct Cli {
    /// Jobs directory (defaults to `~/.shellq/jobs`).
    #[arg(long, global = true, env = JOBS_DIR_ENV)]
    jobs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the state directories and a default `shellq.toml`.
    Init {
        /// Overwrite an existing config with defaults.
        #[arg(short, long)]
        force: bool,
    },
    /// Ask the engine to cancel the job it is running.
    Cancel {
        #[arg(long, env = "SHELLQ_API_URL", default_value = DEFAULT_API_URL)]
        api_url: String,
    },
    /// Append a job to `queued/<lane>/todo.xml`.
    Push {
        /// Lane under `queued/`, e.g. `0001_train`. Use `.` for the root.
        #[arg(long)]
        lane: String,
        /// Job name; defaults to a timestamp.
        #[arg(long)]
        name: Option<String>,
        /// Shell command text to run.
        command: String,
    },
    /// Print jobs as `<state>\t<lane>/<name>`.
    List {
        /// Only this state (queued, running, success, failed, canceled).
        #[arg(long)]
        state: Option<JobState>,
    },
}

fn main() {
    shellq::logging::init("warn");
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(resolve_jobs_dir(cli.jobs_dir)?, force),
        Command::Cancel { api_url } => Ok(cmd_cancel(&api_url)),
        Command::Push {
            lane,
            name,
            command,
        } => cmd_push(resolve_jobs_dir(cli.jobs_dir)?, &lane, name, &command),
        Command::List { state } => cmd_list(resolve_jobs_dir(cli.jobs_dir)?, state),
    }
}

fn cmd_init(jobs_dir: PathBuf, force: bool) -> Result<i32> {
    let report = init_jobs_dir(&jobs_dir, &InitOptions { force })?;
    println!("{}", report.store.root().display());
    Ok(exit_codes::OK)
}

fn cmd_cancel(api_url: &str) -> i32 {
    match request_cancel(api_url) {
        Ok(reply) => {
            println!("{}", reply.to_json());
            exit_codes::OK
        }
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:#}", anyhow::Error::from(err));
            code
        }
    }
}

fn cmd_push(jobs_dir: PathBuf, lane: &str, name: Option<String>, command: &str) -> Result<i32> {
    let lane = Lane::new(lane).with_context(|| format!("invalid lane `{lane}`"))?;
    let name = match name {
        Some(raw) => {
            sanitize_job_name(&raw).with_context(|| format!("invalid job name `{raw}`"))?
        }
        None => chrono::Local::now().format("%Y%m%d%H%M%S").to_string(),
    };
    let store = QueueStore::new(jobs_dir);
    let path = push_job(&store, &lane, &name, command)?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_list(jobs_dir: PathBuf, only: Option<JobState>) -> Result<i32> {
    let store = QueueStore::new(jobs_dir);
    let states: Vec<JobState> = match only {
        Some(state) => vec![state],
        None => JobState::ALL.to_vec(),
    };
    for state in states {
        if state == JobState::Queued {
            for entry in peek_queue(&store)? {
                let name = entry.name.as_deref().unwrap_or("<unnamed>");
                if entry.lane.is_root() {
                    println!("{state}\t{name}");
                } else {
                    println!("{state}\t{}/{name}", entry.lane);
                }
            }
        } else {
            for job in store.list(state)? {
                println!("{state}\t{job}");
            }
        }
    }
    Ok(exit_codes::OK)
}
