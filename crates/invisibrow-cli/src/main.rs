//! invisibrow daemon and admin CLI.
//!
//! `run` starts the orchestration core and streams bus events to the log
//! until interrupted; the remaining subcommands administer sessions, tasks,
//! and the bot-keyword list directly against the stores.

mod service;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use invisibrow_types::CoreEvent;

use crate::service::Service;

#[derive(Parser)]
#[command(name = "invisibrow", about = "Agentic browser automation core", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestration core until interrupted.
    Run,
    /// Submit a task goal to a session.
    Submit {
        /// Session id.
        session_id: String,
        /// Natural-language goal.
        goal: String,
    },
    /// Stop a running or queued task.
    Stop {
        /// Task id.
        task_id: String,
    },
    /// Manage sessions.
    Sessions {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// List tasks, newest first.
    Tasks,
    /// Manage the bot-keyword list.
    Keywords {
        #[command(subcommand)]
        command: KeywordCommand,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// List sessions.
    List,
    /// Create a session.
    Create {
        name: String,
        /// Start the session's browser with a visible window.
        #[arg(long)]
        headed: bool,
    },
    /// Rename a session.
    Rename { session_id: String, name: String },
    /// Delete a session and its browser profile.
    Delete { session_id: String },
    /// Flip a session's headless mode.
    ToggleHeadless { session_id: String },
}

#[derive(Subcommand)]
enum KeywordCommand {
    /// List all bot keywords.
    List,
    /// Add a keyword.
    Add { keyword: String },
    /// Delete a keyword.
    Delete { keyword: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let service = Service::build()?;

    match cli.command {
        Command::Run => {
            info!(
                planner = %service.config.models.planner_agent,
                executor = %service.config.models.executor_agent,
                watchdog = %service.config.models.watchdog_agent,
                "invisibrow core running; press Ctrl-C to stop"
            );
            let mut events = service.bus.subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down");
                        break;
                    }
                    event = events.recv() => {
                        if let Ok(CoreEvent::Log { message, level, .. }) = event {
                            info!(level = %level, "{message}");
                        }
                    }
                }
            }
        }
        Command::Submit { session_id, goal } => {
            let task_id = service.scheduler.submit(&session_id, &goal)?;
            println!("{task_id}");
            // One-shot process: wait for the task so the worker is not
            // killed by process exit.
            loop {
                if let Some(task) = service.tasks.get(&task_id)? {
                    if task.status.is_terminal() {
                        println!(
                            "{}: {}",
                            task.status,
                            task.result.or(task.error).unwrap_or_default()
                        );
                        break;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }
        Command::Stop { task_id } => {
            let stopped = service.scheduler.stop(&task_id)?;
            println!("{}", if stopped { "cancelling" } else { "not running" });
        }
        Command::Sessions { command } => run_session_command(&service, command)?,
        Command::Tasks => {
            for task in service.scheduler.tasks()? {
                println!(
                    "{}  {:<9}  [{}]  {}",
                    task.created_at.format("%Y-%m-%d %H:%M:%S"),
                    task.status.to_string(),
                    task.id,
                    task.goal
                );
            }
        }
        Command::Keywords { command } => run_keyword_command(&service, command)?,
    }
    Ok(())
}

fn run_session_command(service: &Service, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::List => {
            for session in service.sessions.list()? {
                println!(
                    "[{}]  {:<20}  headless={}  tokens={}  cost=${:.4}",
                    session.id, session.name, session.headless, session.stats.tokens,
                    session.stats.cost
                );
            }
        }
        SessionCommand::Create { name, headed } => {
            let session = service.sessions.create(&name, !headed)?;
            println!("{}", session.id);
        }
        SessionCommand::Rename { session_id, name } => {
            if !service.sessions.rename(&session_id, &name)? {
                anyhow::bail!("unknown session '{session_id}'");
            }
        }
        SessionCommand::Delete { session_id } => {
            if !service.delete_session(&session_id)? {
                anyhow::bail!("unknown session '{session_id}'");
            }
        }
        SessionCommand::ToggleHeadless { session_id } => {
            match service.sessions.toggle_headless(&session_id)? {
                Some(headless) => println!("headless={headless}"),
                None => anyhow::bail!("unknown session '{session_id}'"),
            }
        }
    }
    Ok(())
}

fn run_keyword_command(service: &Service, command: KeywordCommand) -> Result<()> {
    match command {
        KeywordCommand::List => {
            for keyword in service.memory.all_bot_keywords()? {
                println!(
                    "{}  {}",
                    keyword.created_at.format("%Y-%m-%d %H:%M:%S"),
                    keyword.keyword
                );
            }
        }
        KeywordCommand::Add { keyword } => {
            if service.memory.add_bot_keyword(&keyword)? {
                println!("added");
            } else {
                println!("already present");
            }
        }
        KeywordCommand::Delete { keyword } => {
            if service.memory.delete_bot_keyword(&keyword)? {
                println!("deleted");
            } else {
                println!("not found");
            }
        }
    }
    Ok(())
}
