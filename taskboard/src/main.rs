//! `taskboard` -- print a shared task board, optionally following live changes.
//!
//! ```bash
//! # In-process demo board
//! cargo run --bin taskboard -- --offline --view lanes
//!
//! # Follow a board on a hub
//! cargo run --bin taskboard -- --hub-url ws://127.0.0.1:9100/ws \
//!     --project ops --actor ana --watch
//!
//! # JSON table of my urgent tasks
//! cargo run --bin taskboard -- --offline --view table --sort due --mine \
//!     --priority urgent --json
//! ```

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskboard::board::Board;
use taskboard::config::{CliArgs, ClientConfig, ViewKind};
use taskboard::coordinator::BoardNotice;
use taskboard::filter::FilterState;
use taskboard::remote::hub::HubClient;
use taskboard::remote::loopback::LoopbackBackend;
use taskboard::remote::{FeedSource, MembershipSource, TaskBackend};
use taskboard::views::{Lane, TableSort};
use taskboard::timeline::TimelineLane;
use taskboard_proto::change::{TaskChange, TaskDraft};
use taskboard_proto::task::{Actor, Priority, ProjectId, Task, TaskStatus};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(project_id = %config.project_id, actor_id = %config.actor.id, "taskboard starting");

    let result = match config.hub_url.clone() {
        Some(url) => run_online(&cli, &config, url.as_str()).await,
        None => run_offline(&cli, &config).await,
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "taskboard failed");
        eprintln!("taskboard: {e}");
        std::process::exit(1);
    }
    tracing::info!("taskboard exiting");
}

/// Initialize file-based logging so stdout stays clean for the board.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to flush
/// buffered log entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskboard.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run_online(cli: &CliArgs, config: &ClientConfig, url: &str) -> Result<(), String> {
    let client = HubClient::connect(url, config.actor.clone(), config.hub_options())
        .await
        .map_err(|e| format!("cannot reach hub at {url}: {e}"))?;
    let (board, notices) = Board::open(
        Arc::new(client),
        config.project_id.clone(),
        config.actor.clone(),
        config.board_options(),
    )
    .await
    .map_err(|e| format!("cannot open board {}: {e}", config.project_id))?;
    present(cli, board, notices).await
}

async fn run_offline(cli: &CliArgs, config: &ClientConfig) -> Result<(), String> {
    let backend = Arc::new(LoopbackBackend::new(config.actor.clone()));
    seed_demo(&backend, &config.project_id, &config.actor)
        .await
        .map_err(|e| format!("cannot seed demo board: {e}"))?;
    let (board, notices) = Board::open(
        Arc::clone(&backend),
        config.project_id.clone(),
        config.actor.clone(),
        config.board_options(),
    )
    .await
    .map_err(|e| format!("cannot open demo board: {e}"))?;

    let teammate = cli.watch.then(|| {
        tokio::spawn(simulate_teammate(
            Arc::clone(&backend),
            config.project_id.clone(),
        ))
    });
    let result = present(cli, board, notices).await;
    if let Some(teammate) = teammate {
        teammate.abort();
    }
    result
}

/// Fills an empty loopback backend with a small board.
async fn seed_demo(
    backend: &LoopbackBackend,
    project_id: &ProjectId,
    actor: &Actor,
) -> Result<(), taskboard::remote::RemoteError> {
    backend.add_member(project_id, &actor.id);
    let today = Utc::now().date_naive();
    let in_days = |n: u64| today.checked_add_days(Days::new(n)).unwrap_or(today);
    let teammate = Actor::new("sam", "Sam Okafor");
    let drafts = [
        TaskDraft::new("Draft release notes")
            .with_priority(Priority::Low)
            .with_assignee(teammate.clone()),
        TaskDraft::new("Fix login redirect loop")
            .with_status(TaskStatus::InProgress)
            .with_priority(Priority::Urgent)
            .with_assignee(actor.clone())
            .with_schedule(today, in_days(2)),
        TaskDraft::new("Review attendance export")
            .with_status(TaskStatus::Review)
            .with_priority(Priority::High)
            .with_description("CSV columns changed last sprint")
            .with_assignee(teammate),
        TaskDraft::new("Migrate survey charts")
            .with_status(TaskStatus::Done)
            .with_schedule(today, in_days(5)),
    ];
    for draft in &drafts {
        backend.create_task(project_id, draft).await?;
    }
    Ok(())
}

/// Moves one task forward every few seconds, as another client would.
async fn simulate_teammate(backend: Arc<LoopbackBackend>, project_id: ProjectId) {
    let mut ticker = tokio::time::interval(Duration::from_secs(3));
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(task) = next_to_advance(&backend, &project_id).await else {
            return;
        };
        let next = TaskStatus::LANES
            .get(task.status.lane_index() + 1)
            .copied()
            .unwrap_or(TaskStatus::Todo);
        backend.external_update(&task.id, &TaskChange::status(next));
    }
}

async fn next_to_advance(backend: &LoopbackBackend, project_id: &ProjectId) -> Option<Task> {
    let me = backend.actor().id.clone();
    backend
        .fetch_tasks(project_id)
        .await
        .ok()?
        .into_iter()
        .filter(|t| !t.is_assigned_to(&me))
        .min_by_key(|t| t.updated_at)
}

/// Prints the board once, or on every change with `--watch`.
async fn present<B>(
    cli: &CliArgs,
    board: Board<B>,
    mut notices: mpsc::Receiver<BoardNotice>,
) -> Result<(), String>
where
    B: TaskBackend + MembershipSource + FeedSource + 'static,
{
    let filter = cli.filter();
    render(cli, &board, &filter).map_err(|e| e.to_string())?;
    if !cli.watch {
        board.close();
        return Ok(());
    }

    let mut changes = board.changes();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                render(cli, &board, &filter).map_err(|e| e.to_string())?;
            }
            Some(notice) = notices.recv() => {
                match notice {
                    BoardNotice::MutationFailed { task_id, reason } => {
                        eprintln!("change to {task_id} was undone: {reason}");
                    }
                    BoardNotice::Busy { task_id } => {
                        eprintln!("{task_id} is busy, try again");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    board.close();
    Ok(())
}

fn render<B>(cli: &CliArgs, board: &Board<B>, filter: &FilterState) -> io::Result<()> {
    let mut out = io::stdout().lock();
    match cli.view {
        ViewKind::Lanes => {
            let lanes = board.lanes(filter);
            if cli.json {
                print_json(&mut out, &lanes)
            } else {
                print_lanes(&mut out, &lanes)
            }
        }
        ViewKind::Table => {
            let rows = board.table(filter, cli.sort.unwrap_or_default());
            if cli.json {
                print_json(&mut out, &rows)
            } else {
                print_table(&mut out, &rows, cli.sort.unwrap_or_default())
            }
        }
        ViewKind::Timeline => {
            let lanes = board.timeline(filter);
            if cli.json {
                print_json(&mut out, &lanes)
            } else {
                print_timeline(&mut out, &lanes)
            }
        }
    }
}

fn print_json(out: &mut impl Write, value: &impl serde::Serialize) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).map_err(io::Error::other)?;
    writeln!(out)
}

fn assignee_names(task: &Task) -> String {
    task.assignees
        .iter()
        .map(|a| a.display_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_lanes(out: &mut impl Write, lanes: &[Lane]) -> io::Result<()> {
    for lane in lanes {
        writeln!(out, "== {} ({}) ==", lane.status, lane.tasks.len())?;
        for task in &lane.tasks {
            write!(out, "  [{}] {}", task.priority, task.name)?;
            if task.comment_count > 0 {
                write!(out, "  ({} comments)", task.comment_count)?;
            }
            if !task.assignees.is_empty() {
                write!(out, "  @ {}", assignee_names(task))?;
            }
            writeln!(out)?;
        }
    }
    writeln!(out)
}

fn print_table(out: &mut impl Write, rows: &[Task], sort: TableSort) -> io::Result<()> {
    writeln!(out, "{:<32} {:<12} {:<8} {:<10} ASSIGNEES  (sorted by {sort:?})", "NAME", "STATUS", "PRIORITY", "DUE")?;
    for task in rows {
        let due = task.due_date.map_or_else(|| "-".to_string(), |d| d.to_string());
        writeln!(
            out,
            "{:<32} {:<12} {:<8} {:<10} {}",
            task.name,
            task.status,
            task.priority,
            due,
            assignee_names(task)
        )?;
    }
    writeln!(out)
}

fn print_timeline(out: &mut impl Write, lanes: &[TimelineLane]) -> io::Result<()> {
    for lane in lanes {
        writeln!(out, "== {} ==", lane.status)?;
        for bar in &lane.bars {
            writeln!(out, "  {} .. {}  {} ({}d)", bar.start, bar.end, bar.name, bar.days())?;
        }
    }
    writeln!(out)
}
