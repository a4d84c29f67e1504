//! Plancanvas CLI - load, edit and watch project canvases from the terminal
//!
//! Usage: plancanvas-cli [OPTIONS] <COMMAND>
//!
//! Talks to the plan service over HTTP. Supports JSON output for scripting.

use clap::{Parser, Subcommand, ValueEnum};
use plancanvas_lib::db::{Graph, Position, SnapshotType, Task, TaskPatch};
use plancanvas_lib::store::TaskRepository;
use plancanvas_lib::{cloner, mutation, realtime, settings, snapshot, status, Canvas, RemoteClient, Settings};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "plancanvas-cli")]
#[command(version, about = "Plancanvas project canvas CLI", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Service URL (default: settings, then PLANCANVAS_API_URL)
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a project's latest snapshot with its tasks and print the canvas
    Load {
        project: String,
    },
    /// Store the reconciled canvas as a new snapshot
    Save {
        project: String,
        #[arg(long = "type", value_enum, default_value = "manual")]
        snapshot_type: SnapshotKind,
    },
    /// Move a canvas node and save the layout
    Move {
        project: String,
        node: String,
        x: f64,
        y: f64,
    },
    /// Update task fields. Status uses the display vocabulary
    Update {
        project: String,
        task: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Not started | On-going | Stuck | Complete
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        estimate: Option<f64>,
        #[arg(long)]
        time_spent: Option<f64>,
    },
    /// Print task changes as they happen and autosave the canvas (Ctrl-C to stop)
    Watch {
        project: String,
    },
    /// Copy a project with all its tasks and canvas under new ids
    Duplicate {
        project: String,
        /// Name for the copy (default: "<name> (copy)")
        #[arg(long)]
        name: Option<String>,
        /// Build the copy locally and print it without storing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print effective settings
    Show,
    /// Store the service URL
    SetUrl { url: String },
    /// Store the API token (empty string clears it)
    SetToken { token: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SnapshotKind {
    Manual,
    Autosave,
    AiGenerated,
}

impl From<SnapshotKind> for SnapshotType {
    fn from(kind: SnapshotKind) -> Self {
        match kind {
            SnapshotKind::Manual => SnapshotType::Manual,
            SnapshotKind::Autosave => SnapshotType::Autosave,
            SnapshotKind::AiGenerated => SnapshotType::AiGenerated,
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}

fn print_graph(graph: &Graph) {
    println!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
    for node in &graph.nodes {
        let Position { x, y } = node.position;
        match node.task_card() {
            Some(card) => println!(
                "  [{:>7.1}, {:>7.1}] {} {:<12} {}{}",
                x,
                y,
                node.id,
                card.status.as_deref().unwrap_or("-"),
                card.title.as_deref().unwrap_or("(untitled)"),
                if card.stale { "  (stale)" } else { "" },
            ),
            None => println!("  [{:>7.1}, {:>7.1}] {} <{}>", x, y, node.id, node.node_type),
        }
    }
    for edge in &graph.edges {
        println!("  {} -> {}{}", edge.source, edge.target,
            edge.label.as_deref().map(|l| format!("  \"{}\"", l)).unwrap_or_default());
    }
}

fn print_task(task: &Task) {
    let state = if task.is_deleted() { "deleted".to_string() } else { status::to_display(&task.status) };
    println!("{}  {:<12} {}", task.id, state, task.title);
}

// ============================================================================
// Commands
// ============================================================================

fn open_canvas(client: &Arc<RemoteClient>, config: &Settings) -> Canvas {
    Canvas::new(client.clone(), client.clone(), client.clone(), config.reconcile_options())
}

async fn cmd_load(client: Arc<RemoteClient>, config: &Settings, project: &str, json: bool) -> Result<(), String> {
    let canvas = open_canvas(&client, config);
    canvas.open(project).await;
    canvas.unsubscribe();
    let graph = canvas.graph();
    if json {
        return print_json(&graph);
    }
    print_graph(&graph);
    Ok(())
}

async fn cmd_save(
    client: Arc<RemoteClient>,
    config: &Settings,
    project: &str,
    snapshot_type: SnapshotType,
) -> Result<(), String> {
    let canvas = open_canvas(&client, config);
    canvas.open(project).await;
    canvas.unsubscribe();
    if canvas.graph().is_empty() {
        return Err(format!("Nothing to save for project {}", project));
    }
    if !canvas.save(snapshot_type).await {
        return Err("Snapshot save failed".to_string());
    }
    println!("Saved {} snapshot", snapshot_type.as_str());
    Ok(())
}

async fn cmd_move(
    client: Arc<RemoteClient>,
    config: &Settings,
    project: &str,
    node: &str,
    position: Position,
) -> Result<(), String> {
    let canvas = open_canvas(&client, config);
    canvas.open(project).await;
    canvas.unsubscribe();
    if !canvas.move_node(node, position) {
        return Err(format!("Node {} not on the canvas", node));
    }
    if !canvas.save_if_dirty(SnapshotType::Manual).await {
        return Err("Snapshot save failed".to_string());
    }
    println!("Moved {} to ({}, {})", node, position.x, position.y);
    Ok(())
}

async fn cmd_update(client: Arc<RemoteClient>, project: &str, task: &str, patch: TaskPatch, json: bool) -> Result<(), String> {
    if patch.is_empty() {
        return Err("Nothing to update. Pass at least one of --title, --description, --status, --estimate, --time-spent".to_string());
    }
    if let Some(s) = &patch.status {
        if status::DisplayStatus::from_str(s).is_none() {
            return Err(format!(
                "Unknown status '{}'. Use one of: {}",
                s,
                status::DisplayStatus::ALL.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    if !mutation::update_task(client.as_ref(), project, task, &patch).await {
        return Err(format!("Update of task {} failed", task));
    }
    let tasks = client.fetch_tasks(project).await.map_err(|e| e.to_string())?;
    match tasks.iter().find(|t| t.id == task) {
        Some(updated) if json => print_json(updated),
        Some(updated) => {
            print_task(updated);
            Ok(())
        }
        None => Ok(()),
    }
}

async fn cmd_watch(client: Arc<RemoteClient>, config: &Settings, project: &str, json: bool) -> Result<(), String> {
    // The canvas follows the feed too, so cards for new tasks get autosaved
    let canvas = Arc::new(open_canvas(&client, config));
    canvas.open(project).await;
    let autosave = snapshot::spawn_autosave(canvas.clone(), config.autosave_interval());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = realtime::subscribe(client, project, move |task| {
        let _ = tx.send(task);
    });
    eprintln!("Watching project {} (Ctrl-C to stop)", project);

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(task) if json => print_json(&task)?,
                Some(task) => print_task(&task),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    subscription.unsubscribe();
    autosave.abort();
    canvas.save_if_dirty(SnapshotType::Autosave).await;
    canvas.unsubscribe();
    Ok(())
}

async fn cmd_duplicate(
    client: Arc<RemoteClient>,
    project: &str,
    name: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<(), String> {
    let copy = if dry_run {
        cloner::duplicate_project(client.as_ref(), project, name).await
    } else {
        client.duplicate_project(project, name).await
    }
    .map_err(|e| e.to_string())?;

    if json {
        return print_json(&copy);
    }
    println!(
        "{} \"{}\": {} tasks, {} subtasks, {} comments, {} nodes, {} edges{}",
        copy.project.id,
        copy.project.name,
        copy.tasks.len(),
        copy.subtasks.len(),
        copy.comments.len(),
        copy.nodes.len(),
        copy.edges.len(),
        if dry_run { " (not stored)" } else { "" },
    );
    Ok(())
}

fn cmd_config(cmd: ConfigCommands, json: bool) -> Result<(), String> {
    match cmd {
        ConfigCommands::Show => {
            let mut current = settings::current();
            current.api_token = settings::get_masked_api_token();
            if json {
                return print_json(&current);
            }
            println!("api_base_url:           {}", current.api_base_url);
            println!("api_token:              {}", current.api_token.as_deref().unwrap_or("(none)"));
            println!("request_timeout_secs:   {}", current.request_timeout_secs);
            println!("autosave_interval_secs: {}", current.autosave_interval_secs);
            println!("stale_nodes:            {:?}", current.stale_nodes);
            Ok(())
        }
        ConfigCommands::SetUrl { url } => {
            url::Url::parse(&url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;
            settings::set_api_base_url(url)
        }
        ConfigCommands::SetToken { token } => settings::set_api_token(token),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    plancanvas_lib::init_logging(if cli.verbose { "debug" } else { "warn" });

    if let Err(e) = run_cli(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> Result<(), String> {
    settings::init(settings::default_config_dir());

    let command = match cli.command {
        Commands::Config { cmd } => return cmd_config(cmd, cli.json),
        other => other,
    };

    let mut config = settings::current();
    if let Some(remote) = cli.remote {
        config.api_base_url = remote;
    }
    debug!(url = %config.api_base_url, "using service");
    let client = Arc::new(RemoteClient::from_settings(&config).map_err(|e| e.to_string())?);

    match command {
        Commands::Load { project } => cmd_load(client, &config, &project, cli.json).await,
        Commands::Save { project, snapshot_type } => {
            cmd_save(client, &config, &project, snapshot_type.into()).await
        }
        Commands::Move { project, node, x, y } => {
            cmd_move(client, &config, &project, &node, Position { x, y }).await
        }
        Commands::Update { project, task, title, description, status, estimate, time_spent } => {
            let patch = TaskPatch {
                title,
                description,
                status,
                estimated_hours: estimate,
                time_spent,
                sort_order: None,
            };
            cmd_update(client, &project, &task, patch, cli.json).await
        }
        Commands::Watch { project } => cmd_watch(client, &config, &project, cli.json).await,
        Commands::Duplicate { project, name, dry_run } => {
            cmd_duplicate(client, &project, name.as_deref(), dry_run, cli.json).await
        }
        Commands::Config { .. } => Ok(()),
    }
}
