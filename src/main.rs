use chrono::{DateTime, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use eyre::{Context, Result, eyre};
use std::path::PathBuf;
use taskability::{Config, GroupOrder, GroupSummary, TaskFields, TaskItem, TaskStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskability")]
#[command(about = "Taskability - tasks and task groups backed by SQLite+JSONL")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the store directory (default: from config, else current directory)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    /// Config file (default: <config_dir>/taskability/taskability.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        title: String,
        /// Group to put the task in (default: staged)
        #[arg(short, long)]
        group: Option<String>,
    },

    /// List tasks, oldest first
    List {
        /// Only tasks in this group
        #[arg(short, long, conflicts_with = "staged")]
        group: Option<String>,
        /// Only tasks without a group
        #[arg(long)]
        staged: bool,
    },

    /// Show one task in full
    Show { id: String },

    /// Mark a task complete
    Done { id: String },

    /// Mark a task not complete
    Undo { id: String },

    /// Flip a task's completion
    Toggle { id: String },

    /// Edit task fields
    Edit(EditArgs),

    /// Delete a task
    Rm { id: String },

    /// Manage task groups
    #[command(subcommand)]
    Group(GroupCommands),

    /// Rebuild the SQLite cache from the JSONL files
    Sync,
}

#[derive(Args)]
struct EditArgs {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long, conflicts_with = "clear_subtitle")]
    subtitle: Option<String>,
    #[arg(long)]
    clear_subtitle: bool,
    #[arg(long, conflicts_with = "clear_location")]
    location: Option<String>,
    #[arg(long)]
    clear_location: bool,
    /// YYYY-MM-DD or RFC 3339
    #[arg(long, conflicts_with = "clear_start")]
    start: Option<String>,
    #[arg(long)]
    clear_start: bool,
    /// YYYY-MM-DD or RFC 3339
    #[arg(long, conflicts_with = "clear_end")]
    end: Option<String>,
    #[arg(long)]
    clear_end: bool,
    /// Move the task into a group
    #[arg(long, conflicts_with = "unstage")]
    group: Option<String>,
    /// Take the task out of its group
    #[arg(long)]
    unstage: bool,
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a group
    Add { title: Option<String> },
    /// List groups with task counts
    List {
        #[arg(long, value_enum)]
        order: Option<OrderArg>,
    },
    /// Set or clear a group's title
    Rename { id: String, title: Option<String> },
    /// Move a group to a position in the manual order
    Mv { id: String, index: usize },
    /// Delete a group and all of its tasks
    Rm { id: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Manual,
    Title,
}

impl From<OrderArg> for GroupOrder {
    fn from(arg: OrderArg) -> Self {
        match arg {
            OrderArg::Manual => GroupOrder::Manual,
            OrderArg::Title => GroupOrder::Title,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Setup tracing
    let level = match cli.verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let store_path = cli.store_path.clone().unwrap_or_else(|| config.store_path.clone());
    let store = TaskStore::open(&store_path).context("Failed to open task store")?;

    match cli.command {
        Commands::Add { title, group } => {
            let task = store.create_task(&title, group.as_deref())?;
            println!("Added {}", task.id.cyan());
        }
        Commands::List { group, staged } => {
            let tasks = match (group, staged) {
                (Some(group), _) => store.query_by_group(&group)?,
                (None, true) => store.query_staged()?,
                (None, false) => store.query_all_sorted_by_creation()?,
            };
            if tasks.is_empty() {
                println!("{}", "No tasks".dimmed());
            }
            for task in &tasks {
                println!("{}", task_line(task));
            }
        }
        Commands::Show { id } => {
            let task = store.get_task(&id)?;
            print_task(&task);
        }
        Commands::Done { id } => {
            store.set_complete(&id, true)?;
            println!("Completed {}", id.cyan());
        }
        Commands::Undo { id } => {
            store.set_complete(&id, false)?;
            println!("Reopened {}", id.cyan());
        }
        Commands::Toggle { id } => {
            let done = store.toggle_complete(&id)?;
            println!("{} {}", if done { "Completed" } else { "Reopened" }, id.cyan());
        }
        Commands::Edit(args) => {
            let id = args.id.clone();
            let fields = edit_fields(args)?;
            if fields.is_empty() {
                return Err(eyre!("Nothing to change"));
            }
            let task = store.update_fields(&id, fields)?;
            print_task(&task);
        }
        Commands::Rm { id } => {
            store.delete_task(&id)?;
            println!("Deleted {}", id.cyan());
        }
        Commands::Group(command) => run_group(&store, &config, command)?,
        Commands::Sync => {
            println!("Syncing database from JSONL files...");
            store.sync()?;
            println!("Sync complete");
        }
    }

    Ok(())
}

fn run_group(store: &TaskStore, config: &Config, command: GroupCommands) -> Result<()> {
    match command {
        GroupCommands::Add { title } => {
            let group = store.create_group(title.as_deref())?;
            println!("Added group {}", group.id.cyan());
        }
        GroupCommands::List { order } => {
            let order = order.map(GroupOrder::from).unwrap_or(config.group_order);
            let summaries = store.group_summaries(order)?;
            if summaries.is_empty() {
                println!("{}", "No groups".dimmed());
            }
            for summary in &summaries {
                println!("{}", group_line(summary));
            }
        }
        GroupCommands::Rename { id, title } => {
            let group = store.rename_group(&id, title.as_deref())?;
            println!("Renamed {} to {}", group.id.cyan(), group.title.as_deref().unwrap_or("(untitled)"));
        }
        GroupCommands::Mv { id, index } => {
            store.move_group(&id, index)?;
            println!("Moved {}", id.cyan());
        }
        GroupCommands::Rm { id } => {
            let removed = store.delete_group(&id)?;
            println!("Deleted group {} and {} task(s)", id.cyan(), removed);
        }
    }
    Ok(())
}

fn edit_fields(args: EditArgs) -> Result<TaskFields> {
    let mut fields = TaskFields::new();
    if let Some(title) = args.title {
        fields = fields.title(title);
    }
    if let Some(subtitle) = args.subtitle {
        fields = fields.subtitle(subtitle);
    } else if args.clear_subtitle {
        fields = fields.clear_subtitle();
    }
    if let Some(location) = args.location {
        fields = fields.location(location);
    } else if args.clear_location {
        fields = fields.clear_location();
    }
    if let Some(start) = args.start {
        fields = fields.start_date(parse_date(&start)?);
    } else if args.clear_start {
        fields = fields.clear_start_date();
    }
    if let Some(end) = args.end {
        fields = fields.end_date(parse_date(&end)?);
    } else if args.clear_end {
        fields = fields.clear_end_date();
    }
    if let Some(group) = args.group {
        fields = fields.group(group);
    } else if args.unstage {
        fields = fields.unstage_from_group();
    }
    Ok(fields)
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp into epoch ms
fn parse_date(s: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("Invalid date: {}", s))?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| eyre!("Invalid date: {}", s))?;
    Ok(midnight.and_utc().timestamp_millis())
}

fn format_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn task_line(task: &TaskItem) -> String {
    let mark = if task.is_complete { "[x]".green() } else { "[ ]".normal() };
    let title = if task.is_complete {
        task.title.dimmed()
    } else {
        task.title.normal()
    };
    format!("{} {} {}", mark, title, task.id.dimmed())
}

fn group_line(summary: &GroupSummary) -> String {
    let title = summary.title.as_deref().unwrap_or("(untitled)");
    let next = match &summary.next_task {
        Some(task) => format!("next: {}", task),
        None => "No Tasks Due".to_string(),
    };
    format!(
        "{:>3} {} {}/{} {} {}",
        summary.position,
        title.bold(),
        summary.completed_count,
        summary.task_count,
        next.dimmed(),
        summary.id.dimmed()
    )
}

fn print_task(task: &TaskItem) {
    println!("{}", task_line(task));
    println!("  created:  {}", format_ms(task.created_at));
    if let Some(subtitle) = &task.subtitle {
        println!("  subtitle: {}", subtitle);
    }
    if let Some(location) = &task.location {
        println!("  location: {}", location);
    }
    if let Some(start) = task.start_date {
        println!("  start:    {}", format_ms(start));
    }
    if let Some(end) = task.end_date {
        println!("  end:      {}", format_ms(end));
    }
    match &task.group_id {
        Some(group) => println!("  group:    {}", group),
        None => println!("  group:    {}", "(staged)".dimmed()),
    }
}
