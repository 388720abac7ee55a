use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cx::i18n::I18n;
use cx::{
    AliasTable, CommandDispatcher, Config, ExecutionJournal, ExecutionSnapshot, ExecutionState,
    FailureKind, SubmitOptions,
};

#[derive(Parser)]
#[command(name = "cx")]
#[command(about = "Dispatch external commands, track running executions, and record their output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a command and record the result
    Run {
        /// Command to execute (wrap commands with pipes in quotes)
        #[arg(required = true)]
        command: String,
        /// Run through the platform's privilege escalation
        #[arg(long, short = 'E')]
        elevated: bool,
        /// Cancel automatically after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Manage command aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
    /// Show recorded executions
    Log {
        /// Maximum number of records to display [default: 20]
        #[arg(long)]
        limit: Option<usize>,
        /// Copy the journal to a file instead of displaying it
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Clear recorded executions
    Clean,
}

#[derive(Subcommand)]
enum AliasAction {
    /// Define an alias (name=command)
    Set {
        definition: String,
    },
    /// Remove an alias
    Unset {
        name: String,
    },
    /// List defined aliases
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::new()?;
    let i18n = I18n::new(&config.get_effective_language());

    match cli.command {
        Commands::Run {
            command,
            elevated,
            timeout,
        } => run_command(&config, &i18n, &command, elevated, timeout),
        Commands::Alias { action } => manage_aliases(&i18n, action),
        Commands::Log { limit, export } => show_log(&i18n, limit, export),
        Commands::Clean => clean_journal(&i18n),
    }
}

fn aliases_path() -> PathBuf {
    Config::base_dir().join("aliases.toml")
}

fn run_command(
    config: &Config,
    i18n: &I18n,
    command: &str,
    elevated: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let aliases = AliasTable::load(&aliases_path())?;
    let dispatcher = Arc::new(CommandDispatcher::with_aliases(&config.execution, aliases));

    // Ctrl-C cancels the in-flight execution instead of killing cx itself,
    // so the partial record still lands in the journal.
    let current = Arc::new(AtomicU64::new(0));
    {
        let dispatcher = dispatcher.clone();
        let current = current.clone();
        let _ = ctrlc::set_handler(move || {
            let id = current.load(Ordering::SeqCst);
            if id != 0 {
                dispatcher.cancel(id);
            }
        });
    }

    let handle = dispatcher.submit_with(
        command,
        SubmitOptions {
            elevated,
            timeout: timeout.map(Duration::from_secs),
        },
    )?;
    current.store(handle.id(), Ordering::SeqCst);

    let snapshot = handle.wait()?;
    print_outcome(i18n, &snapshot);

    let journal = ExecutionJournal::new()?;
    journal.append(&snapshot)?;
    println!("{}", i18n.t("result_saved").green());
    Ok(())
}

fn print_outcome(i18n: &I18n, snapshot: &ExecutionSnapshot) {
    match snapshot.state {
        ExecutionState::Completed => println!(
            "{}",
            i18n.t_format(
                "run_completed",
                &[&snapshot.exit_code.unwrap_or(-1).to_string()]
            )
            .green()
            .bold()
        ),
        ExecutionState::Failed => {
            let reason = match snapshot.failure {
                Some(FailureKind::Spawn) => i18n.t("failure_spawn"),
                Some(FailureKind::Elevation) => i18n.t("failure_elevation"),
                _ => i18n.t("failure_runtime"),
            };
            let code = snapshot
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{}",
                i18n.t_format("run_failed", &[&reason, &code]).red().bold()
            );
        }
        ExecutionState::Cancelled => println!("{}", i18n.t("run_cancelled").yellow().bold()),
        _ => {}
    }

    if snapshot.elevated {
        println!("{}", i18n.t("elevated_marker").yellow());
    }
    if let (Some(started), Some(ended)) = (snapshot.started_at, snapshot.ended_at) {
        let ms = (ended - started).num_milliseconds().max(0);
        println!(
            "{}: {}ms",
            i18n.t("execution_time").yellow(),
            ms.to_string().green()
        );
    }

    if !snapshot.stdout.is_empty() {
        println!("{}", i18n.t("stdout").cyan().bold());
        print_block(&snapshot.stdout, false);
    }
    if !snapshot.stderr.is_empty() {
        println!("{}", i18n.t("stderr").red().bold());
        print_block(&snapshot.stderr, true);
    }
}

fn print_block(text: &str, is_stderr: bool) {
    if is_stderr {
        print!("{}", text.red());
    } else {
        print!("{text}");
    }
    if !text.ends_with('\n') {
        println!();
    }
}

fn manage_aliases(i18n: &I18n, action: AliasAction) -> Result<()> {
    let path = aliases_path();
    let mut table = AliasTable::load(&path)?;

    match action {
        AliasAction::Set { definition } => {
            let (name, command) = table.define(&definition)?;
            table.save(&path)?;
            println!(
                "{}",
                i18n.t_format("alias_set", &[&name, &command]).green()
            );
        }
        AliasAction::Unset { name } => {
            if table.remove(&name) {
                table.save(&path)?;
                println!("{}", i18n.t_format("alias_removed", &[&name]).green());
            } else {
                println!("{}", i18n.t_format("alias_missing", &[&name]).yellow());
            }
        }
        AliasAction::List => {
            let entries = table.entries();
            if entries.is_empty() {
                println!("{}", i18n.t("alias_none").yellow());
            } else {
                for (name, command) in entries {
                    println!("{} = {}", name.green(), command);
                }
            }
        }
    }
    Ok(())
}

fn show_log(i18n: &I18n, limit: Option<usize>, export: Option<PathBuf>) -> Result<()> {
    let journal = ExecutionJournal::new()?;

    if let Some(target) = export {
        journal.export(&target)?;
        println!(
            "{}",
            i18n.t_format("log_exported", &[&target.display().to_string()])
                .green()
        );
        return Ok(());
    }

    let entries = journal.entries()?;
    if entries.is_empty() {
        println!("{}", i18n.t("log_empty").yellow());
        return Ok(());
    }

    let shown = limit.unwrap_or(20);
    let skipped = entries.len().saturating_sub(shown);
    for entry in &entries[skipped..] {
        let local = entry.request.submitted_at.with_timezone(&chrono::Local);
        let code = entry
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if entry.elevated { " [sudo]" } else { "" };
        println!(
            "{} {} {}{} (exit {})",
            local.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            state_label(entry.state),
            entry.request.raw,
            marker.yellow(),
            code
        );
    }
    if skipped > 0 {
        println!(
            "{}",
            i18n.t_format(
                "log_showing_last",
                &[&shown.to_string(), &entries.len().to_string()]
            )
            .dimmed()
        );
    }
    Ok(())
}

fn state_label(state: ExecutionState) -> ColoredString {
    match state {
        ExecutionState::Completed => "completed".green(),
        ExecutionState::Failed => "failed".red(),
        ExecutionState::Cancelled => "cancelled".yellow(),
        ExecutionState::Running => "running".cyan(),
        ExecutionState::Pending => "pending".normal(),
    }
}

fn clean_journal(i18n: &I18n) -> Result<()> {
    let journal = ExecutionJournal::new()?;
    let count = journal.entries()?.len();
    if count == 0 {
        println!("{}", i18n.t("log_empty").yellow());
        return Ok(());
    }

    println!(
        "{}",
        i18n.t_format("clean_title", &[&count.to_string()])
            .red()
            .bold()
    );
    print!("{}", i18n.t("confirm_delete_prompt").yellow());
    io::stdout().flush().ok();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        println!("{}", i18n.t("clean_aborted").yellow());
        return Ok(());
    }
    if input.trim().eq_ignore_ascii_case("yes") {
        journal.clear()?;
        println!("{}", i18n.t("cleaned").green());
    } else {
        println!("{}", i18n.t("clean_aborted").yellow());
    }
    Ok(())
}
