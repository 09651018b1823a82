use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repoatlas::cli::commands::{analyze, ask, cache, config, init, status};
use repoatlas::cli::ui::Output;
use repoatlas::config::ConfigFormat;
use repoatlas::pipeline::{DiagramFormat, Granularity, RunState};

#[derive(Parser)]
#[command(name = "repoatlas")]
#[command(
    version,
    about = "Model-assisted documentation, diagrams and Q&A for code repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global and project files
    #[arg(long, short, global = true, env = "REPOATLAS_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Errors only
    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize RepoAtlas in a directory
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long, short, help = "Overwrite existing configuration")]
        force: bool,
    },

    /// Analyze a repository and export documentation and diagram
    Analyze {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long = "only", value_name = "PATH", help = "Restrict to files, directories or globs (repeatable)")]
        only: Vec<String>,
        #[arg(long, help = "Re-analyze files that have cached records")]
        force: bool,
        #[arg(long, value_name = "N", help = "Token budget for this run")]
        budget_tokens: Option<u64>,
        #[arg(long, value_name = "N", help = "Time budget for this run")]
        budget_minutes: Option<u64>,
        #[arg(long, short, help = "Output directory (default: .repoatlas/output)")]
        output: Option<PathBuf>,
        #[arg(long, help = "Diagram format: mermaid, dot")]
        format: Option<DiagramFormat>,
        #[arg(long, help = "Diagram granularity: file, entity, directory, class, endpoint")]
        granularity: Option<Granularity>,
    },

    /// Ask a question about an analyzed repository
    Ask {
        #[arg(required_unless_present = "end")]
        question: Option<String>,
        #[arg(long, short, help = "Continue an existing conversation")]
        session: Option<String>,
        #[arg(long, short, default_value = ".")]
        path: PathBuf,
        #[arg(long, requires = "session", help = "End the session")]
        end: bool,
        #[arg(long)]
        json: bool,
    },

    /// Show the last analysis run
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },

    /// Inspect or trim the content cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
        #[arg(long, short, global = true, default_value = ".")]
        path: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
        #[arg(long, short, global = true, default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Drop persisted records older than the configured age
    Prune {
        #[arg(long, value_name = "N")]
        older_than_hours: Option<u64>,
    },
    /// Remove every cached record and diagram
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(
            short = 'f',
            long,
            default_value = "toml",
            value_parser = config::parse_format,
            help = "Output format: toml, yaml, json"
        )]
        format: ConfigFormat,
    },
    /// Show configuration file paths
    Path,
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mRepoAtlas encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "repoatlas=debug,info"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let out = Output::quiet(cli.quiet);
    let config_file = cli.config.as_deref();
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init { path, force } => init::run(&path, force, &out)?,
        Commands::Analyze {
            path,
            only,
            force,
            budget_tokens,
            budget_minutes,
            output,
            format,
            granularity,
        } => {
            let args = analyze::AnalyzeArgs {
                path,
                only,
                force,
                budget_tokens,
                budget_minutes,
                output,
                format,
                granularity,
            };
            let status = runtime.block_on(analyze::run(args, config_file, &out))?;
            return Ok(match status.state {
                RunState::Done => ExitCode::SUCCESS,
                RunState::Cancelled => ExitCode::from(130),
                _ => ExitCode::FAILURE,
            });
        }
        Commands::Ask {
            question,
            session,
            path,
            end,
            json,
        } => {
            let args = ask::AskArgs {
                question,
                session,
                path,
                end,
                json,
            };
            runtime.block_on(ask::run(args, config_file, &out))?;
        }
        Commands::Status { path, json } => status::run(&path, json, &out)?,
        Commands::Cache { action, path } => match action {
            CacheAction::Stats { json } => cache::stats(&path, config_file, json, &out)?,
            CacheAction::Prune { older_than_hours } => {
                cache::prune(&path, config_file, older_than_hours, &out)?
            }
            CacheAction::Clear => cache::clear(&path, config_file, &out)?,
        },
        Commands::Config { action, path } => match action {
            ConfigAction::Show { format } => config::show(&path, config_file, format, &out)?,
            ConfigAction::Path => config::path(&path, config_file, &out)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}
