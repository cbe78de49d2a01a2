//! mergegate - pre-merge quality gate
//!
//! Evaluates a proposed change against the configured validators and exits
//! with the verdict: 0 pass, 1 fail, 2 internal error, 3 configuration
//! error, 4 rejected override.

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mergegate::changes::{ChangePayload, DirectoryLoader, GitChangeSource};
use mergegate::config::CONFIG_FILE_NAMES;
use mergegate::ledger::{OverrideLedger, OverrideRequest};
use mergegate::report::{render_json, render_text};
use mergegate::{CancelSignal, ChangeSet, EvaluationMode, GateConfig, GateError, QualityOrchestrator};

#[derive(Parser)]
#[command(name = "mergegate")]
#[command(version)]
#[command(about = "Pre-merge quality gate with enforceable verdicts", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a change and exit with the verdict
    Check {
        #[command(flatten)]
        input: InputArgs,

        /// Configuration file (defaults to mergegate.toml in the project)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Evaluation mode: warning never fails, error enforces the policy
        #[arg(short, long)]
        mode: Option<EvaluationMode>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Override ledger file (defaults to ledger.path from configuration)
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Cancel evaluation after this many milliseconds
        #[arg(long, value_name = "MS")]
        deadline_ms: Option<u64>,
    },

    /// Record and inspect overrides
    Override {
        #[command(subcommand)]
        action: OverrideAction,

        /// Override ledger file (defaults to ledger.path from configuration)
        #[arg(long, global = true)]
        ledger: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where the change comes from. Exactly one source is required.
#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .multiple(false)
        .args(["payload", "new_dir", "git_base"])
))]
struct InputArgs {
    /// JSON payload with pr_title, pr_description, changed_files, previous_files
    #[arg(long)]
    payload: Option<PathBuf>,

    /// Directory holding the proposed tree
    #[arg(long)]
    new_dir: Option<PathBuf>,

    /// Git ref to diff the project's working tree against
    #[arg(long)]
    git_base: Option<String>,

    /// Directory holding the tree before the change (with --new-dir)
    #[arg(long, requires = "new_dir")]
    old_dir: Option<PathBuf>,

    /// Pull request title (ignored with --payload)
    #[arg(long, default_value = "")]
    title: String,

    /// Pull request description (ignored with --payload)
    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum OverrideAction {
    /// Record an override
    Add {
        /// Rule id to override
        #[arg(long)]
        rule: String,

        /// Restrict the override to one file
        #[arg(long)]
        file: Option<String>,

        /// Who is accepting the risk
        #[arg(long)]
        author: String,

        /// Why (at least 50 characters)
        #[arg(long)]
        justification: String,
    },

    /// Show the override in force for each rule/file
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every entry ever recorded
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the ledger's hash chain
    Verify,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate the configuration and every validator's parameters
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a default mergegate.toml
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "mergegate=debug,info"
    } else {
        "mergegate=info,warn"
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            e.downcast_ref::<GateError>().map_or(2, GateError::exit_code)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.is_dir() {
        return Err(GateError::config(format!(
            "Project directory does not exist: {}",
            project_path.display()
        ))
        .into());
    }

    match cli.command {
        Commands::Check {
            input,
            config,
            mode,
            format,
            ledger,
            deadline_ms,
        } => {
            let mut gate_config = load_config(&project_path, config.as_deref())?;
            if let Some(mode) = mode {
                gate_config = gate_config.with_mode(mode);
            }
            let orchestrator = QualityOrchestrator::from_config(&gate_config)?;
            let ledger = open_ledger(&project_path, &gate_config, ledger.as_deref())?;
            let changes = load_changes(&project_path, &input)?;

            let (handle, mut cancel) = CancelSignal::new();
            if let Some(ms) = deadline_ms {
                cancel = cancel.with_timeout(Duration::from_millis(ms));
            }
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handle.cancel();
                }
            });

            let report = orchestrator
                .evaluate_with_cancel(&changes, &ledger, gate_config.mode, &cancel)
                .await;

            match format {
                OutputFormat::Text => print!("{}", render_text(&report)),
                OutputFormat::Json => println!("{}", render_json(&report)),
            }

            if report.is_pass() {
                eprintln!("{} Quality gate passed", "PASS".green().bold());
            } else {
                eprintln!("{} Quality gate failed", "FAIL".red().bold());
            }
            Ok(report.verdict.exit_code())
        }

        Commands::Override { action, ledger } => {
            let gate_config = load_config(&project_path, None)?;
            let ledger_path = ledger.unwrap_or_else(|| gate_config.ledger.resolve(&project_path));

            match action {
                OverrideAction::Add {
                    rule,
                    file,
                    author,
                    justification,
                } => {
                    let ledger = OverrideLedger::open(&ledger_path)?;
                    let mut request = OverrideRequest::new(rule, author, justification);
                    if let Some(file) = file {
                        request = request.for_file(file);
                    }
                    let entry = ledger.record(request)?;
                    println!(
                        "{} Override #{} recorded for {}",
                        "OK".green().bold(),
                        entry.sequence,
                        entry.key()
                    );
                }

                OverrideAction::List { json } => {
                    let ledger = OverrideLedger::open(&ledger_path)?;
                    let current = ledger.current_overrides();
                    if json {
                        let entries: Vec<_> = current.values().collect();
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    } else if current.is_empty() {
                        println!("No overrides in force");
                    } else {
                        for (key, entry) in &current {
                            println!(
                                "{}  by {} at {}\n    {}",
                                key.to_string().cyan(),
                                entry.author,
                                entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                                entry.justification
                            );
                        }
                    }
                }

                OverrideAction::History { json } => {
                    let ledger = OverrideLedger::open(&ledger_path)?;
                    let history = ledger.history();
                    if json {
                        println!("{}", serde_json::to_string_pretty(&history)?);
                    } else {
                        for entry in &history {
                            println!(
                                "#{} {} {} by {}",
                                entry.sequence,
                                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                                entry.key(),
                                entry.author
                            );
                        }
                    }
                }

                OverrideAction::Verify => {
                    let result = OverrideLedger::verify_file(&ledger_path)?;
                    if result.is_valid {
                        println!(
                            "{} Ledger intact ({} entries)",
                            "OK".green().bold(),
                            result.entries_verified
                        );
                    } else {
                        eprintln!(
                            "{} Ledger corrupt at entry {}: {}",
                            "FAIL".red().bold(),
                            result.first_invalid_entry.unwrap_or_default(),
                            result.error_description.unwrap_or_default()
                        );
                        return Ok(2);
                    }
                }
            }
            Ok(0)
        }

        Commands::Config { action } => {
            match action {
                ConfigAction::Show { config } => {
                    let gate_config = load_config(&project_path, config.as_deref())?;
                    print!("{}", gate_config.to_toml()?);
                }

                ConfigAction::Validate { config } => {
                    let gate_config = load_config(&project_path, config.as_deref())?;
                    QualityOrchestrator::from_config(&gate_config)?;
                    println!("{} Configuration is valid", "OK".green().bold());
                }

                ConfigAction::Init { force } => {
                    let path = project_path.join(CONFIG_FILE_NAMES[0]);
                    if path.exists() && !force {
                        eprintln!(
                            "{} {} already exists. Use --force to overwrite.",
                            "Warning:".yellow().bold(),
                            path.display()
                        );
                        return Ok(1);
                    }
                    std::fs::write(&path, GateConfig::default().to_toml()?)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("{} Wrote {}", "OK".green().bold(), path.display());
                }
            }
            Ok(0)
        }
    }
}

fn load_config(project_path: &Path, explicit: Option<&Path>) -> mergegate::Result<GateConfig> {
    match explicit {
        Some(path) => GateConfig::load(path),
        None => GateConfig::discover(project_path),
    }
}

fn open_ledger(
    project_path: &Path,
    config: &GateConfig,
    explicit: Option<&Path>,
) -> mergegate::Result<OverrideLedger> {
    let path = explicit.map_or_else(|| config.ledger.resolve(project_path), Path::to_path_buf);
    OverrideLedger::open(path)
}

fn load_changes(project_path: &Path, input: &InputArgs) -> mergegate::Result<ChangeSet> {
    if let Some(payload) = &input.payload {
        return Ok(ChangePayload::load(payload)?.into_change_set());
    }
    if let Some(new_dir) = &input.new_dir {
        let mut loader = DirectoryLoader::new(new_dir);
        if let Some(old_dir) = &input.old_dir {
            loader = loader.with_previous(old_dir);
        }
        return loader.load(&input.title, &input.description);
    }
    if let Some(base) = &input.git_base {
        return GitChangeSource::new(project_path).collect(base, &input.title, &input.description);
    }
    Err(GateError::changeset("no change source given"))
}
