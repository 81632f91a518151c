use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use sto_audit::ChainCheck;
use sto_config::{ConfigSurface, UnusedKeyPolicy};
use tracing::warn;

mod commands;

#[derive(Parser)]
#[command(name = "sto")]
#[command(about = "Tiered token sale CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Report config keys the chosen binary would ignore
    ConfigCheck {
        /// Which consumer to check against
        #[arg(long, value_enum, default_value_t = Surface::Simulate)]
        surface: Surface,

        /// Exit non-zero when any key is unused
        #[arg(long, default_value_t = false)]
        strict: bool,

        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Replay a purchase script against an in-memory sale
    Simulate {
        /// Layered config paths in merge order
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,

        /// JSON script: { "investors": [...], "purchases": [...] }
        #[arg(long)]
        purchases: PathBuf,

        /// Append every sale event to this hash-chained journal
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Move the clock to end_time and finalize after the script
        #[arg(long, default_value_t = false)]
        finalize: bool,

        /// Print the full report as JSON instead of key=value lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Journal utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Walk a journal's hash chain. Exits non-zero when it is broken.
    Verify { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Surface {
    Simulate,
    Daemon,
}

impl From<Surface> for ConfigSurface {
    fn from(s: Surface) -> Self {
        match s {
            Surface::Simulate => ConfigSurface::Simulate,
            Surface::Daemon => ConfigSurface::Daemon,
        }
    }
}

fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let loaded = sto_config::load_layered_yaml(&paths)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck {
            surface,
            strict,
            paths,
        } => {
            let loaded = sto_config::load_layered_yaml(&paths)?;
            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report =
                sto_config::report_unused_keys(surface.into(), &loaded.config_json, policy)?;
            println!("surface={}", report.surface);
            println!("unused_keys={}", report.unused_leaf_pointers.len());
            for p in &report.unused_leaf_pointers {
                println!("unused={p}");
            }
        }

        Commands::Simulate {
            config_paths,
            purchases,
            journal,
            finalize,
            json,
        } => {
            let loaded = sto_config::load_layered_yaml(&config_paths)?;
            let report = sto_config::report_unused_keys(
                ConfigSurface::Simulate,
                &loaded.config_json,
                UnusedKeyPolicy::Warn,
            )?;
            for p in &report.unused_leaf_pointers {
                warn!(pointer = %p, "config key not used by simulate");
            }

            let setup = loaded.sale_setup()?;
            let script: commands::simulate::Script = commands::read_json(&purchases)?;
            let report =
                commands::simulate::run(setup, &script, journal.as_deref(), finalize)?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("serialize report")?
                );
            } else {
                println!("config_hash={}", loaded.config_hash);
                for o in &report.outcomes {
                    println!("{}", o.line());
                }
                println!("tokens_sold={}", report.stats.tokens_sold);
                println!("tokens_remaining={}", report.stats.tokens_remaining);
                println!("units_raised={}", report.stats.units_raised);
                println!("investor_count={}", report.stats.investor_count);
                println!("state={}", report.stats.state);
                if let Some(unsold) = report.finalized_unsold {
                    println!("finalized=true unsold_to_treasury={unsold}");
                }
                if let Some(n) = report.journal_entries {
                    println!("journal_entries={n}");
                }
            }
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => match sto_audit::verify_journal(&path)? {
                ChainCheck::Intact { entries } => {
                    println!("journal_intact=true entries={entries}");
                }
                ChainCheck::Broken { line, reason } => {
                    println!("journal_intact=false line={line} reason={reason}");
                    bail!("JOURNAL_BROKEN: {} at line {line}: {reason}", path.display());
                }
            },
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
