mod cmd;
mod output;
mod root;

use std::path::PathBuf;

use booster_core::types::SkillId;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, demo::DemoArgs};

#[derive(Parser)]
#[command(
    name = "booster",
    about = "Closed-loop outbound call pacer: keeps operators busy without overflowing the queue",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: nearest config/config.yaml)
    #[arg(long, global = true, env = "BOOSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pace every skill the dispatcher reports active
    Run {
        /// Do not start the status API
        #[arg(long)]
        no_api: bool,

        /// Keep chart samples in memory only
        #[arg(long)]
        no_persist: bool,
    },

    /// Pace simulated skills against a synthetic call model
    Demo(DemoArgs),

    /// Print recorded chart samples for a skill
    Chart {
        skill_id: SkillId,

        /// Most recent samples to show
        #[arg(long, default_value_t = 100)]
        limit: u32,

        /// Lower bound, RFC 3339
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Upper bound, RFC 3339
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Run { .. } | Commands::Demo(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config_path = root::resolve_config_path(cli.config.as_deref());

    let result = match cli.command {
        Commands::Run { no_api, no_persist } => cmd::run::run(&config_path, no_api, no_persist),
        Commands::Demo(args) => cmd::demo::run(&config_path, args, cli.json),
        Commands::Chart {
            skill_id,
            limit,
            from,
            to,
        } => cmd::chart::run(&config_path, skill_id, limit, from, to, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
