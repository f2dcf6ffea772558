//! driftgate CLI tool.

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "driftgate")]
#[command(about = "Run schema-regeneration CI pipelines", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, global = true, env = "DRIFTGATE_CONFIG", default_value = "driftgate.kdl")]
    config: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a pipeline configuration
    Validate {
        /// Path to the configuration file (overrides --config)
        path: Option<String>,
    },
    /// Show which jobs an event would run
    Plan {
        #[command(flatten)]
        event: EventArgs,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
        /// Path to the configuration file (overrides --config)
        path: Option<String>,
    },
    /// Run the jobs an event triggers
    Run {
        #[command(flatten)]
        event: EventArgs,
        /// Repository checkout to build
        #[arg(long, default_value = ".")]
        repo: String,
        /// How each job gets its working copy
        #[arg(long, value_enum, default_value_t = commands::run::Isolation::Worktree)]
        isolation: commands::run::Isolation,
        /// Only run the named jobs
        #[arg(long = "job")]
        jobs: Vec<String>,
        /// Print the final result as JSON
        #[arg(long)]
        json: bool,
        /// Path to the configuration file (overrides --config)
        path: Option<String>,
    },
}

#[derive(Args)]
struct EventArgs {
    /// Event kind (push or pull_request)
    #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "push")]
    event: String,
    /// Git ref the event is for
    #[arg(long = "ref", env = "GITHUB_REF", default_value = "refs/heads/main")]
    git_ref: String,
    /// Paths changed by the event
    #[arg(long = "changed")]
    changed: Vec<String>,
}

impl EventArgs {
    fn into_event(self) -> anyhow::Result<driftgate_core::event::TriggerEvent> {
        let kind = self.event.parse()?;
        Ok(driftgate_core::event::TriggerEvent::new(kind, self.git_ref).with_paths(self.changed))
    }
}

fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(path.as_deref().unwrap_or(&cli.config))?;
        }
        Commands::Plan { event, json, path } => {
            let config = path.unwrap_or(cli.config);
            commands::plan::show(&config, &event.into_event()?, json)?;
        }
        Commands::Run {
            event,
            repo,
            isolation,
            jobs,
            json,
            path,
        } => {
            let config = path.unwrap_or(cli.config);
            let options = commands::run::RunOptions {
                repo,
                isolation,
                jobs,
                json,
            };
            commands::run::run(&config, event.into_event()?, options).await?;
        }
    }

    Ok(())
}
