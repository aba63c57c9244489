mod cmd;
mod output;
mod prompt;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wpfleet_core::executor::{DryRunExecutor, ProcessExecutor, SystemExecutor};
use wpfleet_core::paths;

#[derive(Parser)]
#[command(
    name = "wpfleet",
    about = "Provision WordPress sites behind shared Nginx, PHP-FPM, MySQL and Redis containers",
    version,
    propagate_version = true
)]
struct Cli {
    /// wpfleet root (default: auto-detect from wpfleet.yaml or deployments/)
    #[arg(long, global = true, env = "WPFLEET_ROOT")]
    root: Option<PathBuf>,

    /// Deployment to operate on
    #[arg(long = "env", global = true, env = "DEPLOY_ENV", default_value = paths::DEFAULT_ENV)]
    deployment: String,

    /// Print intended commands and file changes without performing them
    #[arg(long, global = true)]
    dry: bool,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Answer confirmations with yes
    #[arg(long, global = true, short = 'y')]
    yes: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the deployment and stage its first sites
    Init {
        /// Domain to provision (repeatable; prompted for when omitted)
        #[arg(long = "domain", short = 'd')]
        domains: Vec<String>,

        /// Write everything but leave the containers stopped
        #[arg(long)]
        no_start: bool,

        /// Skip issuance and renewal jobs; a self-signed placeholder is written
        #[arg(long)]
        no_certs: bool,
    },

    /// Add a site to an existing deployment
    Add {
        domain: String,

        /// Skip issuance and renewal jobs; a self-signed placeholder is written
        #[arg(long)]
        no_certs: bool,
    },

    /// Remove a site, or every site with --all
    Remove {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        domain: Option<String>,

        /// Remove every registered site
        #[arg(long)]
        all: bool,

        /// Also drop the site's database
        #[arg(long)]
        drop_database: bool,
    },

    /// List sites with container and certificate status
    List,

    /// Stop everything, delete volumes and remove the deployment directory
    Clean,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let executor: Box<dyn ProcessExecutor> = if cli.dry {
        Box::new(DryRunExecutor)
    } else {
        Box::new(SystemExecutor)
    };
    let ctx = cmd::Context {
        root: root::resolve_root(cli.root.as_deref()),
        env: cli.deployment,
        exec: executor.as_ref(),
        json: cli.json,
        yes: cli.yes,
    };

    let result = match cli.command {
        Commands::Init {
            domains,
            no_start,
            no_certs,
        } => cmd::init::run(&ctx, domains, no_start, no_certs),
        Commands::Add { domain, no_certs } => cmd::add::run(&ctx, &domain, no_certs),
        Commands::Remove {
            domain,
            all,
            drop_database,
        } => cmd::remove::run(&ctx, domain.as_deref(), all, drop_database),
        Commands::List => cmd::list::run(&ctx),
        Commands::Clean => cmd::clean::run(&ctx),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        output::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
