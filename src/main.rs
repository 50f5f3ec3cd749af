use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use virtnode::{Result, cmd, config};

/// Command-line arguments for the virtnode agent
#[derive(Parser)]
#[command(name = "virtnode")]
#[command(about = "Node agent domain watcher and ghost record tooling")]
#[command(version)]
struct Cli {
   #[arg(long, env = "VIRTNODE_CONFIG", help = "Path to a TOML config file")]
   config: Option<PathBuf>,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for virtnode
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the domain watcher until interrupted")]
   Run,

   #[command(about = "Inspect or remove ghost records")]
   Ghosts {
      #[command(subcommand)]
      command: GhostsCmd,
   },

   #[command(about = "List candidate control sockets and their liveness")]
   Sockets {
      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Print the effective configuration as TOML")]
   Config,
}

#[derive(Subcommand)]
enum GhostsCmd {
   #[command(about = "List ghost records")]
   List {
      #[arg(long, help = "JSON output")]
      json: bool,
   },

   #[command(about = "Delete the ghost record of one VM")]
   Delete {
      #[arg(help = "VM namespace")]
      namespace: String,

      #[arg(help = "VM name")]
      name: String,
   },
}

#[tokio::main]
async fn main() {
   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
      .init();

   let cli = Cli::parse();
   if let Err(err) = run(cli).await {
      eprintln!("{err}");
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   let cfg = config::init(cli.config.as_deref())?;

   match cli.command {
      Cmd::Run => cmd::run::execute(cfg).await,
      Cmd::Ghosts { command: GhostsCmd::List { json } } => cmd::ghosts::list(cfg, json),
      Cmd::Ghosts { command: GhostsCmd::Delete { namespace, name } } => {
         cmd::ghosts::delete(cfg, &namespace, &name)
      },
      Cmd::Sockets { json } => cmd::sockets::execute(cfg, json),
      Cmd::Config => cmd::show_config::execute(cfg),
   }
}
