use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use contrail_deploy::{CONFIG_FILENAME, ForceRedeploy, Selection};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "contrail")]
#[command(
    author,
    version,
    about = "Deploy interdependent smart contracts in dependency order, at most once per network"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CONTRAIL_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the project configuration, or to the directory containing it.
    #[arg(short, long, env = "CONTRAIL_CONFIG", default_value = CONFIG_FILENAME)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the selected units against a network.
    Deploy(DeployArgs),
    /// Print the execution order and which units would be skipped.
    Plan(SelectionArgs),
    /// List the deployment records persisted for a network.
    Records {
        /// The target network, as named in the configuration.
        #[arg(short, long, env = "CONTRAIL_NETWORK")]
        network: String,
    },
}

#[derive(Args)]
pub struct SelectionArgs {
    /// The target network, as named in the configuration.
    #[arg(short, long, env = "CONTRAIL_NETWORK")]
    pub network: String,

    /// Only run units carrying one of these tags (and what they require).
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Only run these units (and what they require).
    #[arg(short, long = "unit", value_delimiter = ',')]
    pub units: Vec<String>,
}

impl SelectionArgs {
    pub fn selection(&self) -> Selection {
        Selection::all()
            .with_names(self.units.iter().cloned())
            .with_tags(self.tags.iter().cloned())
    }
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Redeploy every selected unit, ignoring existing records.
    #[arg(long, env = "CONTRAIL_REDEPLOY", default_value_t = false)]
    pub redeploy: bool,

    /// Redeploy only these units, ignoring their existing records.
    #[arg(long = "redeploy-unit", value_delimiter = ',', conflicts_with = "redeploy")]
    pub redeploy_units: Vec<String>,

    /// Record successful calls so that later runs skip them.
    #[arg(long, default_value_t = false)]
    pub track_calls: bool,

    /// Rehearse the run against an in-memory chain seeded with the existing records.
    ///
    /// Nothing is submitted to the network and nothing is persisted.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Override the network's confirmation timeout, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl DeployArgs {
    pub fn force(&self) -> ForceRedeploy {
        if self.redeploy {
            ForceRedeploy::All
        } else if self.redeploy_units.is_empty() {
            ForceRedeploy::None
        } else {
            ForceRedeploy::units(self.redeploy_units.iter().cloned())
        }
    }
}
