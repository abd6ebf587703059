//! Commons Ledger CLI
//!
//! Operator tool over a ledger database: inspect pools, their inventory and
//! demand, preview a needs-based mass distribution and commit it, record
//! council consumption and run the recurring-needs sweep.
//!
//! ## Usage
//!
//! ```bash
//! # Create the storage directory, database and a default config
//! commons-ledger init
//!
//! # Inventory and aggregated needs for a pool
//! commons-ledger inventory <pool-id>
//! commons-ledger needs <pool-id>
//!
//! # Dry run, then commit with the returned token
//! commons-ledger --as cora preview <pool-id> rice --strategy equal --max-per-user 5
//! commons-ledger --as cora distribute <pool-id> rice --strategy equal --max-per-user 5 --token <token>
//!
//! # Council consumption, and the daily replenishment sweep (e.g. from cron)
//! commons-ledger --as cora consume <pool-id> rice 4 "harvest supper"
//! commons-ledger replenish
//! ```
//!
//! Authorization comes from the `grants` table in the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commons_ledger::db::pools::RecordConsumptionInput;
use commons_ledger::services::spawn_logging_listener;
use commons_ledger::{
    Config, EventBus, LedgerDb, MassDistributionRequest, MassStrategy, Services, StaticTrustGate,
};

#[derive(Parser, Debug)]
#[command(name = "commons-ledger")]
#[command(about = "Community wealth sharing and pool distribution ledger")]
struct Args {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// User the command acts as
    #[arg(long = "as", global = true, env = "COMMONS_LEDGER_USER")]
    acting_user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create storage directory, database and default config
    Init,

    /// List a community's pools
    Pools { community_id: String },

    /// Show a pool's inventory
    Inventory { pool_id: String },

    /// Show aggregated active needs for a pool's items
    Needs { pool_id: String },

    /// Preview a mass distribution
    Preview {
        pool_id: String,
        item_id: String,
        #[command(flatten)]
        plan: PlanArgs,
    },

    /// Commit a previewed mass distribution
    Distribute {
        pool_id: String,
        item_id: String,
        #[command(flatten)]
        plan: PlanArgs,

        /// Token returned by `preview`
        #[arg(long)]
        token: String,
    },

    /// List a pool's distributions
    Distributions { pool_id: String },

    /// Record units the council used up from a pool
    Consume {
        pool_id: String,
        item_id: String,
        units: i64,
        description: String,
    },

    /// Re-open recurring needs whose period has elapsed
    Replenish,
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// full, partial or equal
    #[arg(long, default_value = "equal")]
    strategy: MassStrategy,

    /// Cap per recipient (overrides the pool's cap)
    #[arg(long)]
    max_per_user: Option<i64>,

    /// Restrict to these users (repeatable)
    #[arg(long = "user")]
    users: Vec<String>,
}

impl PlanArgs {
    fn into_request(self, pool_id: String, item_id: String) -> MassDistributionRequest {
        MassDistributionRequest {
            pool_id,
            item_id,
            strategy: self.strategy,
            max_units_per_user: self.max_per_user,
            selected_user_ids: (!self.users.is_empty()).then_some(self.users),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("commons_ledger=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    std::fs::create_dir_all(&config.storage_dir)
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    let db = Arc::new(LedgerDb::open(&config.database_path(), config.lock_policy())?);
    let gate = Arc::new(StaticTrustGate::from_grants(&config.grants));
    let events = Arc::new(EventBus::with_capacity(config.event_capacity));
    let _listener = spawn_logging_listener(events.clone());
    let services = Services::with_events(db, gate, events);

    let Args {
        command,
        acting_user,
        ..
    } = args;

    tokio::task::spawn_blocking(move || run(command, acting_user, &config, &services)).await?
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            let default_path = Config::default().config_path();
            if default_path.exists() {
                Config::load(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    // Apply CLI overrides
    if let Some(dir) = &args.storage_dir {
        config.storage_dir = dir.clone();
    }
    Ok(config)
}

fn run(
    command: Command,
    acting_user: Option<String>,
    config: &Config,
    services: &Services,
) -> anyhow::Result<()> {
    let acting = || {
        acting_user
            .clone()
            .ok_or_else(|| anyhow!("this command needs --as <user> (or COMMONS_LEDGER_USER)"))
    };

    match command {
        Command::Init => {
            let path = config.config_path();
            if !path.exists() {
                config.save(&path)?;
                info!(path = %path.display(), "Created default config");
            }
            info!(db = %config.database_path().display(), "Ledger ready");
        }
        Command::Pools { community_id } => {
            print_json(&services.pools.list_pools(&community_id, &acting()?)?)?;
        }
        Command::Inventory { pool_id } => {
            print_json(&services.pools.get_inventory(&pool_id)?)?;
        }
        Command::Needs { pool_id } => {
            print_json(&services.needs.pool_needs(&pool_id)?)?;
        }
        Command::Preview { pool_id, item_id, plan } => {
            let request = plan.into_request(pool_id, item_id);
            let preview = services.allocation.preview_mass_distribution(&request, &acting()?)?;
            print_json(&preview)?;
        }
        Command::Distribute {
            pool_id,
            item_id,
            plan,
            token,
        } => {
            let request = plan.into_request(pool_id, item_id);
            let distributions = services.allocation.distribute_mass(&request, &token, &acting()?)?;
            print_json(&distributions)?;
        }
        Command::Distributions { pool_id } => {
            print_json(&services.allocation.list_distributions(&pool_id, &acting()?)?)?;
        }
        Command::Consume {
            pool_id,
            item_id,
            units,
            description,
        } => {
            let input = RecordConsumptionInput {
                item_id,
                units,
                description,
            };
            print_json(&services.pools.record_consumption(&pool_id, input, &acting()?)?)?;
        }
        Command::Replenish => {
            print_json(&services.needs.replenish_due_needs(chrono::Utc::now())?)?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
