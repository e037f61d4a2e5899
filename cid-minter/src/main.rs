//! cid-minter - Cluster ID minting tool
//!
//! Resolves or mints CIDs for HathiTrust records, one at a time or from a
//! JSON Lines batch, against the configured concordance, cluster database and
//! local minter store.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use cid_common::config::{resolve_config_path, MinterConfig};
use cid_common::db::{init_minter_database, open_pool, AccessMode};
use cid_common::{IdentifierBundle, RawBundle};
use cid_minter::{mint_batch, read_bundles, BatchStats, CidMinter, ClusterDbReader, EngineContext, LocalMinterCache};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for cid-minter
#[derive(Parser, Debug)]
#[command(name = "cid-minter")]
#[command(about = "Cluster ID minting engine")]
#[command(version)]
struct Args {
    /// Config file (overrides CID_MINTER_CONFIG and the default locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the minter store and its counter row
    Init {
        /// Raise the counter to the highest CID already in the cluster database
        #[arg(long)]
        seed_from_cluster_db: bool,
    },

    /// Resolve or mint the CID of one record and print it
    Mint {
        #[arg(long)]
        htid: String,

        /// Comma-separated OCNs
        #[arg(long)]
        ocns: Option<String>,

        /// Comma-separated contribsys ids
        #[arg(long)]
        sysids: Option<String>,

        /// Comma-separated previous contribsys ids
        #[arg(long)]
        previous_sysids: Option<String>,
    },

    /// Mint every record of a JSON Lines file ("-" reads stdin)
    Batch {
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = MinterConfig::load(&config_path)?;

    // Initialize tracing; RUST_LOG overrides the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    info!(
        "Starting cid-minter {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Config: {}", config_path.display());

    match args.command {
        Command::Init {
            seed_from_cluster_db,
        } => init(&config, seed_from_cluster_db).await,
        Command::Mint {
            htid,
            ocns,
            sysids,
            previous_sysids,
        } => {
            let raw = RawBundle {
                htid: Some(htid),
                ocns,
                contribsys_ids: sysids,
                previous_contribsys_ids: previous_sysids,
            };
            mint_one(&config, IdentifierBundle::from_raw(&raw)).await
        }
        Command::Batch { input } => batch(&config, &input).await,
    }
}

async fn init(config: &MinterConfig, seed_from_cluster_db: bool) -> Result<()> {
    let minter_pool = init_minter_database(&config.minter_db, config.max_connections)
        .await
        .context("Failed to initialize minter store")?;
    let cache = LocalMinterCache::new(minter_pool, config.cid_width, config.query_timeout());

    if seed_from_cluster_db {
        let cluster_pool = open_pool(&config.cluster_db, AccessMode::ReadOnly, config.max_connections)
            .await
            .context("Failed to open cluster database")?;
        let reader = ClusterDbReader::new(cluster_pool, config.cid_width, config.query_timeout());

        let max = reader.max_cid().await?.unwrap_or(0);
        let counter = cache.seed_counter(max).await?;
        info!("Counter seeded from cluster database (max cid {}): {}", max, counter);
    }

    let counter = cache.current_counter().await?.unwrap_or(0);
    println!("{}", counter);
    Ok(())
}

async fn mint_one(config: &MinterConfig, bundle: IdentifierBundle) -> Result<()> {
    let ctx = EngineContext::open(config).await?;
    let minter = CidMinter::new(ctx);

    let report = minter.mint(&bundle).await?;
    println!("{}", report.cid);
    Ok(())
}

async fn batch(config: &MinterConfig, input: &Path) -> Result<()> {
    let bundles = if input.as_os_str() == "-" {
        read_bundles(io::stdin().lock())?
    } else {
        let file = std::fs::File::open(input)
            .with_context(|| format!("Failed to open {}", input.display()))?;
        read_bundles(BufReader::new(file))?
    };
    info!("Read {} records from {}", bundles.len(), input.display());

    let ctx = EngineContext::open(config).await?;
    let minter = CidMinter::new(ctx);
    let outcomes = mint_batch(&minter, bundles, config.batch_concurrency).await;

    for outcome in &outcomes {
        if let Some(cid) = outcome.cid() {
            println!("{}\t{}", outcome.htid, cid);
        }
    }

    let stats = BatchStats::from_outcomes(&outcomes);
    info!(
        minted = stats.minted,
        from_cache = stats.from_cache,
        from_cluster_db = stats.from_cluster_db,
        failed = stats.failed,
        "Batch complete"
    );

    if stats.failed > 0 {
        warn!("{} of {} records failed", stats.failed, stats.total());
        bail!("{} records failed to mint", stats.failed);
    }
    Ok(())
}
