//! LUTSTORE command-line driver.
//!
//! Creates, inspects and trains over a memory-mapped parameter file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lutstore::config;
use lutstore::{
    derive_views, tables, OffsetPolicy, ParamSchema, ParamStore, StoreConfig, Table, Trainer,
    TrainerConfig, WriteMode,
};

/// Out-of-core parameter store driver.
#[derive(Parser, Debug)]
#[command(name = "lutstore", about = "Memory-mapped u16 parameter store with lookup-table compute", version)]
struct Cli {
    /// Parameter file.
    #[arg(short, long, global = true, default_value = "params.bin")]
    path: PathBuf,

    /// Store length in elements.
    #[arg(short, long, global = true, default_value_t = config::TOTAL_PARAMS)]
    total: usize,

    /// Seed for reinitialization (entropy when absent).
    #[arg(long, global = true)]
    init_seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open (creating or reinitializing as needed) and report the store.
    Init,

    /// Print view layout and reductions for a schema.
    Inspect {
        #[command(flatten)]
        schema: SchemaArgs,
    },

    /// Run training steps over the store.
    Train {
        #[command(flatten)]
        schema: SchemaArgs,

        /// Trainer configuration JSON; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(short = 'n', long, default_value_t = 1000)]
        steps: u64,

        #[arg(long)]
        batch: Option<usize>,

        /// Write every step at this offset instead of rolling over the views.
        #[arg(long)]
        offset: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Do not wait for each step's write to land.
        #[arg(long, default_value_t = false)]
        no_wait: bool,

        #[arg(long, value_parser = parse_table)]
        combine: Option<Table>,
    },
}

#[derive(clap::Args, Debug)]
struct SchemaArgs {
    #[arg(long, default_value_t = config::VOCAB_SIZE)]
    vocab: usize,
    #[arg(long, default_value_t = config::EMBED_DIM)]
    embed: usize,
    #[arg(long, default_value_t = config::HIDDEN_DIM)]
    hidden: usize,
    #[arg(long, default_value_t = config::OUTPUT_DIM)]
    output: usize,
}

impl From<&SchemaArgs> for ParamSchema {
    fn from(a: &SchemaArgs) -> Self {
        ParamSchema::new(a.vocab, a.embed, a.hidden, a.output)
    }
}

fn parse_table(s: &str) -> Result<Table, String> {
    Table::ALL
        .into_iter()
        .find(|t| t.to_string() == s)
        .ok_or_else(|| format!("unknown table '{s}' (expected xor, add or mul)"))
}

fn load_trainer_config(path: Option<&Path>) -> Result<TrainerConfig> {
    let Some(path) = path else {
        return Ok(TrainerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading trainer config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing trainer config {}", path.display()))
}

fn open_store(cli: &Cli) -> Result<ParamStore> {
    let mut cfg = StoreConfig::new(&cli.path, cli.total);
    if let Some(seed) = cli.init_seed {
        cfg = cfg.with_seed(seed);
    }
    ParamStore::open_with(cfg).with_context(|| format!("opening store {}", cli.path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tracing::info!("LUTSTORE v{}", env!("CARGO_PKG_VERSION"));

    let mut store = open_store(&cli)?;
    tracing::info!(
        path = %store.path().display(),
        total = store.total_params(),
        bytes = store.byte_len(),
        reinitialized = store.was_reinitialized(),
        "store ready"
    );

    match &cli.command {
        Command::Init => {
            let view = store.view()?;
            tracing::info!(checksum = format_args!("{:016x}", view.checksum()), "store checksum");
        }

        Command::Inspect { schema } => {
            let schema = ParamSchema::from(schema);
            let views = derive_views(&store, &schema).context("deriving views")?;
            let n = tables().domain();
            for v in views.all() {
                tracing::info!(
                    name = v.name(),
                    offset = v.offset(),
                    shape = ?v.shape(),
                    sum_mod = v.sum_mod(n),
                    "view"
                );
            }
            tracing::info!(
                required = views.required_params(),
                available = store.total_params(),
                "layout"
            );
        }

        Command::Train {
            schema,
            config,
            steps,
            batch,
            offset,
            seed,
            no_wait,
            combine,
        } => {
            let schema = ParamSchema::from(schema);
            let mut cfg = load_trainer_config(config.as_deref())?;
            if let Some(batch) = *batch {
                cfg.batch_size = batch;
            }
            if let Some(offset) = *offset {
                cfg.offsets = OffsetPolicy::Fixed { offset };
            } else if config.is_none() {
                cfg.offsets = OffsetPolicy::Rolling {
                    start: 0,
                    len: schema.required_params().unwrap_or(store.total_params()),
                };
            }
            if seed.is_some() {
                cfg.seed = *seed;
            }
            if *no_wait {
                cfg.write_mode = WriteMode::FireAndForget;
            }
            if let Some(table) = *combine {
                cfg.combine_table = table;
            }

            let report = Trainer::new(&store, schema, cfg)
                .context("building trainer")?
                .train(*steps)
                .context("training")?;

            tracing::info!(
                steps = report.steps,
                values_written = report.values_written,
                elapsed_ms = report.elapsed.as_millis() as u64,
                checksum = format_args!("{:016x}", report.checksum),
                "run complete"
            );
            tracing::info!("Health: {:?}", report.health.status);
            tracing::info!("  Avg step: {:.3} ms", report.health.avg_step_ms);
            tracing::info!("  P99 step: {:.3} ms", report.health.p99_step_ms);
            tracing::info!("  Avg write wait: {:.3} ms", report.health.avg_write_wait_ms);
            store.sync().context("syncing store")?;
        }
    }

    store.close().context("closing store")?;
    tracing::info!("Done.");
    Ok(())
}
