//! Cellar Admin Binary
//!
//! Local administration of a pool directory.

use clap::{Parser, Subcommand};
use cellar::btree::Anchor;
use cellar::{CellarError, Config, Pool};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// Cellar pool administration
#[derive(Parser, Debug)]
#[command(name = "cellar-admin")]
#[command(about = "Inspect and manage a Cellar pool")]
#[command(version)]
struct Args {
    /// Pool directory
    #[arg(short, long, default_value = "./cellar_pool")]
    data_dir: String,

    /// Heap capacity in MB
    #[arg(long, default_value = "256")]
    heap_mb: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the pool if the directory is empty
    Format {
        /// Format version to stamp on a new pool
        #[arg(long)]
        format_version: Option<u32>,
    },

    /// Create a container (random UUID when omitted)
    Create { uuid: Option<Uuid> },

    /// List containers
    List {
        /// Page size
        #[arg(long, default_value = "100")]
        page: usize,
    },

    /// Show a container's usage counters
    Query { uuid: Uuid },

    /// Destroy a container and wait for reclamation
    Destroy { uuid: Uuid },

    /// Upgrade the pool and every container to the current format
    Upgrade,

    /// Show pool statistics
    Stats,

    /// Show or raise a container's epoch boundary
    Boundary {
        uuid: Uuid,

        /// Epoch to raise the boundary to
        #[arg(long)]
        set: Option<u64>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cellar=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("Cellar admin v{}", cellar::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), CellarError> {
    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .heap_capacity(args.heap_mb * 1024 * 1024);
    if let Command::Format {
        format_version: Some(version),
    } = &args.command
    {
        builder = builder.format_version(*version);
    }

    let pool = Pool::open(builder.build())?;

    match args.command {
        Command::Format { .. } => {
            println!("pool {} (format v{})", pool.id(), pool.version());
        }
        Command::Create { uuid } => {
            let id = uuid.unwrap_or_else(Uuid::new_v4);
            pool.create_container(id)?;
            println!("{}", id);
        }
        Command::List { page } => {
            let mut anchor = Anchor::zero();
            loop {
                let (ids, next) = pool.containers(anchor, page.max(1))?;
                if ids.is_empty() {
                    break;
                }
                for id in ids {
                    println!("{}", id);
                }
                anchor = next;
            }
        }
        Command::Query { uuid } => {
            let handle = pool.open_container(uuid)?;
            let info = handle.query()?;
            println!("objects: {}", info.nobjs);
            println!("used:    {}", info.used);
            println!("hae:     {}", info.hae);
            handle.close();
        }
        Command::Destroy { uuid } => {
            pool.destroy_container(uuid)?;
            println!("destroyed {}", uuid);
        }
        Command::Upgrade => {
            pool.upgrade()?;
            println!("pool {} at format v{}", pool.id(), pool.version());
        }
        Command::Stats => {
            let stats = pool.stats()?;
            println!("pool:              {}", stats.id);
            println!("format:            v{}", stats.version);
            println!("containers:        {}", stats.containers);
            println!("gc pending:        {}", stats.gc_pending);
            println!("heap objects:      {}", stats.heap.objects);
            println!(
                "heap used:         {} / {} bytes",
                stats.heap.used_bytes, stats.heap.capacity
            );
            if let Some(blocks) = stats.used_blocks {
                println!("space used:        {} blocks", blocks);
            }
        }
        Command::Boundary { uuid, set } => {
            let handle = pool.open_container(uuid)?;
            if let Some(epoch) = set {
                handle.update_boundary(epoch)?;
            }
            println!("{}", handle.get_boundary()?);
            handle.close();
        }
    }

    pool.close()
}
