//! Binary entrypoint for the chestlocator CLI.
//!
//! Commands:
//! - `init` - write a starter `chestlocator.toml`
//! - `import [--region-dir <dir>] [--fresh] [--prune]` - scan region files into the registry
//! - `find <x> <y> <z>` - show the container at a coordinate
//! - `search <item> [--limit <n>]` - list containers holding an item
//! - `list` - list every known container
//! - `delete <x> <y> <z>` - forget the container at a coordinate
//! - `stats` - record and slot totals
//!
//! See the library crate docs for module-level details: `chestlocator::`.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use tokio::sync::Semaphore;

use chestlocator::config::Config;
use chestlocator::metrics;
use chestlocator::registry::Registry;
use chestlocator::validation::parse_coordinate;
use chestlocator::world::scanner::{find_region_files, normalize_id};
use chestlocator::world::{import_region, RegionImport, ScanOptions};

#[derive(Parser)]
#[command(name = "chestlocator")]
#[command(about = "Index storage containers and their contents from world region files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "chestlocator.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Scan region files and upsert every storage container found
    Import {
        /// Region directory (overrides scan.region_dir)
        #[arg(short, long)]
        region_dir: Option<String>,
        /// Clear the registry before importing
        #[arg(long)]
        fresh: bool,
        /// Delete containers that are no longer present in their region file
        #[arg(long)]
        prune: bool,
    },
    /// Show the container at a coordinate (`x y z` or `x,y,z`)
    Find {
        #[arg(num_args = 1..=3, allow_negative_numbers = true, required = true)]
        coordinate: Vec<String>,
    },
    /// List containers holding an item (bare ids get the `minecraft:` namespace)
    Search {
        item: String,
        /// Stop after this many matches
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List every container
    List,
    /// Remove the container at a coordinate along with its inventory
    Delete {
        #[arg(num_args = 1..=3, allow_negative_numbers = true, required = true)]
        coordinate: Vec<String>,
    },
    /// Show record and slot totals
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&Config::default(), cli.verbose);
        if Path::new(&cli.config).exists() {
            return Err(anyhow!("{} already exists", cli.config));
        }
        Config::create_default(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config);
        return Ok(());
    }

    let config = if Path::new(&cli.config).exists() {
        Config::load(&cli.config).await?
    } else {
        Config::default()
    };
    init_logging(&config, cli.verbose);
    if !Path::new(&cli.config).exists() {
        warn!("{} not found, using built-in defaults", cli.config);
    }

    let registry = Registry::open_with_config(&config.registry)
        .with_context(|| format!("opening registry at {}", config.registry.db_path))?;

    match cli.command {
        Commands::Init => {}
        Commands::Import {
            region_dir,
            fresh,
            prune,
        } => {
            let dir = PathBuf::from(region_dir.unwrap_or_else(|| config.scan.region_dir.clone()));
            let options = ScanOptions::from_config(&config.scan).with_prune(prune);
            if fresh {
                registry.clear()?;
                info!("registry cleared for fresh import");
            }
            run_import(Arc::new(registry), &dir, options, config.scan.workers).await?;
        }
        Commands::Find { coordinate } => {
            let at = parse_coordinate(&coordinate.join(" "))?;
            match registry.find_by_coordinate(at)? {
                Some(found) => {
                    println!(
                        "{} {} (id {}, {} items)",
                        found.record.kind(),
                        found.record.location,
                        found.record.id,
                        found.total_items()
                    );
                    if let Some(region) = &found.record.metadata.region_file {
                        println!("  region: {}", region);
                    }
                    for slot in &found.slots {
                        println!(
                            "  slot {:>3}: {} x{} ({})",
                            slot.slot, slot.display_name, slot.count, slot.item_id
                        );
                    }
                }
                None => println!("No storage at {}", at),
            }
        }
        Commands::Search { item, limit } => {
            let item_id = normalize_id(&item);
            let mut shown = 0usize;
            for hit in registry.find_by_item(&item_id) {
                if limit.is_some_and(|max| shown >= max) {
                    break;
                }
                let (storage, slot) = hit?;
                println!(
                    "{} {} slot {}: {} x{}",
                    storage.kind(),
                    storage.location,
                    slot.slot,
                    slot.display_name,
                    slot.count
                );
                shown += 1;
            }
            if shown == 0 {
                println!("No storage holds {}", item_id);
            }
        }
        Commands::List => {
            for record in registry.storages() {
                let record = record?;
                println!("{} {}", record.kind(), record.location);
            }
        }
        Commands::Delete { coordinate } => {
            let at = parse_coordinate(&coordinate.join(" "))?;
            let removed = match registry.find_by_coordinate(at)? {
                Some(found) => registry.delete_storage(found.record.id)?,
                None => false,
            };
            if removed {
                println!("Deleted storage at {}", at);
            } else {
                println!("No storage at {}", at);
            }
        }
        Commands::Stats => {
            let stats = registry.stats();
            println!("Storages: {}", stats.storages);
            println!("Slots: {}", stats.slots);
            println!("Indexed items: {}", stats.indexed_items);
        }
    }

    Ok(())
}

/// Import every region file under `dir`, at most `workers` at a time.
async fn run_import(
    registry: Arc<Registry>,
    dir: &Path,
    options: ScanOptions,
    workers: usize,
) -> Result<()> {
    let files = find_region_files(dir)
        .with_context(|| format!("reading region directory {}", dir.display()))?;
    if files.is_empty() {
        warn!("no region files found in {}", dir.display());
        return Ok(());
    }
    info!("importing {} region files from {}", files.len(), dir.display());

    let options = Arc::new(options);
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = Vec::with_capacity(files.len());
    for path in files {
        let permit = semaphore.clone().acquire_owned().await?;
        let registry = registry.clone();
        let options = options.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = import_region(&registry, &path, &options);
            (path, result)
        }));
    }

    let mut total = RegionImport::default();
    let mut failed_files = 0u64;
    for task in tasks {
        let (path, result) = task.await?;
        match result {
            Ok(report) => {
                total.chunks += report.chunks;
                total.chunk_errors += report.chunk_errors;
                total.storages_imported += report.storages_imported;
                total.storage_errors += report.storage_errors;
                total.slots_written += report.slots_written;
                total.pruned += report.pruned;
            }
            Err(err) => {
                warn!("{}: import failed: {}", path.display(), err);
                failed_files += 1;
            }
        }
    }
    registry.flush()?;

    let mut per_region: Vec<_> = metrics::region_counters_snapshot().into_iter().collect();
    per_region.sort_by(|a, b| a.0.cmp(&b.0));
    for (region, counter) in per_region {
        debug!(
            "{}: chunks={} chunk_errors={} storages={} storage_errors={}",
            region, counter.chunks, counter.chunk_errors, counter.storages, counter.storage_errors
        );
    }

    let counters = metrics::snapshot();
    println!(
        "Imported {} storages ({} slots) from {} chunks",
        total.storages_imported, total.slots_written, total.chunks
    );
    println!(
        "Created {}, updated {}, coordinate races {}, pruned {}",
        counters.storages_created, counters.storages_updated, counters.upsert_races, total.pruned
    );
    if total.chunk_errors + total.storage_errors + failed_files > 0 {
        println!(
            "Skipped {} chunks, {} storages, {} region files (see log)",
            total.chunk_errors, total.storage_errors, failed_files
        );
    }
    Ok(())
}

fn init_logging(config: &Config, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from CLI verbosity overrides config
    let base_level = match verbosity {
        0 => config.logging.level_filter(),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled is chatty at debug
    builder.filter_module("sled", log::LevelFilter::Warn);
    if let Some(ref file) = config.logging.file {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
        {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Tee to the console only when attached to a terminal.
            let is_tty = atty::is(atty::Stream::Stderr);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }

                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
            let _ = builder.try_init();
            return;
        }
    }
    builder.format(|fmt, record| {
        let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
    });
    let _ = builder.try_init();
}
