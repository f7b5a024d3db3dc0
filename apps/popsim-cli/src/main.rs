use std::path::PathBuf;

use clap::{Parser, Subcommand};
use popsim_balance::{DomainSplitter, SplitConfig, SplitStats, WeightConfig, weigh_units};
use popsim_common::{SpatialUnit, TypeRegistry, UnitId};
use popsim_store::{OwnerDirectory, StoreContainer, load_world, read_units, save_world};
use popsim_world::{BuildParams, DomainFilter, World, WorldBuilder};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "popsim-cli", about = "CLI for popsim world stores")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a synthetic world, partition it and save a store
    Generate {
        /// Store directory to create
        #[arg(short, long)]
        out: PathBuf,
        /// Number of spatial units
        #[arg(short, long, default_value = "16")]
        units: u32,
        /// Number of people
        #[arg(short, long, default_value = "400")]
        people: u32,
        /// RNG seed for deterministic generation
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Number of domains to partition into
        #[arg(short, long, default_value = "4")]
        domains: u32,
        /// Records per chunk
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
    },
    /// Repartition an existing store from its stored activity
    Split {
        /// Store directory
        #[arg(short, long)]
        world: PathBuf,
        /// Number of domains
        #[arg(short, long)]
        domains: u32,
        /// Best-of-N search budget
        #[arg(short, long, default_value = "20")]
        iterations: u32,
        /// RNG seed for centroid search
        #[arg(short, long, default_value = "0")]
        seed: u64,
        /// Weight coefficients, YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run domain-filtered load sessions and report per-rank counts
    Load {
        /// Store directory
        #[arg(short, long)]
        world: PathBuf,
        /// Load only this rank's domain; all ranks sequentially if omitted
        #[arg(short, long)]
        rank: Option<u32>,
        /// Records per decode batch
        #[arg(long, default_value = "4096")]
        chunk_size: usize,
    },
    /// Print store metadata and verify integrity
    Info {
        /// Store directory
        #[arg(short, long)]
        world: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Generate {
            out,
            units,
            people,
            seed,
            domains,
            chunk_size,
        } => {
            println!("Generating world: units={units}, people={people}, seed={seed}");
            let mut world = WorldBuilder::new(BuildParams {
                units,
                people,
                seed,
            })
            .build();
            apply_weights(&mut world, &WeightConfig::default());

            let flat: Vec<SpatialUnit> = world.units.values().cloned().collect();
            let mut config = SplitConfig::new(domains);
            config.seed = seed;
            let outcome = DomainSplitter::split(&flat, &config)?;
            print_stats(&outcome.stats);

            save_world(&world, &outcome.map, &out, chunk_size)?;
            println!(
                "Saved {} entities across {} units to {}",
                world.entity_count(),
                world.units.len(),
                out.display()
            );
        }
        Commands::Split {
            world,
            domains,
            iterations,
            seed,
            config,
        } => {
            let container = StoreContainer::open(&world)?;
            let (mut units, activity) = read_units(&container)?;
            let weight_config = match config {
                Some(path) => WeightConfig::from_yaml_file(path)?,
                None => WeightConfig::default(),
            };
            let unit_ids: Vec<UnitId> = units.keys().copied().collect();
            let weights = weigh_units(&unit_ids, &activity, &weight_config);
            for (id, unit) in units.iter_mut() {
                unit.weight = weights.get(id).copied().unwrap_or(0.0);
            }

            let flat: Vec<SpatialUnit> = units.into_values().collect();
            let mut split_config = SplitConfig::new(domains);
            split_config.iterations = iterations;
            split_config.seed = seed;
            let outcome = DomainSplitter::split(&flat, &split_config)?;
            print_stats(&outcome.stats);

            container.write_partition_map(&outcome.map)?;
            println!(
                "Rewrote membership index: {} units over {} domains",
                outcome.map.unit_count(),
                outcome.map.domain_count()
            );
        }
        Commands::Load {
            world,
            rank,
            chunk_size,
        } => {
            let container = StoreContainer::open(&world)?;
            let map = container.read_partition_map()?;
            let owners = OwnerDirectory::scan(&container, &map)?;
            drop(container);

            let ranks: Vec<_> = match rank {
                Some(r) => vec![popsim_common::DomainId(r)],
                None => map.domains().collect(),
            };
            for domain in ranks {
                let mut registry = TypeRegistry::new();
                let loaded = load_world(
                    &world,
                    chunk_size,
                    &DomainFilter::single(domain),
                    &owners,
                    &mut registry,
                )?;
                let census = loaded.reference_census();
                println!(
                    "{domain}: entities={}, local refs={}, external stubs={}, absent={}",
                    loaded.entity_count(),
                    census.local,
                    census.external,
                    census.absent
                );
            }
        }
        Commands::Info { world } => {
            let container = StoreContainer::open(&world)?;
            println!("popsim-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("schema: v{}", container.meta().schema_version);
            for (group, meta) in &container.meta().groups {
                println!(
                    "group {group}: {} records in {} chunks",
                    meta.records, meta.chunks
                );
            }
            match container.read_partition_map() {
                Ok(map) => println!(
                    "partition: {} units over {} domains",
                    map.unit_count(),
                    map.domain_count()
                ),
                Err(_) => println!("partition: none"),
            }
            container.verify_integrity()?;
            println!("integrity: OK");
        }
    }

    Ok(())
}

fn print_stats(stats: &SplitStats) {
    println!(
        "Split: ratio {:.4} -> {:.4} (best round {} of {})",
        stats.initial_ratio, stats.best_ratio, stats.best_round, stats.rounds
    );
}

// The builder leaves unit weights at zero; derive them from live activity.
fn apply_weights(world: &mut World, config: &WeightConfig) {
    let activity = world.activity_by_unit();
    let unit_ids: Vec<UnitId> = world.units.keys().copied().collect();
    let weights = weigh_units(&unit_ids, &activity, config);
    for (id, unit) in world.units.iter_mut() {
        unit.weight = weights.get(id).copied().unwrap_or(0.0);
    }
}
