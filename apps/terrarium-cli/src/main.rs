use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use terrarium_common::{EntityType, MatterState, SimConfig, TerrainKind, VoxelCoord};
use terrarium_kernel::VoxelGrid;
use terrarium_persist::{RegionSnapshot, WorldStore};
use terrarium_sim::SimulationManager;

#[derive(Parser)]
#[command(name = "terrarium-cli", about = "CLI for the terrarium voxel simulation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Seed a water column and run the box simulation
    Simulate {
        #[arg(long, default_value = "64")]
        width: i32,
        #[arg(long, default_value = "64")]
        height: i32,
        #[arg(long, default_value = "32")]
        depth: i32,
        /// Number of manager ticks to run
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Worker threads (overrides the config file)
        #[arg(long)]
        threads: Option<usize>,
        /// Sun intensity passed to every scheduled box
        #[arg(long, default_value = "0.0")]
        sun: f32,
        /// JSON simulation config
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Capture a sample world into a file-backed store and verify it
    Snapshot {
        /// Store directory
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn seed_world(grid: &VoxelGrid) -> i64 {
    let cx = grid.width() / 2;
    let cy = grid.height() / 2;
    let mut g = grid.terrain().lock_terrain_grid();
    for x in 0..grid.width() {
        for y in 0..grid.height() {
            let floor = VoxelCoord::new(x, y, 0);
            g.mark_terrain(floor, EntityType::terrain(TerrainKind::Grass));
            g.set_terrain_matter(floor, 100);
        }
    }
    for z in grid.depth() / 2..grid.depth() {
        let c = VoxelCoord::new(cx, cy, z);
        g.mark_terrain(c, EntityType::terrain(TerrainKind::Water));
        g.set_matter_state(c, MatterState::Liquid);
        g.set_water_matter(c, 80);
    }
    g.matter_totals().total()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("terrarium-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", terrarium_common::crate_info());
            println!("store: {}", terrarium_store::crate_info());
            println!("ecs: {}", terrarium_ecs::crate_info());
            println!("kernel: {}", terrarium_kernel::crate_info());
            println!("sim: {}", terrarium_sim::crate_info());
            println!("persist: {}", terrarium_persist::crate_info());
            let defaults = SimConfig::default();
            println!("default config:\n{}", defaults.to_json_pretty()?);
        }
        Commands::Simulate {
            width,
            height,
            depth,
            ticks,
            threads,
            sun,
            config,
        } => {
            let mut cfg = match &config {
                Some(path) => SimConfig::from_json_file(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => SimConfig::default(),
            };
            if let Some(threads) = threads {
                cfg.worker_threads = threads;
            }

            let grid = VoxelGrid::new(width, height, depth);
            let before = seed_world(&grid);
            println!(
                "Simulate: {width}x{height}x{depth}, box={}, workers={}, ticks={ticks}, sun={sun}",
                cfg.box_size, cfg.worker_threads
            );

            let mut sim = SimulationManager::for_grid(&grid, cfg)?;
            sim.start_worker_threads()?;
            let mut flows = 0;
            for _ in 0..ticks {
                let report = sim.process_simulation_tick(sun);
                flows += report.aggregate.flows;
                sim.wait_until_idle(Duration::from_secs(5));
            }
            flows += sim.apply_pending_results().flows;
            sim.stop_worker_threads();

            let totals = grid.terrain().read_terrain_grid().matter_totals();
            let stats = sim.stats();
            println!(
                "Boxes: {} processed over {} ticks, {} discarded",
                stats.boxes_processed, stats.ticks, stats.discarded
            );
            println!("Flows applied: {flows}");
            println!(
                "Matter: terrain={}, water={}, vapor={}, biomass={}",
                totals.terrain, totals.water, totals.vapor, totals.biomass
            );
            println!(
                "Conservation: {}",
                if totals.total() == before { "OK" } else { "MISMATCH" }
            );
        }
        Commands::Snapshot { out } => {
            let grid = VoxelGrid::new(32, 32, 16);
            seed_world(&grid);
            let snap = RegionSnapshot::capture(&grid, grid.bounds())?;
            println!(
                "Snapshot: voxels={}, hash={:#x}, valid={}",
                snap.len(),
                snap.hash,
                snap.verify()
            );

            let mut store = WorldStore::open(&out, grid.width(), grid.height(), grid.depth())
                .with_context(|| format!("opening store {}", out.display()))?;
            let index = store.save_region(&snap)?;
            store.verify_integrity()?;
            println!("Saved region {index} to {}", out.display());

            let loaded = store.load_latest()?;
            let mut restored = VoxelGrid::new(grid.width(), grid.height(), grid.depth());
            loaded.restore(&mut restored)?;
            let original = grid.terrain().read_terrain_grid().matter_totals();
            let roundtrip = restored.terrain().read_terrain_grid().matter_totals();
            println!(
                "Restore: {}",
                if original == roundtrip { "OK" } else { "MISMATCH" }
            );
        }
    }

    Ok(())
}
