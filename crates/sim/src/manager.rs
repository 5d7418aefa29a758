//! Box-partitioned simulation driver: worker pool, refill policy and the
//! aggregation phase.

use crate::aggregate::{ApplyReport, apply_flows};
use crate::partition::partition_into_boxes;
use crate::scheduler::{BoxTask, TaskScheduler};
use crate::water::{Flow, WorkerContext, process_box};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use terrarium_common::{ConfigError, Region, SimConfig};
use terrarium_kernel::{RepositoryEvent, TerrainRepository, VoxelGrid};

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("world {width}x{height}x{depth} yields no simulation boxes")]
    NoBoxes { width: i32, height: i32, depth: i32 },
    #[error("{count} worker threads are already running")]
    WorkersRunning { count: usize },
    #[error("failed to spawn worker thread: {reason}")]
    ThreadSpawn { reason: String },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Default)]
struct Counters {
    boxes_processed: AtomicU64,
    flows_emitted: AtomicU64,
    discarded: AtomicU64,
}

/// Result of one aggregation pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregateReport {
    /// Worker result lists drained from the queue.
    pub batches: usize,
    pub flows: usize,
    pub apply: ApplyReport,
    /// Corruption reports surfaced while draining deferred requests.
    pub corruption: Vec<RepositoryEvent>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub aggregate: AggregateReport,
    /// Boxes enqueued by the refill policy this tick.
    pub refilled: usize,
    /// Tasks pending after the tick.
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub boxes: usize,
    pub workers: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub boxes_processed: u64,
    pub flows_emitted: u64,
    pub discarded: u64,
    pub ticks: u64,
    pub cursor: usize,
}

/// Everything one worker thread needs, cloned out of the manager.
struct WorkerShared {
    config: Arc<SimConfig>,
    repo: Arc<TerrainRepository>,
    world: Region,
    boxes: Arc<Vec<Region>>,
    scheduler: Arc<TaskScheduler>,
    results: Sender<Vec<Flow>>,
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

pub struct SimulationManager {
    config: Arc<SimConfig>,
    repo: Arc<TerrainRepository>,
    world: Region,
    boxes: Arc<Vec<Region>>,
    scheduler: Arc<TaskScheduler>,
    results_tx: Sender<Vec<Flow>>,
    results_rx: Receiver<Vec<Flow>>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
    inline_ctx: WorkerContext,
    cursor: usize,
    ticks: u64,
}

impl SimulationManager {
    /// Partition a `width x height x depth` world backed by `repo`.
    pub fn new(
        repo: Arc<TerrainRepository>,
        width: i32,
        height: i32,
        depth: i32,
        config: SimConfig,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let boxes = partition_into_boxes(width, height, depth, config.box_size);
        if boxes.is_empty() {
            return Err(SimError::NoBoxes {
                width,
                height,
                depth,
            });
        }
        tracing::info!(
            width,
            height,
            depth,
            box_size = config.box_size,
            boxes = boxes.len(),
            "simulation partitioned"
        );
        let (results_tx, results_rx) = mpsc::channel();
        Ok(Self {
            config: Arc::new(config),
            repo,
            world: Region::from_dims(width, height, depth),
            boxes: Arc::new(boxes),
            scheduler: Arc::new(TaskScheduler::new()),
            results_tx,
            results_rx,
            stop: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
            counters: Arc::new(Counters::default()),
            inline_ctx: WorkerContext::new(usize::MAX),
            cursor: 0,
            ticks: 0,
        })
    }

    /// Simulate the terrain of `grid` within its bounds.
    pub fn for_grid(grid: &VoxelGrid, config: SimConfig) -> Result<Self, SimError> {
        Self::new(
            Arc::clone(grid.terrain()),
            grid.width(),
            grid.height(),
            grid.depth(),
            config,
        )
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<TerrainRepository> {
        &self.repo
    }

    pub fn world(&self) -> Region {
        self.world
    }

    pub fn boxes(&self) -> &[Region] {
        &self.boxes
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    // --- Worker pool ---

    /// Spawn `config.worker_threads` workers.
    pub fn start_worker_threads(&mut self) -> Result<(), SimError> {
        if !self.workers.is_empty() {
            return Err(SimError::WorkersRunning {
                count: self.workers.len(),
            });
        }
        self.stop.store(false, Ordering::SeqCst);

        for id in 0..self.config.worker_threads {
            let shared = WorkerShared {
                config: Arc::clone(&self.config),
                repo: Arc::clone(&self.repo),
                world: self.world,
                boxes: Arc::clone(&self.boxes),
                scheduler: Arc::clone(&self.scheduler),
                results: self.results_tx.clone(),
                stop: Arc::clone(&self.stop),
                counters: Arc::clone(&self.counters),
            };
            let spawned = thread::Builder::new()
                .name(format!("terrarium-sim-{id}"))
                .spawn(move || worker_loop(id, shared));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(err) => {
                    self.stop_worker_threads();
                    return Err(SimError::ThreadSpawn {
                        reason: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(workers = self.workers.len(), "simulation workers started");
        Ok(())
    }

    /// Raise the stop flag, wake every parked worker and join them all.
    /// Returns how many threads were joined.
    pub fn stop_worker_threads(&mut self) -> usize {
        if self.workers.is_empty() {
            return 0;
        }
        self.stop.store(true, Ordering::SeqCst);
        self.scheduler.wake_all();
        let mut joined = 0;
        for handle in self.workers.drain(..) {
            match handle.join() {
                Ok(()) => joined += 1,
                Err(_) => tracing::warn!("simulation worker panicked"),
            }
        }
        tracing::info!(joined, "simulation workers stopped");
        joined
    }

    /// Block until every queued task has been processed.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    // --- Scheduling ---

    pub fn push_task(&self, task: BoxTask) {
        self.scheduler.push(task);
    }

    /// Enqueue a round-robin slice of `fraction` of all boxes (at least one),
    /// starting at the rotating cursor.
    pub fn populate_scheduler_with_subset(&mut self, fraction: f32, sun_intensity: f32) -> usize {
        let n = self.boxes.len();
        let count = ((n as f32 * fraction) as usize).clamp(1, n);
        let start = self.cursor;
        self.cursor = (start + count) % n;
        self.scheduler.push_many((0..count).map(|i| BoxTask {
            box_index: (start + i) % n,
            sun_intensity,
        }))
    }

    /// Enqueue every box once, in partition order.
    pub fn schedule_all(&self, sun_intensity: f32) -> usize {
        self.scheduler
            .push_many((0..self.boxes.len()).map(|box_index| BoxTask {
                box_index,
                sun_intensity,
            }))
    }

    fn needs_refill(&self) -> bool {
        let pending = self.scheduler.len();
        pending == 0 || (pending as f32) < self.boxes.len() as f32 * self.config.refill_threshold
    }

    // --- Aggregation ---

    /// Drain the result queue and apply every flow under one write lock.
    pub fn apply_pending_results(&self) -> AggregateReport {
        let mut report = AggregateReport::default();
        let mut flows = Vec::new();
        while let Ok(batch) = self.results_rx.try_recv() {
            report.batches += 1;
            flows.extend(batch);
        }
        report.flows = flows.len();
        if !flows.is_empty() {
            let mut guard = self.repo.lock_terrain_grid();
            report.apply = apply_flows(&mut guard, &flows, &self.config);
        }
        report.corruption = self.repo.process_deferred();
        for event in &report.corruption {
            tracing::warn!(?event, "terrain corruption reported during aggregation");
        }
        report
    }

    /// One manager tick: aggregate finished work, then top up the queue.
    pub fn process_simulation_tick(&mut self, sun_intensity: f32) -> TickReport {
        self.ticks += 1;
        let _span = tracing::info_span!("sim_tick", tick = self.ticks).entered();

        let aggregate = self.apply_pending_results();
        let refilled = if self.needs_refill() {
            self.populate_scheduler_with_subset(self.config.refill_fraction, sun_intensity)
        } else {
            0
        };
        let report = TickReport {
            tick: self.ticks,
            aggregate,
            refilled,
            pending: self.scheduler.len(),
        };
        tracing::debug!(
            flows = report.aggregate.flows,
            refilled = report.refilled,
            pending = report.pending,
            "tick complete"
        );
        report
    }

    /// Process every box on the calling thread and apply the result.
    /// Deterministic; does not touch the task queue.
    pub fn process_all_boxes_inline(&mut self, sun_intensity: f32) -> AggregateReport {
        let _span = tracing::debug_span!("sim_inline", boxes = self.boxes.len()).entered();
        let mut flows = Vec::new();
        {
            let grid = self.repo.read_terrain_grid();
            for region in self.boxes.iter() {
                process_box(
                    &mut self.inline_ctx,
                    grid.store(),
                    region,
                    sun_intensity,
                    &self.config,
                    &self.world,
                );
                flows.extend(self.inline_ctx.take_flows());
            }
        }
        self.counters
            .boxes_processed
            .fetch_add(self.boxes.len() as u64, Ordering::Relaxed);
        self.counters
            .flows_emitted
            .fetch_add(flows.len() as u64, Ordering::Relaxed);

        let mut report = AggregateReport {
            batches: 1,
            flows: flows.len(),
            ..AggregateReport::default()
        };
        if !flows.is_empty() {
            let mut guard = self.repo.lock_terrain_grid();
            report.apply = apply_flows(&mut guard, &flows, &self.config);
        }
        report.corruption = self.repo.process_deferred();
        report
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            boxes: self.boxes.len(),
            workers: self.workers.len(),
            pending: self.scheduler.len(),
            in_progress: self.scheduler.in_progress(),
            boxes_processed: self.counters.boxes_processed.load(Ordering::Relaxed),
            flows_emitted: self.counters.flows_emitted.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
            ticks: self.ticks,
            cursor: self.cursor,
        }
    }
}

impl Drop for SimulationManager {
    fn drop(&mut self) {
        self.stop_worker_threads();
    }
}

fn worker_loop(id: usize, shared: WorkerShared) {
    let mut ctx = WorkerContext::new(id);
    let idle_wait = Duration::from_millis(shared.config.idle_wait_ms);
    tracing::debug!(worker = id, "worker started");

    while !shared.stop.load(Ordering::SeqCst) {
        let Some(task) = shared.scheduler.wait_for_task(idle_wait) else {
            continue;
        };
        let Some(region) = shared.boxes.get(task.box_index) else {
            tracing::trace!(worker = id, box_index = task.box_index, "box index out of range; discarded");
            shared.counters.discarded.fetch_add(1, Ordering::Relaxed);
            shared.scheduler.finish();
            continue;
        };

        let grid = shared.repo.read_terrain_grid();
        let emitted = process_box(
            &mut ctx,
            grid.store(),
            region,
            task.sun_intensity,
            &shared.config,
            &shared.world,
        );
        if emitted > 0 && shared.results.send(ctx.take_flows()).is_err() {
            tracing::warn!(worker = id, "result queue closed; dropping flows");
        }
        drop(grid);

        shared.counters.boxes_processed.fetch_add(1, Ordering::Relaxed);
        shared
            .counters
            .flows_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        shared.scheduler.finish();
    }

    tracing::debug!(
        worker = id,
        boxes = ctx.boxes_processed(),
        rebinds = ctx.rebinds(),
        "worker stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrarium_common::{EntityType, TerrainKind, VoxelCoord};

    fn c(x: i32, y: i32, z: i32) -> VoxelCoord {
        VoxelCoord::new(x, y, z)
    }

    fn config(workers: usize) -> SimConfig {
        SimConfig {
            box_size: 8,
            worker_threads: workers,
            ..SimConfig::default()
        }
    }

    fn repo_with_water(at: VoxelCoord, amount: i32) -> Arc<TerrainRepository> {
        let repo = Arc::new(TerrainRepository::new());
        {
            let mut g = repo.lock_terrain_grid();
            g.mark_terrain(at, EntityType::terrain(TerrainKind::Water));
            g.set_water_matter(at, amount);
        }
        repo
    }

    fn water(repo: &TerrainRepository, at: VoxelCoord) -> i32 {
        repo.read_terrain_grid().get_water_matter(at)
    }

    #[test]
    fn single_tick_inline_moves_half() {
        let repo = repo_with_water(c(5, 5, 4), 10);
        let mut sim = SimulationManager::new(Arc::clone(&repo), 16, 16, 16, config(1)).unwrap();
        let report = sim.process_all_boxes_inline(0.0);
        assert_eq!(report.flows, 1);
        assert_eq!(report.apply.applied, 1);
        assert_eq!(water(&repo, c(5, 5, 4)), 5);
        assert_eq!(water(&repo, c(5, 5, 3)), 5);
    }

    #[test]
    fn single_tick_with_workers_moves_half() {
        let repo = repo_with_water(c(5, 5, 4), 10);
        let mut sim = SimulationManager::new(Arc::clone(&repo), 16, 16, 16, config(3)).unwrap();
        sim.start_worker_threads().unwrap();
        assert_eq!(sim.schedule_all(0.0), 8);
        assert!(sim.wait_until_idle(Duration::from_secs(10)));

        let report = sim.apply_pending_results();
        assert_eq!(report.batches, 1);
        assert_eq!(report.flows, 1);
        assert_eq!(water(&repo, c(5, 5, 4)), 5);
        assert_eq!(water(&repo, c(5, 5, 3)), 5);

        assert_eq!(sim.stop_worker_threads(), 3);
        assert_eq!(sim.stats().boxes_processed, 8);
    }

    #[test]
    fn starting_twice_is_rejected() {
        let repo = Arc::new(TerrainRepository::new());
        let mut sim = SimulationManager::new(repo, 8, 8, 8, config(2)).unwrap();
        sim.start_worker_threads().unwrap();
        assert!(matches!(
            sim.start_worker_threads(),
            Err(SimError::WorkersRunning { count: 2 })
        ));
        assert_eq!(sim.stop_worker_threads(), 2);
        assert!(!sim.is_running());
        sim.start_worker_threads().unwrap();
    }

    #[test]
    fn out_of_range_box_is_discarded() {
        let repo = Arc::new(TerrainRepository::new());
        let mut sim = SimulationManager::new(repo, 8, 8, 8, config(1)).unwrap();
        sim.start_worker_threads().unwrap();
        sim.push_task(BoxTask {
            box_index: 999,
            sun_intensity: 0.0,
        });
        assert!(sim.wait_until_idle(Duration::from_secs(10)));
        assert_eq!(sim.stats().discarded, 1);
        assert_eq!(sim.stats().boxes_processed, 0);
    }

    #[test]
    fn refill_rotates_through_all_boxes() {
        let repo = Arc::new(TerrainRepository::new());
        let cfg = SimConfig {
            box_size: 1,
            worker_threads: 1,
            ..SimConfig::default()
        };
        let mut sim = SimulationManager::new(repo, 10, 1, 1, cfg).unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            let report = sim.process_simulation_tick(0.0);
            assert_eq!(report.refilled, 3);
            while let Some(task) = sim.scheduler().try_pop() {
                seen.push(task.box_index);
                sim.scheduler().finish();
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 1]);
        assert_eq!(sim.stats().cursor, 2);
        assert_eq!(sim.stats().ticks, 4);
    }

    #[test]
    fn refill_waits_while_queue_is_full_enough() {
        let repo = Arc::new(TerrainRepository::new());
        let cfg = SimConfig {
            box_size: 1,
            worker_threads: 1,
            ..SimConfig::default()
        };
        let mut sim = SimulationManager::new(repo, 10, 1, 1, cfg).unwrap();
        assert_eq!(sim.process_simulation_tick(0.0).refilled, 3);
        let second = sim.process_simulation_tick(0.0);
        assert_eq!(second.refilled, 0);
        assert_eq!(second.pending, 3);
    }

    #[test]
    fn subset_is_at_least_one_box() {
        let repo = Arc::new(TerrainRepository::new());
        let mut sim = SimulationManager::new(repo, 8, 8, 8, config(1)).unwrap();
        assert_eq!(sim.populate_scheduler_with_subset(0.01, 0.0), 1);
        assert_eq!(sim.populate_scheduler_with_subset(1.0, 0.0), 1);
    }

    #[test]
    fn water_is_conserved_across_ticks() {
        let repo = Arc::new(TerrainRepository::new());
        {
            let mut g = repo.lock_terrain_grid();
            for x in 0..6 {
                for z in 3..9 {
                    let at = c(x, 2, z);
                    g.mark_terrain(at, EntityType::terrain(TerrainKind::Water));
                    g.set_water_matter(at, 7 * (x + z));
                }
            }
            g.set_vapor_matter(c(1, 1, 1), 40);
        }
        let before = repo.read_terrain_grid().matter_totals().total();
        let mut sim = SimulationManager::new(Arc::clone(&repo), 12, 12, 12, config(1)).unwrap();
        for tick in 0..20 {
            sim.process_all_boxes_inline(if tick % 2 == 0 { 1.0 } else { 0.0 });
        }
        let after = repo.read_terrain_grid().matter_totals();
        assert_eq!(after.total(), before);
        assert!(after.vapor > 0);
    }

    #[test]
    fn empty_world_is_rejected() {
        let repo = Arc::new(TerrainRepository::new());
        assert!(matches!(
            SimulationManager::new(repo, 0, 4, 4, config(1)),
            Err(SimError::NoBoxes { .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let repo = Arc::new(TerrainRepository::new());
        let cfg = SimConfig {
            refill_fraction: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            SimulationManager::new(repo, 4, 4, 4, cfg),
            Err(SimError::Config(_))
        ));
    }
}
