//! SLAM worker - single thread owning the estimator.
//!
//! Inputs arrive on a bounded crossbeam channel as [`SlamInput`]. Two
//! approximate-time synchronizers (pose × vision, pose × lidar) pair them up
//! and every emitted pair runs exactly one cycle. Cycle outputs leave on a
//! second bounded channel.
//!
//! Neither side ever blocks the other: a full input queue drops the message
//! at the sender, a full output queue drops the cycle output in the worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::error::{SlamError, SlamResult};
use crate::live_status::LiveStatus;
use crate::slam::{CycleOutput, SlamConfig, TrackSlam};
use crate::sync::ApproxTimeSync;
use crate::types::{DetectionBatch, DetectionSource, PoseStamped, TrackMap};

/// Message accepted by the worker.
#[derive(Clone, Debug)]
pub enum SlamInput {
    Pose(PoseStamped),
    Vision(DetectionBatch),
    Lidar(DetectionBatch),
    Shutdown,
}

/// Synchronizers plus estimator, with no threading.
///
/// The worker thread drives one of these; recorded-session replay drives one
/// directly so every message is processed.
pub struct SlamPipeline {
    slam: TrackSlam,
    vision_sync: ApproxTimeSync<PoseStamped, DetectionBatch>,
    lidar_sync: ApproxTimeSync<PoseStamped, DetectionBatch>,
    status: LiveStatus,
}

impl SlamPipeline {
    pub fn new(config: SlamConfig) -> SlamResult<Self> {
        let vision_sync = ApproxTimeSync::new(config.sync_queue_size, config.sync_slop);
        let lidar_sync = ApproxTimeSync::new(config.sync_queue_size, config.sync_slop);
        Ok(Self {
            slam: TrackSlam::new(config)?,
            vision_sync,
            lidar_sync,
            status: LiveStatus::new(),
        })
    }

    pub fn slam(&self) -> &TrackSlam {
        &self.slam
    }

    pub fn status(&self) -> &LiveStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut LiveStatus {
        &mut self.status
    }

    /// Feed one message; returns the outputs of any cycles it completed.
    /// Failed cycles are logged and counted, never propagated.
    pub fn handle(&mut self, input: SlamInput) -> Vec<CycleOutput> {
        let mut pairs = Vec::with_capacity(2);
        match input {
            SlamInput::Pose(pose) => {
                if let Some((p, batch)) = self.vision_sync.push_left(pose.clone()) {
                    pairs.push((p, batch, DetectionSource::Vision));
                }
                if let Some((p, batch)) = self.lidar_sync.push_left(pose) {
                    pairs.push((p, batch, DetectionSource::Lidar));
                }
            }
            SlamInput::Vision(batch) => {
                if let Some((p, batch)) = self.vision_sync.push_right(batch) {
                    pairs.push((p, batch, DetectionSource::Vision));
                }
            }
            SlamInput::Lidar(batch) => {
                if let Some((p, batch)) = self.lidar_sync.push_right(batch) {
                    pairs.push((p, batch, DetectionSource::Lidar));
                }
            }
            SlamInput::Shutdown => {}
        }

        let mut outputs = Vec::with_capacity(pairs.len());
        for (pose, batch, source) in pairs {
            match self.slam.process_cycle(&pose, &batch, source) {
                Ok(output) => {
                    self.status.record_cycle(&output);
                    outputs.push(output);
                }
                Err(e) => {
                    log::warn!("Cycle at t={:.3} rejected: {}", pose.timestamp, e);
                    self.status.record_failure();
                }
            }
        }
        outputs
    }

    /// Messages dropped inside the synchronizers
    pub fn sync_dropped(&self) -> u64 {
        self.vision_sync.dropped() + self.lidar_sync.dropped()
    }

    pub fn finish(mut self) -> WorkerSummary {
        self.status.dropped_inputs = self.sync_dropped();
        let stamp = self.status.last_stamp;
        WorkerSummary {
            cycles: self.slam.cycles(),
            outputs_dropped: 0,
            final_map: self.slam.global_map(stamp),
            status: self.status,
        }
    }
}

/// What the worker leaves behind when it stops.
#[derive(Clone, Debug)]
pub struct WorkerSummary {
    pub cycles: u64,
    /// Cycle outputs discarded because the output queue was full
    pub outputs_dropped: u64,
    pub final_map: TrackMap,
    pub status: LiveStatus,
}

#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub input_capacity: usize,
    pub output_capacity: usize,
    /// Write the live status here every `status_every` cycles
    pub status_path: Option<String>,
    pub status_every: u64,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            input_capacity: 256,
            output_capacity: 64,
            status_path: None,
            status_every: 10,
        }
    }
}

/// Cloneable sender side of the worker.
#[derive(Clone)]
pub struct SlamHandle {
    tx: Sender<SlamInput>,
    dropped: Arc<AtomicU64>,
}

impl SlamHandle {
    /// Non-blocking submit. `Ok(false)` means the queue was full and the
    /// message was dropped.
    pub fn submit(&self, input: SlamInput) -> SlamResult<bool> {
        match self.tx.try_send(input) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 100 == 1 {
                    log::warn!("SLAM input queue full, {} messages dropped so far", n);
                }
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(SlamError::WorkerStopped),
        }
    }

    pub fn pose(&self, pose: PoseStamped) -> SlamResult<bool> {
        self.submit(SlamInput::Pose(pose))
    }

    pub fn vision(&self, batch: DetectionBatch) -> SlamResult<bool> {
        self.submit(SlamInput::Vision(batch))
    }

    pub fn lidar(&self, batch: DetectionBatch) -> SlamResult<bool> {
        self.submit(SlamInput::Lidar(batch))
    }

    /// Ask the worker to stop. Uses a blocking send so the request is never dropped.
    pub fn shutdown(&self) -> SlamResult<()> {
        self.tx
            .send(SlamInput::Shutdown)
            .map_err(|_| SlamError::WorkerStopped)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Worker thread handle.
pub struct SlamWorker {
    handle: JoinHandle<WorkerSummary>,
}

impl SlamWorker {
    /// Spawn the worker. Returns the join handle, the input handle and the
    /// cycle output receiver.
    pub fn spawn(
        config: SlamConfig,
        options: WorkerOptions,
    ) -> SlamResult<(Self, SlamHandle, Receiver<CycleOutput>)> {
        let pipeline = SlamPipeline::new(config)?;
        let (input_tx, input_rx) = channel::bounded(options.input_capacity.max(1));
        let (output_tx, output_rx) = channel::bounded(options.output_capacity.max(1));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker_dropped = dropped.clone();
        let handle = thread::Builder::new()
            .name("track-slam".into())
            .spawn(move || run_loop(pipeline, input_rx, output_tx, options, worker_dropped))?;

        Ok((
            Self { handle },
            SlamHandle { tx: input_tx, dropped },
            output_rx,
        ))
    }

    /// Wait for the worker to exit and collect its summary.
    pub fn join(self) -> SlamResult<WorkerSummary> {
        self.handle.join().map_err(|_| SlamError::WorkerStopped)
    }
}

fn run_loop(
    mut pipeline: SlamPipeline,
    input_rx: Receiver<SlamInput>,
    output_tx: Sender<CycleOutput>,
    options: WorkerOptions,
    dropped: Arc<AtomicU64>,
) -> WorkerSummary {
    log::info!("SLAM worker started");
    let started_at = crate::live_status::current_timestamp();
    let mut outputs_dropped = 0u64;

    // Ends on Shutdown or once every handle is gone
    for input in input_rx.iter() {
        if matches!(input, SlamInput::Shutdown) {
            break;
        }

        for output in pipeline.handle(input) {
            let cycle = output.stats.cycle;
            match output_tx.try_send(output) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    outputs_dropped += 1;
                    log::warn!("Output queue full, dropped cycle {}", cycle);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("Output receiver gone, cycle {} discarded", cycle);
                }
            }

            if let Some(path) = &options.status_path {
                if options.status_every > 0 && (cycle + 1) % options.status_every == 0 {
                    let total_dropped = dropped.load(Ordering::Relaxed) + pipeline.sync_dropped();
                    let status = pipeline.status_mut();
                    status.dropped_inputs = total_dropped;
                    status.touch(started_at);
                    if let Err(e) = status.save(path) {
                        log::warn!("Failed to write status to {}: {}", path, e);
                    }
                }
            }
        }
    }

    let mut summary = pipeline.finish();
    summary.outputs_dropped = outputs_dropped;
    summary.status.dropped_inputs += dropped.load(Ordering::Relaxed);
    summary.status.touch(started_at);
    log::info!(
        "SLAM worker stopped after {} cycles ({} landmarks, {} outputs dropped)",
        summary.cycles,
        summary.final_map.cones.len(),
        outputs_dropped
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConeColor, Detection};
    use std::time::Duration;

    fn fixed_origin() -> SlamConfig {
        SlamConfig { capture_origin: false, ..SlamConfig::default() }
    }

    fn pose(t: f64, x: f64) -> PoseStamped {
        PoseStamped::planar(t, x, 0.0, 0.0, (0.01, 0.01, 0.01))
    }

    fn batch(t: f64, range: f64, bearing: f64) -> DetectionBatch {
        DetectionBatch {
            timestamp: t,
            detections: vec![Detection::new(range, bearing, ConeColor::Blue)],
        }
    }

    #[test]
    fn test_pipeline_pairs_pose_with_both_streams() {
        let mut pipeline = SlamPipeline::new(fixed_origin()).unwrap();
        assert!(pipeline.handle(SlamInput::Vision(batch(0.05, 5.0, 0.0))).is_empty());
        assert!(pipeline.handle(SlamInput::Lidar(batch(0.02, 5.0, 0.8))).is_empty());

        let outputs = pipeline.handle(SlamInput::Pose(pose(0.0, 3.0)));
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].stats.source, Some(DetectionSource::Vision));
        assert_eq!(outputs[1].stats.source, Some(DetectionSource::Lidar));
        assert_eq!(pipeline.slam().filter().landmark_count(), 2);
        assert_eq!(pipeline.status().cycles, 2);
    }

    #[test]
    fn test_pipeline_counts_failed_cycles() {
        let mut pipeline = SlamPipeline::new(fixed_origin()).unwrap();
        pipeline.handle(SlamInput::Pose(pose(0.0, f64::NAN)));
        let outputs = pipeline.handle(SlamInput::Vision(batch(0.0, 5.0, 0.0)));
        assert!(outputs.is_empty());
        assert_eq!(pipeline.status().failed_cycles, 1);
        assert_eq!(pipeline.slam().cycles(), 0);
    }

    #[test]
    fn test_worker_end_to_end() {
        let (worker, handle, outputs) =
            SlamWorker::spawn(fixed_origin(), WorkerOptions::default()).unwrap();

        assert!(handle.pose(pose(0.0, 3.0)).unwrap());
        assert!(handle.vision(batch(0.01, 5.0, 0.0)).unwrap());
        let first = outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.global_map.cones.len(), 1);

        assert!(handle.pose(pose(0.1, 3.0)).unwrap());
        assert!(handle.lidar(batch(0.12, 4.9, 0.05)).unwrap());
        let second = outputs.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.stats.updates, 1);

        handle.shutdown().unwrap();
        let summary = worker.join().unwrap();
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.final_map.cones.len(), 1);
        assert_eq!(summary.status.vision_cycles, 1);
        assert_eq!(summary.status.lidar_cycles, 1);
    }

    #[test]
    fn test_full_input_queue_drops_without_blocking() {
        let options = WorkerOptions { input_capacity: 1, ..WorkerOptions::default() };
        let (worker, handle, _outputs) = SlamWorker::spawn(fixed_origin(), options).unwrap();

        let mut refused = 0u64;
        for i in 0..5000 {
            let t = i as f64 * 0.001;
            if !handle.pose(pose(t, 3.0)).unwrap() {
                refused += 1;
            }
            if !handle.vision(batch(t + 10.0, 5.0, 0.0)).unwrap() {
                refused += 1;
            }
        }
        assert!(refused > 0);
        assert_eq!(handle.dropped(), refused);

        handle.shutdown().unwrap();
        let summary = worker.join().unwrap();
        assert!(summary.status.dropped_inputs >= refused);
    }

    #[test]
    fn test_full_output_queue_drops_cycles() {
        let options = WorkerOptions { output_capacity: 1, ..WorkerOptions::default() };
        let (worker, handle, outputs) = SlamWorker::spawn(fixed_origin(), options).unwrap();

        for k in 0..4 {
            let t = k as f64 * 0.1;
            assert!(handle.pose(pose(t, 3.0)).unwrap());
            assert!(handle.vision(batch(t + 0.01, 5.0, 0.0)).unwrap());
        }
        handle.shutdown().unwrap();
        let summary = worker.join().unwrap();

        assert_eq!(summary.cycles, 4);
        assert_eq!(summary.outputs_dropped, 3);
        assert_eq!(outputs.try_iter().count(), 1);
    }

    #[test]
    fn test_submit_after_stop_fails() {
        let (worker, handle, _outputs) =
            SlamWorker::spawn(fixed_origin(), WorkerOptions::default()).unwrap();
        handle.shutdown().unwrap();
        worker.join().unwrap();
        assert!(matches!(
            handle.pose(pose(0.0, 0.0)),
            Err(SlamError::WorkerStopped)
        ));
    }

    #[test]
    fn test_invalid_config_refuses_to_spawn() {
        let config = SlamConfig { association_radius: -1.0, ..SlamConfig::default() };
        assert!(SlamWorker::spawn(config, WorkerOptions::default()).is_err());
    }
}
