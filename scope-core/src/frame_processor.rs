//! Frame processor: the worker that drives one pipeline invocation per
//! tick, moderating input supply and output demand (C3).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::ScopeError;
use crate::pipeline_manager::PipelineManager;
use crate::types::{ParamValue, ParameterBag, VideoFrame, PAUSED_KEY, RESET_CACHE_KEY};

const SLEEP_TIME: Duration = Duration::from_millis(10);
const DEFAULT_MAX_BUFFER_SIZE: usize = 30;
const DEFAULT_MAX_OUTPUT_QUEUE_SIZE: usize = 8;
const DEFAULT_MAX_PARAMETER_QUEUE_SIZE: usize = 8;
const OUTPUT_QUEUE_MAX_SIZE_FACTOR: usize = 3;

const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 60.0;
const DEFAULT_FPS: f64 = 30.0;
const FPS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const FPS_WINDOW: usize = 2;

/// Uniform sampling: indices `round(i * N/K)` for `i in [0,K)`, then drop `[0,
/// last_index]` inclusive. `buffer.len() >= chunk_size` must hold.
fn sample_uniform(buffer: &mut VecDeque<VideoFrame>, chunk_size: usize) -> Vec<VideoFrame> {
    let n = buffer.len();
    let step = n as f64 / chunk_size as f64;
    let indices: Vec<usize> = (0..chunk_size)
        .map(|i| ((i as f64) * step).round() as usize)
        .collect();
    let sampled: Vec<VideoFrame> = indices.iter().map(|&i| buffer[i].clone()).collect();
    let last_idx = *indices.last().expect("chunk_size > 0");
    for _ in 0..=last_idx {
        buffer.pop_front();
    }
    sampled
}

/// Sliding window of `processing_time / frames_produced` samples, publishing
/// a clamped, smoothed `effective_fps` at most every [`FPS_UPDATE_INTERVAL`].
struct FpsState {
    samples: VecDeque<f64>,
    last_publish: Instant,
    effective_fps: f64,
}

impl FpsState {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(FPS_WINDOW),
            last_publish: Instant::now(),
            effective_fps: DEFAULT_FPS,
        }
    }

    fn record(&mut self, processing_time: Duration, num_frames: usize) {
        if processing_time.is_zero() || num_frames == 0 {
            return;
        }
        let time_per_frame = processing_time.as_secs_f64() / num_frames as f64;
        if self.samples.len() >= FPS_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(time_per_frame);

        if self.last_publish.elapsed() >= FPS_UPDATE_INTERVAL {
            let avg: f64 = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
            if avg > 0.0 {
                self.effective_fps = (1.0 / avg).clamp(MIN_FPS, MAX_FPS);
            }
            self.last_publish = Instant::now();
        }
    }
}

/// A bounded FIFO of processed output frames. Self-resizes upward (never
/// shrinks) when a single `process` call produces more frames than fit.
struct OutputQueue {
    frames: VecDeque<VideoFrame>,
    capacity: usize,
}

impl OutputQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Grow to `3 * produced` if that exceeds the current capacity, preserving
    /// queued frames in order.
    fn ensure_capacity_for(&mut self, produced: usize) {
        let target = produced * OUTPUT_QUEUE_MAX_SIZE_FACTOR;
        if target > self.capacity {
            info!(old = self.capacity, new = target, "growing output queue");
            self.capacity = target;
        }
    }

    fn push(&mut self, frame: VideoFrame) -> bool {
        if self.frames.len() >= self.capacity {
            return false;
        }
        self.frames.push_back(frame);
        true
    }

    fn pop(&mut self) -> Option<VideoFrame> {
        self.frames.pop_front()
    }

    fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Callback invoked once, with an optional error message, when the processor
/// stops.
pub type StopCallback = Box<dyn Fn(Option<String>) + Send + Sync>;

struct Shared {
    buffer: Mutex<VecDeque<VideoFrame>>,
    output: Mutex<OutputQueue>,
    fps: RwLock<FpsState>,
    paused: AtomicBool,
    running: AtomicBool,
    max_buffer_size: usize,
}

/// Runs one pipeline invocation per tick on a dedicated OS thread.
pub struct FrameProcessor {
    shared: Arc<Shared>,
    param_tx: Mutex<Option<SyncSender<ParameterBag>>>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    pipeline_manager: Arc<PipelineManager>,
    pipeline_id: String,
    initial_parameters: ParameterBag,
    stop_callback: Option<StopCallback>,
}

impl FrameProcessor {
    pub fn new(
        pipeline_manager: Arc<PipelineManager>,
        pipeline_id: String,
        initial_parameters: ParameterBag,
        stop_callback: Option<StopCallback>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                buffer: Mutex::new(VecDeque::with_capacity(DEFAULT_MAX_BUFFER_SIZE)),
                output: Mutex::new(OutputQueue::new(DEFAULT_MAX_OUTPUT_QUEUE_SIZE)),
                fps: RwLock::new(FpsState::new()),
                paused: AtomicBool::new(false),
                running: AtomicBool::new(false),
                max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            }),
            param_tx: Mutex::new(None),
            handle: Mutex::new(None),
            pipeline_manager,
            pipeline_id,
            initial_parameters,
            stop_callback,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Append a frame to the input buffer; `false` if the processor is stopped.
    /// Overflow drops the oldest frame.
    pub fn put(&self, frame: VideoFrame) -> bool {
        if !self.is_running() {
            return false;
        }
        let mut buffer = self.shared.buffer.lock();
        if buffer.len() >= self.shared.max_buffer_size {
            buffer.pop_front();
        }
        buffer.push_back(frame);
        true
    }

    /// Non-blocking pop from the output queue.
    pub fn get(&self) -> Option<VideoFrame> {
        if !self.is_running() {
            return None;
        }
        self.shared.output.lock().pop()
    }

    /// Non-blocking enqueue on the bounded parameter channel; drops (and returns
    /// `false`) when full rather than coalescing.
    pub fn update_parameters(&self, params: ParameterBag) -> bool {
        let guard = self.param_tx.lock();
        match guard.as_ref() {
            Some(tx) => match tx.try_send(params) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("parameter queue full, dropping parameter update");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    pub fn effective_fps(&self) -> f64 {
        self.shared.fps.read().effective_fps
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Spawn the worker thread. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, rx) = sync_channel(DEFAULT_MAX_PARAMETER_QUEUE_SIZE);
        *self.param_tx.lock() = Some(tx);

        let processor = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("frame-processor".into())
            .spawn(move || processor.worker_loop(rx))
            .expect("spawn frame processor worker thread");

        *self.handle.lock() = Some(handle);
        info!(pipeline_id = %self.pipeline_id, "frame processor started");
    }

    /// Signal shutdown, join (unless called from the worker thread itself),
    /// drain the output queue, clear the input buffer, and notify.
    pub fn stop(&self, error_message: Option<String>) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }

        self.shared.output.lock().clear();
        self.shared.buffer.lock().clear();

        info!("frame processor stopped");
        if let Some(cb) = &self.stop_callback {
            cb(error_message);
        }
    }

    fn worker_loop(self: Arc<Self>, param_rx: Receiver<ParameterBag>) {
        info!("frame processor worker thread started");

        let mut parameters = self.initial_parameters.clone();
        let mut is_prepared = false;

        while self.shared.running.load(Ordering::SeqCst) {
            match self.process_tick(&param_rx, &mut parameters, &mut is_prepared) {
                Ok(()) => {}
                Err(ScopeError::PipelineNotAvailable) => {
                    debug!("pipeline temporarily unavailable, flushing buffer");
                    self.shared.buffer.lock().clear();
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "non-recoverable error, stopping frame processor");
                    let message = e.to_string();
                    self.stop(Some(message));
                    return;
                }
                Err(e) => {
                    error!(error = %e, "error in worker loop, continuing");
                }
            }
        }

        info!("frame processor worker thread stopped");
    }

    fn process_tick(
        &self,
        param_rx: &Receiver<ParameterBag>,
        parameters: &mut ParameterBag,
        is_prepared: &mut bool,
    ) -> crate::error::Result<()> {
        let start = Instant::now();

        // Step 1: merge any new parameter bag.
        if let Ok(new_params) = param_rx.try_recv() {
            if &new_params != parameters {
                merge_parameters(parameters, new_params);
                debug!(?parameters, "updated parameters");
            }
        }

        // Step 2: pause control.
        if let Some(ParamValue::Bool(paused)) = parameters.remove(PAUSED_KEY) {
            self.set_paused(paused);
        }
        if self.is_paused() {
            std::thread::sleep(SLEEP_TIME);
            return Ok(());
        }

        // Step 3: reset_cache forces re-prepare.
        let reset_cache = matches!(parameters.remove(RESET_CACHE_KEY), Some(ParamValue::Bool(true)));
        let should_prepare = !*is_prepared || reset_cache;

        // Fetched fresh every tick (not cached across the worker's lifetime) so a
        // reload/unload via `PipelineManager::load`/`unload` is observed promptly:
        // `PipelineNotAvailable` surfaces per-tick rather than only at startup.
        let pipeline = self.pipeline_manager.get_pipeline()?;

        // Step 4/5: prepare. `prepare` consumes prepare-only keys; strip
        // them so they are never forwarded to `process`.
        let mut guard = pipeline.lock();
        let requirements = guard.prepare(should_prepare, parameters)?;
        *is_prepared = true;
        for key in crate::types::PREPARE_ONLY_KEYS {
            parameters.remove(*key);
        }

        // Step 6: gather input, if the pipeline needs any.
        let input = if let Some(reqs) = requirements {
            let mut buffer = self.shared.buffer.lock();
            if buffer.len() < reqs.input_size {
                drop(buffer);
                drop(guard);
                std::thread::sleep(SLEEP_TIME);
                return Ok(());
            }
            Some(sample_uniform(&mut buffer, reqs.input_size))
        } else {
            None
        };

        // Step 7: run inference.
        let output = guard.process(input, parameters)?;
        drop(guard);
        let num_frames = output.len();

        // Step 9: grow the output queue if this call produced a burst.
        let mut out_queue = self.shared.output.lock();
        out_queue.ensure_capacity_for(num_frames);

        // Step 10: enqueue, dropping on full.
        for frame in output {
            if !out_queue.push(frame) {
                warn!("output queue full, dropping processed frame");
            }
        }
        drop(out_queue);

        // Step 11: update FPS tracker.
        self.shared.fps.write().record(start.elapsed(), num_frames);

        Ok(())
    }
}

/// Overlay `update` onto `current`: new values win, unmentioned keys are
/// preserved.
fn merge_parameters(current: &mut ParameterBag, update: ParameterBag) {
    for (k, v) in update {
        current.insert(k, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sampling_matches_spec_example() {
        let mut buffer: VecDeque<VideoFrame> = (0..8)
            .map(|i| {
                let mut f = VideoFrame::new(vec![0u8; 3], 1, 1);
                f.pts = i;
                f
            })
            .collect();
        let sampled = sample_uniform(&mut buffer, 4);
        let pts: Vec<i64> = sampled.iter().map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 2, 4, 6]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer[0].pts, 7);
    }

    #[test]
    fn merge_preserves_unmentioned_keys() {
        let mut current = ParameterBag::new();
        current.insert("a".into(), serde_json::json!(1));
        current.insert("b".into(), serde_json::json!(2));

        let mut update = ParameterBag::new();
        update.insert("b".into(), serde_json::json!(99));

        merge_parameters(&mut current, update.clone());
        assert_eq!(current.get("a").unwrap(), &serde_json::json!(1));
        assert_eq!(current.get("b").unwrap(), &serde_json::json!(99));

        // Idempotence: applying the same update again is a no-op on state.
        let before = current.clone();
        merge_parameters(&mut current, update);
        assert_eq!(current, before);
    }

    #[test]
    fn fps_default_before_any_sample() {
        let fps = FpsState::new();
        assert_eq!(fps.effective_fps, DEFAULT_FPS);
    }

    #[test]
    fn fps_clamped_to_bounds() {
        let mut fps = FpsState::new();
        // Absurdly fast processing -> would exceed MAX_FPS unclamped.
        fps.record(Duration::from_micros(1), 1);
        fps.last_publish = Instant::now() - FPS_UPDATE_INTERVAL - Duration::from_millis(1);
        fps.record(Duration::from_micros(1), 1);
        assert!(fps.effective_fps <= MAX_FPS);
        assert!(fps.effective_fps >= MIN_FPS);
    }

    #[test]
    fn output_queue_grows_and_preserves_order() {
        let mut q = OutputQueue::new(8);
        for i in 0..8u8 {
            assert!(q.push(VideoFrame::new(vec![i, 0, 0], 1, 1)));
        }
        q.ensure_capacity_for(10);
        assert_eq!(q.capacity, 30);
        for i in 8..18u8 {
            assert!(q.push(VideoFrame::new(vec![i, 0, 0], 1, 1)));
        }
        let mut out = Vec::new();
        while let Some(f) = q.pop() {
            out.push(f.data[0]);
        }
        assert_eq!(out, (0..18u8).collect::<Vec<_>>());
    }

    #[test]
    fn buffer_bound_drops_oldest() {
        use crate::pipeline::test_support::EchoPipeline;
        use crate::pipeline_manager::{PipelineFactory, PipelineManager};
        use std::sync::Arc;

        let factory: PipelineFactory =
            Arc::new(|_id, _p| Ok(Box::new(EchoPipeline::new(2, 2, None)) as Box<dyn crate::pipeline::Pipeline>));
        let mgr = Arc::new(PipelineManager::new(factory));
        mgr.load("passthrough", ParameterBag::new()).unwrap();

        let processor = Arc::new(FrameProcessor::new(
            Arc::clone(&mgr),
            "passthrough".into(),
            ParameterBag::new(),
            None,
        ));
        processor.shared.running.store(true, Ordering::SeqCst);

        for i in 0..40i64 {
            let mut f = VideoFrame::new(vec![0u8; 12], 2, 2);
            f.pts = i;
            processor.put(f);
        }
        let buffer = processor.shared.buffer.lock();
        assert_eq!(buffer.len(), DEFAULT_MAX_BUFFER_SIZE);
        assert_eq!(buffer.front().unwrap().pts, 10);
        assert_eq!(buffer.back().unwrap().pts, 39);
    }

    #[test]
    fn prepare_only_keys_are_not_forwarded_to_process() {
        use crate::error::Result as ScopeResult;
        use crate::pipeline::{FrameChunk, Pipeline};
        use crate::pipeline_manager::{PipelineFactory, PipelineManager};
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool as StdAtomicBool;

        struct RecordingPipeline {
            saw_manage_cache_in_process: Arc<StdAtomicBool>,
        }

        impl Pipeline for RecordingPipeline {
            fn prepare(&mut self, _should_prepare: bool, params: &ParameterBag) -> ScopeResult<Option<crate::types::Requirements>> {
                assert!(params.contains_key("manage_cache"));
                Ok(None)
            }

            fn process(&mut self, _input: Option<FrameChunk>, params: &ParameterBag) -> ScopeResult<FrameChunk> {
                if params.contains_key("manage_cache") {
                    self.saw_manage_cache_in_process.store(true, Ordering::SeqCst);
                }
                Ok(vec![VideoFrame::new(vec![0u8; 3], 1, 1)])
            }

            fn frame_size(&self) -> (u32, u32) {
                (1, 1)
            }
        }

        let saw_it = Arc::new(StdAtomicBool::new(false));
        let saw_it2 = Arc::clone(&saw_it);
        let factory: PipelineFactory = Arc::new(move |_id, _p| {
            Ok(Box::new(RecordingPipeline {
                saw_manage_cache_in_process: Arc::clone(&saw_it2),
            }) as Box<dyn crate::pipeline::Pipeline>)
        });
        let mgr = Arc::new(PipelineManager::new(factory));
        mgr.load("passthrough", ParameterBag::new()).unwrap();

        let mut params = ParameterBag::new();
        params.insert("manage_cache".into(), serde_json::json!(true));

        let (_tx, rx) = sync_channel::<ParameterBag>(8);
        let processor = Arc::new(FrameProcessor::new(mgr, "passthrough".into(), ParameterBag::new(), None));
        processor.shared.running.store(true, Ordering::SeqCst);
        let mut is_prepared = false;
        processor
            .process_tick(&rx, &mut params, &mut is_prepared)
            .unwrap();

        assert!(!saw_it.load(Ordering::SeqCst), "manage_cache leaked into process()");
        assert!(!params.contains_key("manage_cache"), "manage_cache should be stripped from the bag");
    }

    #[test]
    fn process_tick_observes_unload_mid_session() {
        use crate::pipeline::test_support::EchoPipeline;
        use crate::pipeline_manager::{PipelineFactory, PipelineManager};

        let factory: PipelineFactory =
            Arc::new(|_id, _p| Ok(Box::new(EchoPipeline::new(1, 1, None)) as Box<dyn crate::pipeline::Pipeline>));
        let mgr = Arc::new(PipelineManager::new(factory));
        mgr.load("passthrough", ParameterBag::new()).unwrap();

        let (_tx, rx) = sync_channel::<ParameterBag>(8);
        let processor = Arc::new(FrameProcessor::new(
            Arc::clone(&mgr),
            "passthrough".into(),
            ParameterBag::new(),
            None,
        ));
        processor.shared.running.store(true, Ordering::SeqCst);
        let mut params = ParameterBag::new();
        let mut is_prepared = false;

        // While loaded, a tick succeeds.
        processor.process_tick(&rx, &mut params, &mut is_prepared).unwrap();

        // Unload out from under the running processor, as a reload or shutdown
        // would: the very next tick must observe it immediately, not keep calling
        // into a stale, already-released pipeline handle.
        mgr.unload();
        let result = processor.process_tick(&rx, &mut params, &mut is_prepared);
        assert!(matches!(result, Err(ScopeError::PipelineNotAvailable)));
    }
}
