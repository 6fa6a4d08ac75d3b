use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ndarray::{Array3, ArrayView3};
use parking_lot::Mutex;

use voiscope::handoff;
use voiscope::{
    BlockIo, FrameTransform, HistorySet, Identity, LocalizationTarget, Pipeline, PipelineConfig, PipelineStatus,
    SeparationCommand, SeparationParams, Terminate, Transport, TransportError,
};

fn small_config() -> PipelineConfig {
    PipelineConfig {
        channels: 1,
        window_size: 64,
        hop_size: 16,
        block_size: 64,
        windows_per_block: 4,
        history_blocks: 8,
        num_tdoas: 8,
        tdoa_history: 16,
        spectrogram_history: 16,
        dictionary_sizes: vec![4],
        stats_interval_ms: 50,
        ..PipelineConfig::default()
    }
}

fn tone(n: u64) -> i16 {
    (0.1 * (TAU * 440.0 * n as f32 / 16000.0).sin() * 32768.0) as i16
}

/// Plays the role of a device: a thread that pushes a tone through the
/// block I/O as fast as the processing side serves it.
struct MockTransport {
    io: Option<BlockIo>,
    worker: Option<JoinHandle<BlockIo>>,
    running: Arc<AtomicBool>,
    blocks: Arc<AtomicU64>,
    captured: Arc<Mutex<Vec<i16>>>,
}

impl MockTransport {
    fn new(io: BlockIo, blocks: Arc<AtomicU64>, captured: Arc<Mutex<Vec<i16>>>) -> Self {
        Self {
            io: Some(io),
            worker: None,
            running: Arc::new(AtomicBool::new(false)),
            blocks,
            captured,
        }
    }
}

impl Transport for MockTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        let Some(mut io) = self.io.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let blocks = Arc::clone(&self.blocks);
        let captured = Arc::clone(&self.captured);

        self.worker = Some(thread::spawn(move || {
            let n = io.block_samples();
            let mut input = vec![0i16; n];
            let mut output = vec![0i16; n];
            let mut t = captured.lock().len() as u64;
            while running.load(Ordering::SeqCst) {
                for sample in input.iter_mut() {
                    *sample = tone(t);
                    t += 1;
                }
                if io.process_block(&input, &mut output).is_err() {
                    break;
                }
                captured.lock().extend_from_slice(&output);
                blocks.fetch_add(1, Ordering::SeqCst);
            }
            io
        }));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let io = worker
                .join()
                .map_err(|_| TransportError::Stream("mock worker panicked".into()))?;
            self.io = Some(io);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

fn wait_for(blocks: &AtomicU64, at_least: u64) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while blocks.load(Ordering::SeqCst) < at_least {
        assert!(Instant::now() < deadline, "pipeline stalled");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn identity_pipeline_reconstructs_input() {
    let config = small_config();
    let blocks = Arc::new(AtomicU64::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let (b, c) = (Arc::clone(&blocks), Arc::clone(&captured));
    let mut pipeline = Pipeline::spawn(&config, Identity, move |io| Ok(MockTransport::new(io, b, c))).unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    let layout = *pipeline.layout();
    assert_eq!(layout.output_delay_blocks(), 2);
    assert_eq!(layout.reconstruction_gain(), 4.0);

    pipeline.play().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);
    wait_for(&blocks, 20);
    pipeline.pause().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Stopped);

    let output = captured.lock().clone();
    assert!(output.len() >= 20 * 64);
    let lag = layout.latency_samples();
    assert!(output[..lag].iter().all(|&s| s == 0));
    for (n, &got) in output[lag..].iter().enumerate() {
        let want = 4 * tone(n as u64) as i32;
        assert!((got as i32 - want).abs() <= 1, "sample {n}: got {got}, want {want}");
    }

    pipeline.shutdown();
}

#[test]
fn playback_resumes_after_pause() {
    let config = small_config();
    let blocks = Arc::new(AtomicU64::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let (b, c) = (Arc::clone(&blocks), Arc::clone(&captured));
    let mut pipeline = Pipeline::spawn(&config, Identity, move |io| Ok(MockTransport::new(io, b, c))).unwrap();

    pipeline.play().unwrap();
    wait_for(&blocks, 5);
    pipeline.pause().unwrap();
    let paused_at = blocks.load(Ordering::SeqCst);

    thread::sleep(Duration::from_millis(20));
    assert_eq!(blocks.load(Ordering::SeqCst), paused_at);

    pipeline.play().unwrap();
    wait_for(&blocks, paused_at + 5);
    drop(pipeline);
}

#[test]
fn shutdown_while_running_releases_callback() {
    let config = small_config();
    let blocks = Arc::new(AtomicU64::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));

    let (b, c) = (Arc::clone(&blocks), Arc::clone(&captured));
    let mut pipeline = Pipeline::spawn(&config, Identity, move |io| Ok(MockTransport::new(io, b, c))).unwrap();
    pipeline.play().unwrap();
    wait_for(&blocks, 3);

    // must return even though the mock is mid-exchange
    pipeline.shutdown();
}

#[test]
fn failed_transport_reports_status() {
    let config = small_config();
    let mut pipeline = Pipeline::spawn(&config, Identity, |_io: BlockIo| {
        Err::<MockTransport, _>(TransportError::NoDevice("test".into()))
    })
    .unwrap();

    pipeline.play().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Failed);
    pipeline.shutdown();
}

/// Starts without a stream and reports one runtime error after the first start.
struct FaultyTransport {
    active: bool,
    pending_error: bool,
    stops: Arc<AtomicU64>,
}

impl Transport for FaultyTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        if self.stops.load(Ordering::SeqCst) == 0 {
            self.pending_error = true;
        }
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn take_error(&mut self) -> Option<TransportError> {
        std::mem::take(&mut self.pending_error).then(|| TransportError::Stream("device unplugged".into()))
    }
}

fn wait_for_status(pipeline: &voiscope::PipelineHandle, status: PipelineStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while pipeline.status() != status {
        assert!(Instant::now() < deadline, "status stuck at {:?}", pipeline.status());
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn stream_error_stops_transport_and_spares_processing() {
    let config = small_config();
    let stops = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&stops);
    let mut pipeline = Pipeline::spawn(&config, Identity, move |_io: BlockIo| {
        Ok(FaultyTransport {
            active: false,
            pending_error: false,
            stops: counter,
        })
    })
    .unwrap();

    pipeline.play().unwrap();
    wait_for_status(&pipeline, PipelineStatus::Failed);
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    // the processing side still applies and acknowledges records
    let params = SeparationParams {
        num_tdoas: 8,
        dictionary_size: 4,
    };
    pipeline.separation().send(SeparationCommand::Start(params)).unwrap();
    pipeline.target().send(LocalizationTarget::from_sliders(8, 0.5, 0.5, 0.5, 0.0)).unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Failed);

    // a later start recovers
    pipeline.play().unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);
    pipeline.shutdown();
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Start(SeparationParams),
    Stop,
    Target(f32),
}

/// Records hook calls and publishes frame energy to the TDOA history.
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    gain: f32,
}

impl FrameTransform for Recorder {
    fn transform(&mut self, frames: ArrayView3<'_, f32>) -> Array3<f32> {
        frames.mapv(|x| x * self.gain)
    }

    fn publish(&mut self, histories: &mut HistorySet) {
        histories.tdoa.push(&[self.gain]);
    }

    fn start(&mut self, params: &SeparationParams) {
        self.gain = 0.5;
        self.events.lock().push(Event::Start(*params));
    }

    fn stop(&mut self) {
        self.gain = 1.0;
        self.events.lock().push(Event::Stop);
    }

    fn set_target(&mut self, target: &LocalizationTarget) {
        self.events.lock().push(Event::Target(target.index));
    }
}

#[test]
fn control_records_reach_transform_before_ack() {
    let config = small_config();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorder = Recorder {
        events: Arc::clone(&events),
        gain: 1.0,
    };
    let blocks = Arc::new(AtomicU64::new(0));
    let captured = Arc::new(Mutex::new(Vec::new()));
    let (b, c) = (Arc::clone(&blocks), Arc::clone(&captured));
    let mut pipeline = Pipeline::spawn(&config, recorder, move |io| Ok(MockTransport::new(io, b, c))).unwrap();

    let params = SeparationParams {
        num_tdoas: 8,
        dictionary_size: 4,
    };
    pipeline.separation().send(SeparationCommand::Start(params)).unwrap();
    assert_eq!(*events.lock(), vec![Event::Start(params)]);

    let target = LocalizationTarget::from_sliders(8, 0.25, 0.5, 0.5, 0.1);
    pipeline.target().send(target).unwrap();
    assert_eq!(events.lock().last(), Some(&Event::Target(2.0)));

    pipeline.separation().send(SeparationCommand::Stop).unwrap();
    assert_eq!(events.lock().len(), 3);

    // published values are visible to readers while the pipeline runs
    let tdoa = pipeline.histories().tdoa;
    pipeline.play().unwrap();
    wait_for(&blocks, 20);
    let column = tdoa.get(None);
    assert_eq!(column.len(), 1);
    assert_eq!(column[0], 1.0);
    pipeline.shutdown();
}

#[test]
fn handoff_strictly_alternates() {
    const CYCLES: u64 = 1000;
    let terminate = Terminate::new();
    let compute_waiter = terminate.waiter();
    let (mut transport, mut compute) = handoff::channel(8, &terminate, &compute_waiter);

    let requests = Arc::new(AtomicU64::new(0));
    let served = Arc::new(AtomicU64::new(0));
    let (seen, counter) = (Arc::clone(&requests), Arc::clone(&served));
    let worker = thread::spawn(move || {
        while !compute_waiter.terminated() {
            if !compute.is_requested() {
                let _ = compute_waiter.park_timeout(Duration::from_millis(10));
                continue;
            }
            // a request is visible exactly once per cycle, after the last one was served
            let requested = seen.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(requested, counter.load(Ordering::SeqCst) + 1);
            assert!(compute.try_serve(|input, output| {
                counter.fetch_add(1, Ordering::SeqCst);
                output.copy_from_slice(input);
            }));
            assert_eq!(compute.cycles(), requested);
        }
    });

    let mut output = [0.0; 8];
    for cycle in 1..=CYCLES {
        let input = [cycle as f32; 8];
        transport.exchange(&input, &mut output).unwrap();
        assert_eq!(requests.load(Ordering::SeqCst), cycle);
        assert_eq!(served.load(Ordering::SeqCst), cycle);
        assert_eq!(transport.cycles(), cycle);
        assert_eq!(output, input);
        assert!(!transport.is_done());
    }
    assert_eq!(transport.dropped(), 0);

    terminate.set();
    worker.join().unwrap();
}
