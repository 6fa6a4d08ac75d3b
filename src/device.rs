//! CPAL duplex transport.
//!
//! The input stream callback collects one block of 16-bit samples, runs it
//! through [`BlockIo`] and queues the result for the output stream, which
//! drains it on its own callback. Streams are opened on the first start.
//!
//! ```no_run
//! use voiscope::device::CpalDuplex;
//! use voiscope::{Identity, Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::default();
//! let duplex = CpalDuplex::from_config(&config);
//! let mut pipeline = Pipeline::spawn(&config, Identity, move |io| duplex.open(io)).unwrap();
//! pipeline.play().unwrap();
//! ```

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, BuildStreamError, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info};

use crate::audio_io::{BlockIo, Transport};
use crate::config::PipelineConfig;
use crate::error::TransportError;

/// Blocks queued between the input and output callbacks
const OUTPUT_QUEUE_BLOCKS: usize = 4;

type ErrorSlot = Arc<Mutex<Option<TransportError>>>;

/// Default input and output devices plus the stream shape to open them with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpalDuplex {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per device callback; one pipeline block
    pub block_size: u32,
}

impl CpalDuplex {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels as u16,
            block_size: config.block_size as u32,
        }
    }

    /// Bind `io` to the default devices. Nothing is opened until the
    /// transport is started.
    pub fn open(self, io: BlockIo) -> Result<CpalTransport, TransportError> {
        let host = cpal::default_host();
        let input = host
            .default_input_device()
            .ok_or_else(|| TransportError::NoDevice("no default input device".into()))?;
        let output = host
            .default_output_device()
            .ok_or_else(|| TransportError::NoDevice("no default output device".into()))?;

        info!(
            input = %input.name().unwrap_or_else(|_| "Unknown".into()),
            output = %output.name().unwrap_or_else(|_| "Unknown".into()),
            sample_rate = self.sample_rate,
            channels = self.channels,
            "audio devices selected"
        );

        Ok(CpalTransport {
            shape: self,
            input,
            output,
            io: Some(io),
            streams: None,
            error: Arc::new(Mutex::new(None)),
            active: false,
        })
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            channels: self.channels,
            sample_rate: SampleRate(self.sample_rate),
            buffer_size: BufferSize::Fixed(self.block_size),
        }
    }
}

/// A [`Transport`] over a pair of CPAL streams.
pub struct CpalTransport {
    shape: CpalDuplex,
    input: cpal::Device,
    output: cpal::Device,
    io: Option<BlockIo>,
    streams: Option<(Stream, Stream)>,
    error: ErrorSlot,
    active: bool,
}

impl CpalTransport {
    /// Open both streams. The output side is built first so a failure there
    /// leaves the block I/O in place for the next attempt.
    fn build(&mut self) -> Result<(), TransportError> {
        let config = self.shape.stream_config();
        let block_samples = match &self.io {
            Some(io) => io.block_samples(),
            None => return Err(spent_io()),
        };
        let (producer, consumer) = RingBuffer::new(block_samples * OUTPUT_QUEUE_BLOCKS);

        let output_stream = self
            .output
            .build_output_stream(
                &config,
                output_callback(consumer),
                error_callback(Arc::clone(&self.error)),
                None,
            )
            .map_err(build_error)?;

        // the input callback owns the block I/O from here on, even if the
        // build fails
        let io = claim_io(&mut self.io)?;
        let input_stream = self
            .input
            .build_input_stream(
                &config,
                input_callback(io, producer),
                error_callback(Arc::clone(&self.error)),
                None,
            )
            .map_err(build_error)?;

        info!(?config, "audio streams created");
        self.streams = Some((input_stream, output_stream));
        Ok(())
    }
}

fn spent_io() -> TransportError {
    TransportError::StreamBuild("input stream build failed earlier; the pipeline must be respawned".into())
}

fn claim_io(slot: &mut Option<BlockIo>) -> Result<BlockIo, TransportError> {
    slot.take().ok_or_else(spent_io)
}

impl Transport for CpalTransport {
    fn start(&mut self) -> Result<(), TransportError> {
        if self.streams.is_none() {
            self.build()?;
        }
        if let Some((input, output)) = &self.streams {
            output
                .play()
                .map_err(|e| TransportError::StreamControl(e.to_string()))?;
            input
                .play()
                .map_err(|e| TransportError::StreamControl(e.to_string()))?;
            self.active = true;
            info!("audio streams started");
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if let Some((input, output)) = &self.streams {
            input
                .pause()
                .map_err(|e| TransportError::StreamControl(e.to_string()))?;
            output
                .pause()
                .map_err(|e| TransportError::StreamControl(e.to_string()))?;
            info!("audio streams stopped");
        }
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn take_error(&mut self) -> Option<TransportError> {
        self.error.lock().take()
    }
}

impl Drop for CpalTransport {
    fn drop(&mut self) {
        if self.streams.take().is_some() {
            debug!("audio streams closed");
        }
    }
}

fn build_error(err: BuildStreamError) -> TransportError {
    match err {
        BuildStreamError::StreamConfigNotSupported => {
            TransportError::UnsupportedFormat("16-bit PCM at the configured rate and block size".into())
        }
        BuildStreamError::DeviceNotAvailable => TransportError::NoDevice(err.to_string()),
        other => TransportError::StreamBuild(other.to_string()),
    }
}

fn input_callback(
    mut io: BlockIo,
    mut queue: Producer<i16>,
) -> impl FnMut(&[i16], &cpal::InputCallbackInfo) + Send + 'static {
    let block_samples = io.block_samples();
    let mut pending: Vec<i16> = Vec::with_capacity(block_samples);
    let mut processed = vec![0i16; block_samples];
    let mut terminated = false;

    move |data: &[i16], _: &cpal::InputCallbackInfo| {
        for &sample in data {
            pending.push(sample);
            if pending.len() < block_samples {
                continue;
            }
            if !terminated && io.process_block(&pending, &mut processed).is_err() {
                terminated = true;
            }
            if terminated {
                processed.fill(0);
            }
            if let Ok(chunk) = queue.write_chunk_uninit(queue.slots().min(block_samples)) {
                chunk.fill_from_iter(processed.iter().copied());
            }
            pending.clear();
        }
    }
}

fn output_callback(mut queue: Consumer<i16>) -> impl FnMut(&mut [i16], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
        for sample in data.iter_mut() {
            *sample = queue.pop().unwrap_or(0);
        }
    }
}

fn error_callback(slot: ErrorSlot) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err: cpal::StreamError| {
        *slot.lock() = Some(TransportError::Stream(err.to_string()));
    }
}
