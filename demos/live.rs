//! Live pass-through from the default input to the default output
//!
//! Run with: cargo run --example live --features cpal_io [config.yaml]

use std::thread::sleep;
use std::time::Duration;

use ndarray::{Array3, ArrayView3};

use voiscope::device::CpalDuplex;
use voiscope::{FrameTransform, HistorySet, Pipeline, PipelineConfig};

/// Passes audio through and publishes the level of each cycle.
struct Meter {
    level: f32,
}

impl FrameTransform for Meter {
    fn transform(&mut self, frames: ArrayView3<'_, f32>) -> Array3<f32> {
        self.level = frames.iter().fold(0.0f32, |peak, x| peak.max(x.abs()));
        frames.to_owned()
    }

    fn publish(&mut self, histories: &mut HistorySet) {
        histories.tdoa.push(&[self.level]);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let duplex = CpalDuplex::from_config(&config);
    let mut pipeline = Pipeline::spawn(&config, Meter { level: 0.0 }, move |io| duplex.open(io))?;
    let levels = pipeline.histories().tdoa;

    pipeline.play()?;
    tracing::info!(status = ?pipeline.status(), latency = pipeline.layout().latency_samples(), "playing, 10 s");

    for _ in 0..20 {
        sleep(Duration::from_millis(500));
        tracing::info!(level = levels.get(None)[0], "input level");
    }

    pipeline.pause()?;
    pipeline.shutdown();
    Ok(())
}
