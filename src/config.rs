//! Static pipeline configuration.
//!
//! Everything here is fixed when the pipeline is spawned. Only the records
//! carried by the [control channels](crate::control) change at runtime.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default interval between processing-time reports
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 2000;

/// Full configuration for both processes and the history set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub channels: usize,
    /// Analysis window length W
    pub window_size: usize,
    /// Distance between successive window starts H
    pub hop_size: usize,
    /// Samples per channel exchanged per handoff B
    pub block_size: usize,
    /// Windows extracted per cycle K
    pub windows_per_block: usize,
    /// Depth of the analysis and reconstruction histories, in blocks (M)
    pub history_blocks: usize,
    /// Position of the finalized output region behind the tail, in blocks.
    /// `None` uses the smallest delay at which every window has been summed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_delay_blocks: Option<usize>,

    pub num_tdoas: usize,
    pub tdoa_history: usize,
    pub spectrogram_history: usize,
    pub dictionary_sizes: Vec<usize>,

    pub stats_interval_ms: u64,
    pub control_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 2,
            window_size: 512,
            hop_size: 128,
            block_size: 512,
            windows_per_block: 4,
            history_blocks: 8,
            output_delay_blocks: None,
            num_tdoas: 64,
            tdoa_history: 128,
            spectrogram_history: 128,
            dictionary_sizes: vec![64, 128, 256, 512, 1024],
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            control_queue_capacity: 1,
        }
    }
}

impl PipelineConfig {
    /// Load a YAML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Frequency bins of a one-sided spectrum of one window
    pub fn num_freq(&self) -> usize {
        self.window_size / 2 + 1
    }

    pub fn frame_layout(&self) -> Result<FrameLayout, ConfigError> {
        FrameLayout::from_config(self)
    }

    /// Interleaved samples in one sample block
    pub fn block_samples(&self) -> usize {
        self.channels * self.block_size
    }
}

/// Validated geometry of the overlap-add engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub channels: usize,
    pub window: usize,
    pub hop: usize,
    pub block: usize,
    pub windows_per_block: usize,
    pub history_blocks: usize,
    output_delay_blocks: usize,
}

impl FrameLayout {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.channels,
            config.window_size,
            config.hop_size,
            config.block_size,
            config.windows_per_block,
            config.history_blocks,
        )?
        .with_output_delay(config.output_delay_blocks)
    }

    /// Validate a layout and derive its minimum output delay.
    pub fn new(
        channels: usize,
        window: usize,
        hop: usize,
        block: usize,
        windows_per_block: usize,
        history_blocks: usize,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("channels", channels),
            ("window_size", window),
            ("hop_size", hop),
            ("block_size", block),
            ("windows_per_block", windows_per_block),
            ("history_blocks", history_blocks),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if hop > window {
            return Err(ConfigError::HopExceedsWindow { hop, window });
        }
        if block % hop != 0 {
            return Err(ConfigError::HopNotDividingBlock { hop, block });
        }
        if (windows_per_block * hop) % block != 0 {
            return Err(ConfigError::UnevenCoverage {
                windows: windows_per_block,
                hop,
                block,
            });
        }

        let mut layout = Self {
            channels,
            window,
            hop,
            block,
            windows_per_block,
            history_blocks,
            output_delay_blocks: 0,
        };

        let history = layout.history_len();
        if layout.span() > history {
            return Err(ConfigError::SpanExceedsHistory {
                span: layout.span(),
                history,
            });
        }

        // span <= M·B keeps the minimum delay within the history
        layout.output_delay_blocks = layout.min_output_delay_blocks();
        Ok(layout)
    }

    /// Override the output delay. `None` keeps the derived minimum.
    pub fn with_output_delay(mut self, blocks: Option<usize>) -> Result<Self, ConfigError> {
        if let Some(requested) = blocks {
            let min = self.min_output_delay_blocks();
            if requested < min || requested > self.history_blocks {
                return Err(ConfigError::OutputDelay {
                    requested,
                    min,
                    max: self.history_blocks,
                });
            }
            self.output_delay_blocks = requested;
        }
        Ok(self)
    }

    /// Samples covered by the K windows of one cycle
    pub fn span(&self) -> usize {
        self.window + (self.windows_per_block - 1) * self.hop
    }

    /// Length of the analysis and reconstruction histories
    pub fn history_len(&self) -> usize {
        self.history_blocks * self.block
    }

    /// Smallest region offset, in blocks behind the tail, whose samples can
    /// no longer receive a contribution from a later cycle.
    ///
    /// After the next shift the emitted region starts `d·B` samples before
    /// the tail, while the oldest window of that cycle starts `span` samples
    /// before it. The region is final once `d·B >= span`.
    pub fn min_output_delay_blocks(&self) -> usize {
        self.span().div_ceil(self.block)
    }

    pub fn output_delay_blocks(&self) -> usize {
        self.output_delay_blocks
    }

    /// Samples between an input sample and its reconstruction
    pub fn latency_samples(&self) -> usize {
        (self.output_delay_blocks - 1) * self.block
    }

    /// Factor an identity transform scales the signal by: each sample lies
    /// in `W / H` window positions, each visited `K·H / B` times.
    ///
    /// Exact when the hop divides the window. Otherwise coverage alternates
    /// between neighbouring integers along the hop grid and this is the mean.
    pub fn reconstruction_gain(&self) -> f32 {
        let overlap = self.window as f32 / self.hop as f32;
        let revisits = (self.windows_per_block * self.hop) as f32 / self.block as f32;
        overlap * revisits
    }

    /// Start of each window in the history, oldest first, the last ending
    /// exactly at the tail.
    pub fn window_offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let first = self.history_len() - self.span();
        (0..self.windows_per_block).map(move |k| first + k * self.hop)
    }

    /// Shape of one analysis frame set (C, W, K)
    pub fn frame_shape(&self) -> (usize, usize, usize) {
        (self.channels, self.window, self.windows_per_block)
    }

    pub fn block_samples(&self) -> usize {
        self.channels * self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        let layout = PipelineConfig::default().frame_layout().unwrap();
        assert_eq!(layout.output_delay_blocks(), 2);
        assert_eq!(layout.latency_samples(), 512);
        assert_eq!(layout.reconstruction_gain(), 4.0);
    }

    #[test]
    fn derived_delay_for_hop_sized_blocks() {
        let layout = FrameLayout::new(2, 512, 128, 128, 4, 8).unwrap();
        assert_eq!(layout.span(), 896);
        assert_eq!(layout.output_delay_blocks(), 7);
        assert_eq!(layout.reconstruction_gain(), 16.0);
    }

    #[test]
    fn derived_delay_covers_window_off_the_hop_grid() {
        // 641 is not a multiple of the hop; the span spills one sample
        // into a third block
        let layout = FrameLayout::new(1, 641, 128, 512, 4, 8).unwrap();
        assert_eq!(layout.span(), 1025);
        assert_eq!(layout.output_delay_blocks(), 3);
        assert!(layout.output_delay_blocks() * layout.block >= layout.span());
        assert!(matches!(
            layout.with_output_delay(Some(2)),
            Err(ConfigError::OutputDelay { min: 3, .. })
        ));
    }

    #[test]
    fn window_offsets_end_at_tail() {
        let layout = FrameLayout::new(1, 512, 128, 512, 4, 8).unwrap();
        let offsets: Vec<_> = layout.window_offsets().collect();
        assert_eq!(offsets, vec![3200, 3328, 3456, 3584]);
        assert_eq!(offsets[3] + 512, layout.history_len());
    }

    #[test]
    fn explicit_delay_is_bounded() {
        let layout = FrameLayout::new(2, 512, 128, 512, 4, 8).unwrap();
        assert_eq!(layout.with_output_delay(Some(3)).unwrap().output_delay_blocks(), 3);
        assert!(matches!(
            layout.with_output_delay(Some(1)),
            Err(ConfigError::OutputDelay { min: 2, .. })
        ));
        assert!(layout.with_output_delay(Some(9)).is_err());
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(FrameLayout::new(0, 512, 128, 512, 4, 8), Err(ConfigError::Zero("channels"))));
        assert!(matches!(
            FrameLayout::new(1, 512, 96, 512, 4, 8),
            Err(ConfigError::HopNotDividingBlock { .. })
        ));
        assert!(matches!(
            FrameLayout::new(1, 512, 128, 512, 3, 8),
            Err(ConfigError::UnevenCoverage { .. })
        ));
        assert!(matches!(
            FrameLayout::new(1, 512, 128, 128, 4, 4),
            Err(ConfigError::SpanExceedsHistory { .. })
        ));
        // the whole history is needed once blocks shrink to one hop
        assert_eq!(FrameLayout::new(1, 512, 128, 128, 4, 7).unwrap().output_delay_blocks(), 7);
        assert!(matches!(
            FrameLayout::new(1, 512, 128, 128, 4, 6),
            Err(ConfigError::SpanExceedsHistory { span: 896, history: 768 })
        ));
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config = PipelineConfig::from_yaml_str("block_size: 128\nchannels: 1\ndictionary_sizes: [256]\n").unwrap();
        assert_eq!(config.block_size, 128);
        assert_eq!(config.channels, 1);
        assert_eq!(config.window_size, 512);
        assert_eq!(config.dictionary_sizes, vec![256]);
        assert_eq!(config.num_freq(), 257);
    }
}
