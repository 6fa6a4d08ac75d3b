//! Overlap-add framing and reconstruction.
//!
//! Each cycle the engine appends one interleaved sample block to its
//! analysis history, cuts K overlapping windows out of it, hands them to a
//! [`FrameTransform`], sums the transformed windows back into the
//! reconstruction history at their original offsets and emits the region
//! that no later window can still touch.
//!
//! All buffers are allocated up front; a cycle only allocates if the
//! transform does.

use ndarray::{s, Array3, ArrayView1, ArrayView3};

use crate::config::FrameLayout;
use crate::control::{LocalizationTarget, SeparationParams};
use crate::error::FrameError;
use crate::history::HistorySet;

/// The separation/localization plug-in.
///
/// `transform` maps a `(channels, window, windows)` frame set to a frame set
/// of the same shape and must finish well within one block period. The
/// remaining hooks default to no-ops. Any
/// `FnMut(ArrayView3<f32>) -> Array3<f32>` closure is a transform.
pub trait FrameTransform: Send {
    fn transform(&mut self, frames: ArrayView3<'_, f32>) -> Array3<f32>;

    /// Called after every successful cycle to publish display data
    fn publish(&mut self, _histories: &mut HistorySet) {}

    /// Separation was (re)started with new model parameters
    fn start(&mut self, _params: &SeparationParams) {}

    fn stop(&mut self) {}

    /// The localization target changed
    fn set_target(&mut self, _target: &LocalizationTarget) {}
}

impl<F> FrameTransform for F
where
    F: FnMut(ArrayView3<'_, f32>) -> Array3<f32> + Send,
{
    fn transform(&mut self, frames: ArrayView3<'_, f32>) -> Array3<f32> {
        self(frames)
    }
}

/// Passes frames through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl FrameTransform for Identity {
    fn transform(&mut self, frames: ArrayView3<'_, f32>) -> Array3<f32> {
        frames.to_owned()
    }
}

/// Windowing and reconstruction state of the processing side.
pub struct OverlapAdd {
    layout: FrameLayout,
    /// Channel-major analysis history, `history_len` samples per channel
    input: Vec<f32>,
    /// Channel-major reconstruction history
    output: Vec<f32>,
    frames: Array3<f32>,
    offsets: Vec<usize>,
}

impl OverlapAdd {
    pub fn new(layout: FrameLayout) -> Self {
        let len = layout.channels * layout.history_len();
        Self {
            input: vec![0.0; len],
            output: vec![0.0; len],
            frames: Array3::zeros(layout.frame_shape()),
            offsets: layout.window_offsets().collect(),
            layout,
        }
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Run one cycle: consume an interleaved input block, write the
    /// interleaved finalized block to `output_block`.
    ///
    /// On error the output block is silenced and the cycle's contribution is
    /// dropped; the histories stay aligned with the block stream.
    pub fn process_frames<T>(
        &mut self,
        input_block: &[f32],
        output_block: &mut [f32],
        transform: &mut T,
    ) -> Result<(), FrameError>
    where
        T: FrameTransform + ?Sized,
    {
        let expected = self.layout.block_samples();
        for actual in [input_block.len(), output_block.len()] {
            if actual != expected {
                output_block.fill(0.0);
                return Err(FrameError::BlockLength { expected, actual });
            }
        }

        let FrameLayout {
            channels,
            window,
            block,
            ..
        } = self.layout;
        let len = self.layout.history_len();

        // shift both histories left by one block, append the input at the
        // tail and clear the reconstruction tail
        for c in 0..channels {
            let history = &mut self.input[c * len..(c + 1) * len];
            history.copy_within(block.., 0);
            for (i, sample) in history[len - block..].iter_mut().enumerate() {
                *sample = input_block[i * channels + c];
            }

            let reconstruction = &mut self.output[c * len..(c + 1) * len];
            reconstruction.copy_within(block.., 0);
            reconstruction[len - block..].fill(0.0);
        }

        for c in 0..channels {
            let history = &self.input[c * len..(c + 1) * len];
            for (k, &offset) in self.offsets.iter().enumerate() {
                self.frames
                    .slice_mut(s![c, .., k])
                    .assign(&ArrayView1::from(&history[offset..offset + window]));
            }
        }

        let transformed = transform.transform(self.frames.view());
        if transformed.dim() != self.frames.dim() {
            output_block.fill(0.0);
            return Err(FrameError::ShapeMismatch {
                expected: self.frames.dim(),
                actual: transformed.dim(),
            });
        }

        for c in 0..channels {
            let reconstruction = &mut self.output[c * len..(c + 1) * len];
            for (k, &offset) in self.offsets.iter().enumerate() {
                let frame = transformed.slice(s![c, .., k]);
                for (acc, &value) in reconstruction[offset..offset + window].iter_mut().zip(frame.iter()) {
                    *acc += value;
                }
            }
        }

        let start = len - self.layout.output_delay_blocks() * block;
        for c in 0..channels {
            let region = &self.output[c * len + start..c * len + start + block];
            for (i, &sample) in region.iter().enumerate() {
                output_block[i * channels + c] = sample;
            }
        }

        Ok(())
    }

    /// Forget all buffered audio
    pub fn reset(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
    }
}
