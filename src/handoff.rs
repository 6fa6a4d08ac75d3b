//! Block-synchronous handoff between the audio I/O and processing sides.
//!
//! One interleaved input block travels to the processing side and one
//! output block travels back per cycle. Blocks move through a pair of
//! single-block `rtrb` rings; two signals provide the rendezvous:
//!
//! 1. transport writes the input block, clears *done*, sets *requested*,
//!    then blocks on *done*
//! 2. processing wakes on *requested*, clears it, runs one cycle, writes
//!    the output block and sets *done*
//! 3. transport wakes and reads the output block
//!
//! Only one handoff is ever outstanding. Both waits end early with
//! [`Terminated`] and any in-flight block is abandoned.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::Terminated;
use crate::signal::{Signal, Terminate, Waiter};

/// Create both ends for blocks of `block_samples` interleaved samples.
///
/// `compute` is the waiter of the thread that will own the [`ComputeEnd`];
/// the transport end gets its own waiter from `terminate`.
pub fn channel(block_samples: usize, terminate: &Terminate, compute: &Waiter) -> (TransportEnd, ComputeEnd) {
    let (input_tx, input_rx) = RingBuffer::new(block_samples);
    let (output_tx, output_rx) = RingBuffer::new(block_samples);

    let waiter = terminate.waiter();
    let requested = compute.signal();
    let done = waiter.signal();

    let transport = TransportEnd {
        input: input_tx,
        output: output_rx,
        requested: requested.clone(),
        done: done.clone(),
        waiter,
        block_samples,
        cycles: 0,
        dropped: 0,
    };
    let compute = ComputeEnd {
        input: input_rx,
        output: output_tx,
        requested,
        done,
        input_block: vec![0.0; block_samples],
        output_block: vec![0.0; block_samples],
        cycles: 0,
    };
    (transport, compute)
}

/// Audio I/O side. Lives inside the device callback.
pub struct TransportEnd {
    input: Producer<f32>,
    output: Consumer<f32>,
    requested: Signal,
    done: Signal,
    waiter: Waiter,
    block_samples: usize,
    cycles: u64,
    dropped: u64,
}

impl TransportEnd {
    /// Hand `input` to the processing side and wait for the matching
    /// output block. Both slices hold exactly one interleaved block.
    pub fn exchange(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), Terminated> {
        debug_assert_eq!(input.len(), self.block_samples);
        debug_assert_eq!(output.len(), self.block_samples);

        let n = self.block_samples.min(input.len());
        match self.input.write_chunk_uninit(n) {
            Ok(chunk) => {
                chunk.fill_from_iter(input[..n].iter().copied());
            }
            Err(_) => {
                // previous block still queued: the peer abandoned a cycle
                self.dropped += 1;
                output.fill(0.0);
                return Ok(());
            }
        }

        self.done.clear();
        self.requested.set();
        self.waiter.wait(&self.done)?;
        self.done.clear();

        match self.output.read_chunk(self.output.slots()) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                let (head, tail) = output.split_at_mut(first.len().min(output.len()));
                head.copy_from_slice(&first[..head.len()]);
                let m = second.len().min(tail.len());
                tail[..m].copy_from_slice(&second[..m]);
                tail[m..].fill(0.0);
                chunk.commit_all();
            }
            Err(_) => output.fill(0.0),
        }

        self.cycles += 1;
        Ok(())
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    /// Completed exchanges
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Blocks replaced by silence because the previous input was never taken
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_done(&self) -> bool {
        self.done.is_set()
    }
}

/// Processing side. Owned by the processing thread.
pub struct ComputeEnd {
    input: Consumer<f32>,
    output: Producer<f32>,
    requested: Signal,
    done: Signal,
    input_block: Vec<f32>,
    output_block: Vec<f32>,
    cycles: u64,
}

impl ComputeEnd {
    pub fn is_requested(&self) -> bool {
        self.requested.is_set()
    }

    /// Serve the pending handoff, if any, with `cycle(input, output)`.
    /// Returns whether a block was served.
    pub fn try_serve(&mut self, cycle: impl FnOnce(&[f32], &mut [f32])) -> bool {
        if !self.requested.take() {
            return false;
        }

        let n = self.input.slots().min(self.input_block.len());
        if let Ok(chunk) = self.input.read_chunk(n) {
            let (first, second) = chunk.as_slices();
            self.input_block[..first.len()].copy_from_slice(first);
            self.input_block[first.len()..first.len() + second.len()].copy_from_slice(second);
            chunk.commit_all();
        }
        self.input_block[n..].fill(0.0);

        self.output_block.fill(0.0);
        cycle(&self.input_block, &mut self.output_block);

        if let Ok(chunk) = self.output.write_chunk_uninit(self.output_block.len()) {
            chunk.fill_from_iter(self.output_block.iter().copied());
        }

        self.cycles += 1;
        self.done.set();
        true
    }

    /// Block on `waiter` until a handoff is requested, then serve it.
    pub fn serve(&mut self, waiter: &Waiter, cycle: impl FnOnce(&[f32], &mut [f32])) -> Result<(), Terminated> {
        waiter.wait(&self.requested)?;
        self.try_serve(cycle);
        Ok(())
    }

    /// Served cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}
