//! Circular history buffers shared with the visualization surface.
//!
//! A history is a `rows x capacity` ring of `f32` columns with a single
//! writer and any number of unsynchronized readers. [`HistoryBuffer`] is the
//! writer (writes take `&mut self`); [`HistoryReader`] is a cheap cloneable
//! view for other threads.
//!
//! Writes are atomic per column only. Each column carries a sequence counter
//! (a seqlock): a reader never observes a half-written column, but a
//! snapshot spanning several columns may mix columns from different writes,
//! and may be one write behind the cursor. Displays tolerate that staleness.

use std::hint;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use ndarray::{Array1, Array2, ArrayView2};

use crate::config::PipelineConfig;

struct Shared {
    rows: usize,
    capacity: usize,
    /// Column-major `f32` bit patterns
    cells: Box<[AtomicU32]>,
    /// Per-column sequence; odd while the column is being written
    sequence: Box<[AtomicU64]>,
    cursor: AtomicUsize,
}

impl Shared {
    fn write_column(&self, column: usize, values: impl Iterator<Item = f32>) {
        let seq = &self.sequence[column];
        let start = seq.load(Ordering::Relaxed);
        seq.store(start.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        let cells = &self.cells[column * self.rows..(column + 1) * self.rows];
        for (cell, value) in cells.iter().zip(values) {
            cell.store(value.to_bits(), Ordering::Relaxed);
        }

        seq.store(start.wrapping_add(2), Ordering::Release);
    }

    fn read_column(&self, column: usize, out: &mut [f32]) {
        let seq = &self.sequence[column];
        let cells = &self.cells[column * self.rows..(column + 1) * self.rows];
        loop {
            let before = seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }
            for (value, cell) in out.iter_mut().zip(cells) {
                *value = f32::from_bits(cell.load(Ordering::Relaxed));
            }
            fence(Ordering::Acquire);
            if seq.load(Ordering::Relaxed) == before {
                return;
            }
        }
    }

    #[inline]
    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    fn resolve(&self, index: Option<usize>) -> usize {
        match index {
            Some(index) => index % self.capacity,
            None => (self.cursor() + self.capacity - 1) % self.capacity,
        }
    }

    fn get(&self, index: Option<usize>) -> Array1<f32> {
        let mut column = Array1::zeros(self.rows);
        if let Some(out) = column.as_slice_mut() {
            self.read_column(self.resolve(index), out);
        }
        column
    }

    fn get_unraveled(&self) -> Array2<f32> {
        let cursor = self.cursor();
        let mut snapshot = Array2::zeros((self.rows, self.capacity));
        let mut scratch = vec![0.0; self.rows];
        for i in 0..self.capacity {
            self.read_column((cursor + i) % self.capacity, &mut scratch);
            for (row, &value) in scratch.iter().enumerate() {
                snapshot[[row, i]] = value;
            }
        }
        snapshot
    }
}

/// Single-writer ring of columns.
pub struct HistoryBuffer {
    shared: Arc<Shared>,
}

impl HistoryBuffer {
    /// Create a `(rows, capacity)` history with every cell set to `fill`
    pub fn new(shape: (usize, usize), fill: f32) -> Self {
        let (rows, capacity) = shape;
        assert!(rows > 0 && capacity > 0, "history shape must be non-empty");

        let bits = fill.to_bits();
        Self {
            shared: Arc::new(Shared {
                rows,
                capacity,
                cells: (0..rows * capacity).map(|_| AtomicU32::new(bits)).collect(),
                sequence: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Append columns at the cursor. Returns the new cursor.
    pub fn set(&mut self, columns: ArrayView2<'_, f32>) -> usize {
        let cursor = self.shared.cursor();
        self.set_at(columns, cursor)
    }

    /// Write `columns` (shape `rows x width`) starting at `index`, wrapping to
    /// the front if they run past the end. The cursor moves to just after
    /// the last written column. Returns the new cursor.
    ///
    /// Panics if the row count differs or `width >= capacity`.
    pub fn set_at(&mut self, columns: ArrayView2<'_, f32>, index: usize) -> usize {
        let shared = &*self.shared;
        let (rows, width) = columns.dim();
        assert_eq!(rows, shared.rows, "history row count mismatch");
        assert!(
            width < shared.capacity,
            "write of {} columns exceeds history capacity {}",
            width,
            shared.capacity
        );

        let start = index % shared.capacity;
        for (i, column) in columns.columns().into_iter().enumerate() {
            shared.write_column((start + i) % shared.capacity, column.iter().copied());
        }

        // contiguous writes land on the next column, split writes on the
        // length of the head segment
        let cursor = if start + width <= shared.capacity {
            (start + width) % shared.capacity
        } else {
            start + width - shared.capacity
        };
        shared.cursor.store(cursor, Ordering::Release);
        cursor
    }

    /// Append a single column
    pub fn push(&mut self, column: &[f32]) -> usize {
        let shared = &*self.shared;
        assert_eq!(column.len(), shared.rows, "history row count mismatch");
        let cursor = shared.cursor();
        shared.write_column(cursor, column.iter().copied());
        let next = (cursor + 1) % shared.capacity;
        shared.cursor.store(next, Ordering::Release);
        next
    }

    pub fn get(&self, index: Option<usize>) -> Array1<f32> {
        self.shared.get(index)
    }

    pub fn get_unraveled(&self) -> Array2<f32> {
        self.shared.get_unraveled()
    }

    pub fn size(&self) -> usize {
        self.shared.capacity
    }

    pub fn rows(&self) -> usize {
        self.shared.rows
    }

    pub fn cursor(&self) -> usize {
        self.shared.cursor()
    }

    pub fn reader(&self) -> HistoryReader {
        HistoryReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Read-only view of a [`HistoryBuffer`], safe to use from any thread.
#[derive(Clone)]
pub struct HistoryReader {
    shared: Arc<Shared>,
}

impl HistoryReader {
    /// Column at `index` (modulo capacity), or the most recent column
    pub fn get(&self, index: Option<usize>) -> Array1<f32> {
        self.shared.get(index)
    }

    /// Like [`get`](Self::get) but without allocating
    pub fn get_into(&self, index: Option<usize>, out: &mut [f32]) {
        assert_eq!(out.len(), self.shared.rows, "history row count mismatch");
        self.shared.read_column(self.shared.resolve(index), out);
    }

    /// All columns, oldest first
    pub fn get_unraveled(&self) -> Array2<f32> {
        self.shared.get_unraveled()
    }

    pub fn size(&self) -> usize {
        self.shared.capacity
    }

    pub fn rows(&self) -> usize {
        self.shared.rows
    }
}

/// Every history the processing side publishes to.
pub struct HistorySet {
    /// Estimated target direction index, one row
    pub tdoa: HistoryBuffer,
    /// GCC-PHAT angular spectrum, `num_tdoas` rows
    pub gcc_phat: HistoryBuffer,
    pub input_spectrogram: HistoryBuffer,
    pub output_spectrogram: HistoryBuffer,
    /// Coefficient masks keyed by dictionary size
    pub coefficient_masks: HashMap<usize, HistoryBuffer>,
}

impl HistorySet {
    pub fn new(config: &PipelineConfig) -> Self {
        let num_freq = config.num_freq();
        Self {
            tdoa: HistoryBuffer::new((1, config.tdoa_history), 0.0),
            gcc_phat: HistoryBuffer::new((config.num_tdoas, config.tdoa_history), 0.0),
            input_spectrogram: HistoryBuffer::new((num_freq, config.spectrogram_history), 0.0),
            output_spectrogram: HistoryBuffer::new((num_freq, config.spectrogram_history), 0.0),
            coefficient_masks: config
                .dictionary_sizes
                .iter()
                .map(|&size| (size, HistoryBuffer::new((size, config.spectrogram_history), 0.0)))
                .collect(),
        }
    }

    pub fn readers(&self) -> HistoryReaders {
        HistoryReaders {
            tdoa: self.tdoa.reader(),
            gcc_phat: self.gcc_phat.reader(),
            input_spectrogram: self.input_spectrogram.reader(),
            output_spectrogram: self.output_spectrogram.reader(),
            coefficient_masks: self
                .coefficient_masks
                .iter()
                .map(|(&size, buffer)| (size, buffer.reader()))
                .collect(),
        }
    }
}

/// Reader side of a [`HistorySet`].
#[derive(Clone)]
pub struct HistoryReaders {
    pub tdoa: HistoryReader,
    pub gcc_phat: HistoryReader,
    pub input_spectrogram: HistoryReader,
    pub output_spectrogram: HistoryReader,
    pub coefficient_masks: HashMap<usize, HistoryReader>,
}
