// Block pool - pre-allocated sample buffers circulating over two SPSC rings
//
// Used by the fallback detection path so the capture callback only copies
// samples and never allocates.
//
// Buffer flow:
// 1. Capture side takes an empty buffer from the free ring
// 2. Copies up to `capacity` samples into it
// 3. Pushes it onto the filled ring
// 4. Worker pops it, runs detection, and returns it to the free ring
//
// Samples dropped while the pool is exhausted are not lost from the timeline:
// the count rides on the next queued block as `gap_before`.

use rtrb::{Consumer, Producer, RingBuffer};

pub const DEFAULT_BUFFER_COUNT: usize = 16;
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// One pooled buffer plus the number of samples dropped just before it.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledBlock {
    pub samples: Vec<f32>,
    pub gap_before: u64,
}

impl PooledBlock {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            gap_before: 0,
        }
    }
}

/// Pool sizing plus both ends of the circulation.
pub struct BlockPool;

impl BlockPool {
    /// Allocate `count` buffers of `capacity` samples each.
    ///
    /// Zero values are raised to one so a misconfigured pool still circulates.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(count: usize, capacity: usize) -> (CaptureSide, WorkerSide) {
        let count = count.max(1);
        let capacity = capacity.max(1);

        let (mut free_tx, free_rx) = RingBuffer::new(count);
        let (filled_tx, filled_rx) = RingBuffer::new(count);

        for _ in 0..count {
            // The free ring was sized for exactly `count` buffers.
            let _ = free_tx.push(PooledBlock::with_capacity(capacity));
        }

        (
            CaptureSide {
                free: free_rx,
                filled: filled_tx,
                capacity,
                gap: 0,
            },
            WorkerSide {
                filled: filled_rx,
                free: free_tx,
                count,
            },
        )
    }
}

/// Result of handing one callback's worth of samples to the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub blocks_queued: usize,
    pub samples_dropped: usize,
}

/// Owned by the capture callback.
pub struct CaptureSide {
    free: Consumer<PooledBlock>,
    filled: Producer<PooledBlock>,
    capacity: usize,
    gap: u64,
}

impl CaptureSide {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `samples` into pooled buffers, one buffer per `capacity` chunk.
    ///
    /// When the pool is exhausted the remaining samples are dropped and
    /// their count is carried by the next block that does get queued.
    pub fn submit(&mut self, samples: &[f32]) -> SubmitOutcome {
        let mut outcome = SubmitOutcome::default();
        for chunk in samples.chunks(self.capacity) {
            match self.free.pop() {
                Ok(mut buffer) => {
                    buffer.samples.clear();
                    buffer.samples.extend_from_slice(chunk);
                    buffer.gap_before = self.gap;
                    if let Err(rtrb::PushError::Full(_)) = self.filled.push(buffer) {
                        outcome.samples_dropped += chunk.len();
                        self.gap += chunk.len() as u64;
                    } else {
                        outcome.blocks_queued += 1;
                        self.gap = 0;
                    }
                }
                Err(_) => {
                    outcome.samples_dropped += chunk.len();
                    self.gap += chunk.len() as u64;
                }
            }
        }
        outcome
    }
}

/// Owned by the detection worker.
pub struct WorkerSide {
    filled: Consumer<PooledBlock>,
    free: Producer<PooledBlock>,
    count: usize,
}

impl WorkerSide {
    pub fn next_block(&mut self) -> Option<PooledBlock> {
        self.filled.pop().ok()
    }

    pub fn recycle(&mut self, buffer: PooledBlock) {
        // Capacity equals the buffer count, so a returned buffer always fits.
        let _ = self.free.push(buffer);
    }

    /// Share of buffers waiting to be processed, 0-100.
    pub fn occupancy_percent(&self) -> f32 {
        self.filled.slots() as f32 / self.count as f32 * 100.0
    }

    /// True once the capture side has been dropped and nothing is left to read.
    pub fn is_drained(&self) -> bool {
        self.filled.is_abandoned() && self.filled.is_empty()
    }
}
