//! Systolic data setup unit
//!
//! Streams activation row blocks into the per-row FIFOs. Two feed slots let
//! the next row block be queued while the current one is still draining, so
//! the FIFOs never starve between blocks. Each FIFO keeps its own row, block
//! and repetition counters because the FIFOs drain with a one-cycle skew per
//! row.

use crate::fifo::ActivationFifo;
use crate::hardware::bits_required;
use crate::numeric::Scalar;
use crate::tiling::BlockTiling;

#[derive(Debug, Clone, Default)]
struct FeedSlot {
    offset: usize,
    width: usize,
    height: usize,
    blocks: usize,
    idle: usize,
    repetitions: usize,
    row: Vec<usize>,
    block: Vec<usize>,
    repetition: Vec<usize>,
    busy: Vec<bool>,
    active: bool,
}

impl FeedSlot {
    fn new(fifo_count: usize) -> Self {
        Self {
            row: vec![0; fifo_count],
            block: vec![0; fifo_count],
            repetition: vec![0; fifo_count],
            busy: vec![false; fifo_count],
            ..Self::default()
        }
    }

    fn reset_counters(&mut self) {
        self.row.iter_mut().for_each(|r| *r = 0);
        self.block.iter_mut().for_each(|b| *b = 0);
        self.repetition.iter_mut().for_each(|r| *r = 0);
    }

    fn latch(&mut self, next: &FeedSlot) {
        self.offset = next.offset;
        self.width = next.width;
        self.height = next.height;
        self.blocks = next.blocks;
        self.idle = next.idle;
        self.repetitions = next.repetitions;
        self.row.copy_from_slice(&next.row);
        self.block.copy_from_slice(&next.block);
        self.repetition.copy_from_slice(&next.repetition);
        self.busy.copy_from_slice(&next.busy);
        self.active = next.active;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Feed {
    Loaded,
    ZeroFilled,
}

/// Push the next element of `current` for FIFO `fifo_index`, or `None` if
/// that FIFO is done with this slot
fn feed_one<A: Scalar>(
    current: &FeedSlot,
    next: &mut FeedSlot,
    fifo_index: usize,
    fifo_count: usize,
    source: &[A],
    fifo: &mut ActivationFifo<A>,
) -> Option<Feed> {
    if !current.busy[fifo_index] {
        return None;
    }

    let row = current.row[fifo_index];
    let block = current.block[fifo_index];
    let repetition = current.repetition[fifo_index];

    // idle FIFOs lead the last K-block so the live ones line up with the bottom rows
    let idle = if block + 1 == current.blocks { current.idle } else { 0 };
    let feed = if fifo_index >= idle {
        let index =
            current.offset + row * current.width + block * fifo_count + fifo_index - idle;
        fifo.push(source[index]);
        Feed::Loaded
    } else {
        fifo.push(A::default());
        Feed::ZeroFilled
    };

    if row + 1 < current.height {
        next.row[fifo_index] = row + 1;
    } else {
        next.row[fifo_index] = 0;
        if block + 1 < current.blocks {
            next.block[fifo_index] = block + 1;
        } else if repetition + 1 < current.repetitions {
            next.block[fifo_index] = 0;
            next.repetition[fifo_index] = repetition + 1;
        } else {
            next.busy[fifo_index] = false;
        }
    }

    Some(feed)
}

pub struct SystolicDataSetupUnit {
    fifo_count: usize,
    current: [FeedSlot; 2],
    next: [FeedSlot; 2],
    precedence: usize,
    precedence_next: usize,
    active: bool,
    busy: bool,
    load_count: usize,
    width_max: usize,
    height_max: usize,
    blocks_max: usize,
    repetitions_max: usize,
    idle_max: usize,
}

impl SystolicDataSetupUnit {
    pub fn new(fifo_count: usize) -> Self {
        Self {
            fifo_count,
            current: [FeedSlot::new(fifo_count), FeedSlot::new(fifo_count)],
            next: [FeedSlot::new(fifo_count), FeedSlot::new(fifo_count)],
            precedence: 0,
            precedence_next: 0,
            active: false,
            busy: false,
            load_count: 0,
            width_max: 0,
            height_max: 0,
            blocks_max: 0,
            repetitions_max: 0,
            idle_max: 0,
        }
    }

    /// Both slots occupied; further matrices must wait
    pub fn has_busy_signal(&self) -> bool {
        self.busy
    }

    /// At least one slot still feeding
    pub fn has_active_signal(&self) -> bool {
        self.active
    }

    /// Slot whose elements are pushed first
    pub fn precedence(&self) -> usize {
        self.precedence
    }

    /// Queue a row-major `height`x`width` block starting at element `offset`.
    ///
    /// The block is replayed `repetitions` times, once per weight column block.
    /// Returns false (and drops the block) if both slots are occupied.
    pub fn add_input_matrix(
        &mut self,
        offset: usize,
        width: usize,
        height: usize,
        repetitions: usize,
    ) -> bool {
        if self.busy {
            log::debug!("data setup unit busy, dropping block at offset {}", offset);
            return false;
        }

        let slot = if self.current[0].active { 1 } else { 0 };
        let tiling = BlockTiling::new(width, self.fifo_count);
        let next = &mut self.next[slot];
        next.offset = offset;
        next.width = width;
        next.height = height;
        next.blocks = tiling.blocks;
        next.idle = tiling.idle();
        next.repetitions = repetitions;
        next.reset_counters();
        next.busy.iter_mut().for_each(|b| *b = true);
        next.active = true;

        self.precedence_next = if self.next[1 - slot].active { 1 - slot } else { slot };

        self.width_max = self.width_max.max(width);
        self.height_max = self.height_max.max(height);
        self.blocks_max = self.blocks_max.max(tiling.blocks);
        self.repetitions_max = self.repetitions_max.max(repetitions);
        self.idle_max = self.idle_max.max(tiling.idle());

        log::trace!(
            "data setup unit: slot {} takes {}x{} block at offset {} ({} repetitions)",
            slot,
            height,
            width,
            offset,
            repetitions
        );
        true
    }

    pub fn run_iteration<A: Scalar>(&mut self, source: &[A], fifos: &mut [ActivationFifo<A>]) {
        if !self.active {
            return;
        }

        let first = self.precedence;
        let second = 1 - first;
        for (fifo_index, fifo) in fifos.iter_mut().enumerate().take(self.fifo_count) {
            if fifo.is_full() {
                continue;
            }

            let mut outcome = None;
            if self.current[first].active {
                outcome = feed_one(
                    &self.current[first],
                    &mut self.next[first],
                    fifo_index,
                    self.fifo_count,
                    source,
                    fifo,
                );
            }
            if outcome.is_none() && self.current[second].active {
                outcome = feed_one(
                    &self.current[second],
                    &mut self.next[second],
                    fifo_index,
                    self.fifo_count,
                    source,
                    fifo,
                );
            }
            if outcome == Some(Feed::Loaded) {
                self.load_count += 1;
            }
        }

        for slot in 0..2 {
            let next = &mut self.next[slot];
            next.active = next.busy.iter().any(|&b| b);
            if !next.active {
                next.reset_counters();
                if self.current[slot].active {
                    self.precedence_next = 1 - slot;
                }
            }
        }
    }

    pub fn update_state(&mut self) {
        for slot in 0..2 {
            self.current[slot].latch(&self.next[slot]);
        }
        self.precedence = self.precedence_next;
        self.active = self.current[0].active || self.current[1].active;
        self.busy = self.current[0].active && self.current[1].active;
    }

    /// Drop all queued blocks
    pub fn reset(&mut self) {
        for slot in self.current.iter_mut().chain(self.next.iter_mut()) {
            slot.reset_counters();
            slot.busy.iter_mut().for_each(|b| *b = false);
            slot.active = false;
        }
        self.precedence = 0;
        self.precedence_next = 0;
        self.active = false;
        self.busy = false;
    }

    /// Elements read from the unified buffer (zero padding excluded)
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn reset_load_count(&mut self) {
        self.load_count = 0;
    }

    pub fn reset_max_register_values(&mut self) {
        self.width_max = 0;
        self.height_max = 0;
        self.blocks_max = 0;
        self.repetitions_max = 0;
        self.idle_max = 0;
    }

    /// Per-FIFO counters and per-slot descriptors, both duplicated for the two slots
    pub fn control_register_bits(&self, unified_buffer_bytes: usize) -> usize {
        let height = bits_required(self.height_max);
        let blocks = bits_required(self.blocks_max);
        let repetitions = bits_required(self.repetitions_max);
        2 * (self.fifo_count * (height + blocks + repetitions + 1)
            + bits_required(unified_buffer_bytes)
            + bits_required(self.width_max)
            + height
            + blocks
            + repetitions
            + bits_required(self.idle_max)
            + 1)
            + 3
    }
}
