//! Activation FIFO feeding one row of the systolic array

use crate::numeric::Scalar;

/// Fixed-depth circular buffer of activations
///
/// One slot is always left free, so a FIFO of depth `d` holds at most `d - 1`
/// values: full is `(write + 1) % d == read`, empty is `read == write`.
#[derive(Debug, Clone)]
pub struct ActivationFifo<T> {
    data: Vec<T>,
    read: usize,
    write: usize,
    len: usize,
}

impl<T: Scalar> ActivationFifo<T> {
    pub fn new(depth: usize) -> Self {
        Self {
            data: vec![T::default(); depth.max(1)],
            read: 0,
            write: 0,
            len: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.data.len()
    }

    /// Values the FIFO can hold at once
    pub fn capacity(&self) -> usize {
        self.depth() - 1
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        (self.write + 1) % self.depth() == self.read
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    /// True when a single pop would drain the FIFO
    pub fn is_empty_next_iteration(&self) -> bool {
        (self.read + 1) % self.depth() == self.write
    }

    /// True when two pops would drain the FIFO
    pub fn is_empty_in_two_iterations(&self) -> bool {
        (self.read + 2) % self.depth() == self.write
    }

    /// Append a value; dropped if the FIFO is full
    pub fn push(&mut self, value: T) {
        if self.is_full() {
            log::trace!("activation FIFO full, dropping {}", value);
            return;
        }
        self.data[self.write] = value;
        self.write = (self.write + 1) % self.depth();
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let value = self.data[self.read];
        self.read = (self.read + 1) % self.depth();
        self.len -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.read = 0;
        self.write = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_push_pop_order() {
        let mut fifo = ActivationFifo::<i8>::new(4);
        fifo.push(1);
        fifo.push(2);
        fifo.push(3);
        assert!(fifo.is_full());
        // dropped
        fifo.push(4);
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.pop(), Some(1));
        assert_eq!(fifo.pop(), Some(2));
        assert_eq!(fifo.pop(), Some(3));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_lookahead_queries() {
        let mut fifo = ActivationFifo::<i16>::new(5);
        assert!(fifo.is_empty());
        fifo.push(7);
        assert!(fifo.is_empty_next_iteration());
        assert!(!fifo.is_empty_in_two_iterations());
        fifo.push(8);
        assert!(fifo.is_empty_in_two_iterations());
        assert!(!fifo.is_empty_next_iteration());
    }

    #[test]
    fn test_wraparound_invariant() {
        // guarded push/pop never exceeds capacity or underflows
        let mut fifo = ActivationFifo::<i32>::new(3);
        let mut expected = std::collections::VecDeque::new();
        let mut state = 0x2545_f491u32;
        for step in 0..500 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if state % 3 != 0 {
                if !fifo.is_full() {
                    fifo.push(step);
                    expected.push_back(step);
                }
            } else if !fifo.is_empty() {
                assert_eq!(fifo.pop(), expected.pop_front());
            }
            assert!(fifo.len() <= fifo.capacity());
            assert_eq!(fifo.len(), expected.len());
            assert_eq!(fifo.is_empty(), expected.is_empty());
            assert_eq!(fifo.is_full(), expected.len() == fifo.capacity());
        }
    }
}
