//! Processing elements of the systolic array
//!
//! A PE holds two weight registers and the latched (current) copy of its
//! signals. The next-cycle copy lives in a separate plane owned by the array,
//! so every PE evaluates against the previous commit of its neighbours.

use crate::fifo::ActivationFifo;
use crate::numeric::{NumericTypes, Scalar};

/// Structural variant of a PE, fixed by its position in the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    /// Row 0, column > 0: takes activations from the left, no upper sum
    TopBorder,
    /// Column 0: pops activations from its row FIFO
    LeftBorder,
    /// Takes activations from the left and sums from above
    Interior,
}

impl PeKind {
    pub fn at(x: usize, y: usize) -> Self {
        if x == 0 {
            PeKind::LeftBorder
        } else if y == 0 {
            PeKind::TopBorder
        } else {
            PeKind::Interior
        }
    }
}

/// Registered signals of one PE
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeSignals<T: NumericTypes> {
    pub activation: T::Activation,
    pub sum: T::Accumulator,
    pub valid: bool,
    pub update_weight: bool,
    /// Only used by left-border PEs
    pub fifo_input_enabled: bool,
}

/// Data movement counters collected while evaluating a row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeMetrics {
    pub intra_pe_data_movements: usize,
    pub inter_pe_data_movements: usize,
    pub multiplications_with_weight_zero: usize,
}

impl PeMetrics {
    pub fn merge(&mut self, other: &PeMetrics) {
        self.intra_pe_data_movements += other.intra_pe_data_movements;
        self.inter_pe_data_movements += other.inter_pe_data_movements;
        self.multiplications_with_weight_zero += other.multiplications_with_weight_zero;
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingElement<T: NumericTypes> {
    kind: PeKind,
    x: usize,
    y: usize,
    weights: [T::Weight; 2],
    read_register: usize,
    current: PeSignals<T>,
}

impl<T: NumericTypes> ProcessingElement<T> {
    pub fn new(x: usize, y: usize) -> Self {
        Self {
            kind: PeKind::at(x, y),
            x,
            y,
            weights: [T::Weight::default(); 2],
            read_register: 0,
            current: PeSignals::default(),
        }
    }

    pub fn kind(&self) -> PeKind {
        self.kind
    }

    /// (x, y) = (column, row)
    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    /// Weight used for this cycle's multiplication
    pub fn load_weight(&self) -> T::Weight {
        self.weights[self.read_register]
    }

    /// Stage a weight for the next update
    pub fn store_weight(&mut self, weight: T::Weight) {
        self.weights[1 - self.read_register] = weight;
    }

    /// Swap read and write registers
    pub fn update_weight(&mut self) {
        self.read_register = 1 - self.read_register;
    }

    pub fn staged_weight(&self) -> T::Weight {
        self.weights[1 - self.read_register]
    }

    pub fn has_valid_signal(&self) -> bool {
        self.current.valid
    }

    pub fn has_update_weight_signal(&self) -> bool {
        self.current.update_weight
    }

    pub fn activation(&self) -> T::Activation {
        self.current.activation
    }

    pub fn sum(&self) -> T::Accumulator {
        self.current.sum
    }

    pub fn signals(&self) -> &PeSignals<T> {
        &self.current
    }

    /// Update-weight input as seen from the neighbours' latched signals.
    ///
    /// Returns `None` for the top-left PE, whose input is driven externally.
    pub fn read_update_weight_signal(&self, left: Option<&Self>, upper: Option<&Self>) -> Option<bool> {
        match self.kind {
            PeKind::TopBorder => left.map(|l| l.has_update_weight_signal()),
            PeKind::LeftBorder => upper.map(|u| u.has_update_weight_signal()),
            PeKind::Interior => match (left, upper) {
                (Some(l), Some(u)) => {
                    Some(l.has_update_weight_signal() && u.has_update_weight_signal())
                }
                _ => None,
            },
        }
    }

    /// Evaluate one cycle of multiply-accumulate into `next`
    pub fn compute_sum(
        &self,
        left: Option<&Self>,
        upper: Option<&Self>,
        fifo: &mut ActivationFifo<T::Activation>,
        next: &mut PeSignals<T>,
        metrics: &mut PeMetrics,
    ) {
        let weight = self.load_weight();
        let computed = match self.kind {
            PeKind::TopBorder => match left {
                Some(l) if l.has_valid_signal() => {
                    next.activation = l.activation();
                    next.sum = T::product(next.activation, weight);
                    metrics.intra_pe_data_movements += 3;
                    metrics.inter_pe_data_movements += 1;
                    true
                }
                _ => false,
            },
            PeKind::LeftBorder => {
                let upper_valid = upper.map_or(true, |u| u.has_valid_signal());
                if self.current.fifo_input_enabled && upper_valid {
                    match fifo.pop() {
                        Some(activation) => {
                            next.activation = activation;
                            next.sum = match upper {
                                Some(u) => T::mac(activation, weight, u.sum()),
                                None => T::product(activation, weight),
                            };
                            metrics.intra_pe_data_movements += 3;
                            metrics.inter_pe_data_movements += 1;
                            if upper.is_some() {
                                metrics.inter_pe_data_movements += 1;
                            }
                            true
                        }
                        None => false,
                    }
                } else {
                    false
                }
            }
            PeKind::Interior => match (left, upper) {
                (Some(l), Some(u)) if l.has_valid_signal() && u.has_valid_signal() => {
                    next.activation = l.activation();
                    next.sum = T::mac(next.activation, weight, u.sum());
                    metrics.intra_pe_data_movements += 3;
                    metrics.inter_pe_data_movements += 2;
                    true
                }
                _ => false,
            },
        };

        if computed {
            next.valid = true;
            if weight.is_zero() {
                metrics.multiplications_with_weight_zero += 1;
            }
        }
    }

    /// Clock edge: latch `next`, swapping weights on an update pulse
    pub fn update_state(&mut self, next: &mut PeSignals<T>) {
        if next.update_weight {
            self.update_weight();
        }
        self.current = *next;
        next.valid = false;
        next.update_weight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Int8Types;
    use pretty_assertions::assert_eq;

    type Pe = ProcessingElement<Int8Types>;

    fn latched(x: usize, y: usize, activation: i8, sum: i32, valid: bool) -> Pe {
        let mut pe = Pe::new(x, y);
        let mut next = PeSignals {
            activation,
            sum,
            valid,
            ..PeSignals::default()
        };
        pe.update_state(&mut next);
        pe
    }

    #[test]
    fn test_kinds_by_position() {
        assert_eq!(PeKind::at(0, 0), PeKind::LeftBorder);
        assert_eq!(PeKind::at(0, 5), PeKind::LeftBorder);
        assert_eq!(PeKind::at(3, 0), PeKind::TopBorder);
        assert_eq!(PeKind::at(2, 1), PeKind::Interior);
    }

    #[test]
    fn test_weight_registers_swap() {
        let mut pe = Pe::new(1, 1);
        pe.store_weight(5);
        assert_eq!(pe.load_weight(), 0);
        let mut next = PeSignals {
            update_weight: true,
            ..PeSignals::default()
        };
        pe.update_state(&mut next);
        assert_eq!(pe.load_weight(), 5);
        assert!(pe.has_update_weight_signal());
        assert!(!next.update_weight);
        pe.store_weight(-3);
        assert_eq!(pe.load_weight(), 5);
        assert_eq!(pe.staged_weight(), -3);
    }

    #[test]
    fn test_interior_mac() {
        let mut pe = Pe::new(1, 1);
        pe.store_weight(3);
        pe.update_weight();
        let left = latched(0, 1, 4, 0, true);
        let upper = latched(1, 0, 0, 10, true);
        let mut fifo = ActivationFifo::new(4);
        let mut next = PeSignals::default();
        let mut metrics = PeMetrics::default();
        pe.compute_sum(Some(&left), Some(&upper), &mut fifo, &mut next, &mut metrics);
        assert!(next.valid);
        assert_eq!(next.activation, 4);
        assert_eq!(next.sum, 22);
        assert_eq!(metrics.inter_pe_data_movements, 2);
    }

    #[test]
    fn test_interior_requires_both_neighbours_valid() {
        let pe = Pe::new(1, 1);
        let left = latched(0, 1, 4, 0, true);
        let upper = latched(1, 0, 0, 10, false);
        let mut fifo = ActivationFifo::new(4);
        let mut next = PeSignals::default();
        let mut metrics = PeMetrics::default();
        pe.compute_sum(Some(&left), Some(&upper), &mut fifo, &mut next, &mut metrics);
        assert!(!next.valid);
        assert_eq!(metrics, PeMetrics::default());
    }

    #[test]
    fn test_left_border_pops_only_when_enabled() {
        let mut pe = Pe::new(0, 0);
        pe.store_weight(2);
        pe.update_weight();
        let mut fifo = ActivationFifo::new(4);
        fifo.push(7);
        let mut next = PeSignals::default();
        let mut metrics = PeMetrics::default();

        pe.compute_sum(None, None, &mut fifo, &mut next, &mut metrics);
        assert!(!next.valid);
        assert_eq!(fifo.len(), 1);

        next.fifo_input_enabled = true;
        pe.update_state(&mut next);
        pe.compute_sum(None, None, &mut fifo, &mut next, &mut metrics);
        assert!(next.valid);
        assert_eq!(next.sum, 14);
        assert_eq!(metrics.multiplications_with_weight_zero, 0);
        assert!(fifo.is_empty());

        // empty FIFO stalls the row instead of reading garbage
        pe.update_state(&mut next);
        pe.compute_sum(None, None, &mut fifo, &mut next, &mut metrics);
        assert!(!next.valid);
    }

    #[test]
    fn test_update_weight_propagation_rules() {
        let mut on = Pe::new(0, 0);
        let mut next = PeSignals {
            update_weight: true,
            ..PeSignals::default()
        };
        on.update_state(&mut next);
        let off = Pe::new(0, 0);

        assert_eq!(Pe::new(0, 0).read_update_weight_signal(None, None), None);
        assert_eq!(Pe::new(1, 0).read_update_weight_signal(Some(&on), None), Some(true));
        assert_eq!(Pe::new(0, 1).read_update_weight_signal(None, Some(&on)), Some(true));
        assert_eq!(
            Pe::new(1, 1).read_update_weight_signal(Some(&on), Some(&off)),
            Some(false)
        );
        assert_eq!(
            Pe::new(1, 1).read_update_weight_signal(Some(&on), Some(&on)),
            Some(true)
        );
    }
}
