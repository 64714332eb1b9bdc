use crate::domain::services::price_book::PriceCell;
use crate::domain::value_objects::money::Cents;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bounded random walk shared by every instrument.
///
/// One generator lives for the whole process and is owned by the price ticker.
/// Seeding it makes a run reproducible.
pub struct PriceGenerator {
    rng: StdRng,
}

impl PriceGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Draws the next move for `cell`, writes it back and returns the new price.
    ///
    /// The delta is uniform in `[-max_change, max_change]`. A zero draw becomes
    /// +1 or -1 so the price always moves. When the clamped result would equal
    /// the current price (pinned against a bound) the move is mirrored.
    pub fn advance(&mut self, cell: &mut PriceCell) -> Cents {
        let max_change = cell.max_change.value();
        if max_change <= 0 || cell.min >= cell.max {
            cell.current = cell.current.clamp(cell.min, cell.max);
            return cell.current;
        }

        let mut delta = self.rng.gen_range(-max_change..=max_change);
        if delta == 0 {
            delta = if self.rng.gen_bool(0.5) { 1 } else { -1 };
        }

        let mut next = Self::step(cell, delta);
        if next == cell.current {
            next = Self::step(cell, -delta);
        }

        cell.current = next;
        next
    }

    fn step(cell: &PriceCell, delta: i64) -> Cents {
        let moved = cell.current.value().saturating_add(delta);
        Cents::new(moved).clamp(cell.min, cell.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(current: i64, min: i64, max: i64, max_change: i64) -> PriceCell {
        PriceCell::new(
            Cents::new(current),
            Cents::new(min),
            Cents::new(max),
            Cents::new(max_change),
        )
        .unwrap()
    }

    #[test]
    fn test_price_stays_in_bounds_and_moves() {
        let mut generator = PriceGenerator::new(Some(42));
        let mut state = cell(500, 490, 510, 2);

        for _ in 0..10_000 {
            let previous = state.current;
            let next = generator.advance(&mut state);
            assert!(next >= state.min && next <= state.max);
            assert_ne!(next, previous);
            assert!((next.value() - previous.value()).abs() <= 2);
        }
    }

    #[test]
    fn test_pinned_at_bound_moves_away() {
        let mut generator = PriceGenerator::new(Some(7));
        let mut state = cell(600, 400, 600, 5);

        for _ in 0..1_000 {
            state.current = state.max;
            let next = generator.advance(&mut state);
            assert!(next < state.max);
            assert!(next >= Cents::new(595));
        }
    }

    #[test]
    fn test_one_cent_band_alternates() {
        let mut generator = PriceGenerator::new(Some(1));
        let mut state = cell(100, 100, 101, 3);

        let mut previous = state.current;
        for _ in 0..100 {
            let next = generator.advance(&mut state);
            assert_ne!(next, previous);
            previous = next;
        }
    }

    #[test]
    fn test_degenerate_bounds_hold_price() {
        let mut generator = PriceGenerator::new(Some(3));
        let mut state = cell(250, 250, 250, 2);
        assert_eq!(generator.advance(&mut state), Cents::new(250));

        let mut frozen = cell(300, 200, 400, 0);
        assert_eq!(generator.advance(&mut frozen), Cents::new(300));
    }

    #[test]
    fn test_same_seed_same_walk() {
        let mut a = PriceGenerator::new(Some(99));
        let mut b = PriceGenerator::new(Some(99));
        let mut cell_a = cell(1000, 0, 2000, 10);
        let mut cell_b = cell_a;

        for _ in 0..500 {
            assert_eq!(a.advance(&mut cell_a), b.advance(&mut cell_b));
        }
    }

    #[test]
    fn test_all_deltas_are_reachable() {
        let mut generator = PriceGenerator::new(Some(11));
        let mut seen = std::collections::HashSet::new();

        for _ in 0..5_000 {
            let mut state = cell(1000, 0, 2000, 2);
            let next = generator.advance(&mut state);
            seen.insert(next.value() - 1000);
        }

        let expected: std::collections::HashSet<i64> = [-2, -1, 1, 2].into_iter().collect();
        assert_eq!(seen, expected);
    }
}
