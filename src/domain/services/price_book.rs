//! Shared live prices, one lock per instrument.
//!
//! The price ticker is the only writer. The execution engine holds a read guard
//! for the length of a trade so the price it executes at cannot move under it.

use crate::domain::entities::instrument::Instrument;
use crate::domain::value_objects::money::Cents;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::warn;

/// Random-walk state of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceCell {
    pub current: Cents,
    pub min: Cents,
    pub max: Cents,
    pub max_change: Cents,
}

impl PriceCell {
    /// Returns `None` when the bounds are inverted or the step is negative.
    /// A stored price outside the bounds is clamped.
    pub fn new(current: Cents, min: Cents, max: Cents, max_change: Cents) -> Option<Self> {
        if min > max || max_change.value() < 0 {
            return None;
        }
        Some(PriceCell {
            current: current.clamp(min, max),
            min,
            max,
            max_change,
        })
    }

    pub fn from_instrument(instrument: &Instrument) -> Option<Self> {
        Self::new(
            instrument.current_price,
            instrument.min_price,
            instrument.max_price,
            instrument.max_change,
        )
    }
}

pub type SharedPriceCell = Arc<RwLock<PriceCell>>;

#[derive(Clone, Default)]
pub struct PriceBook {
    cells: Arc<StdRwLock<HashMap<String, SharedPriceCell>>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the book from the last durable prices.
    pub fn from_instruments(instruments: &[Instrument]) -> Self {
        let book = Self::new();
        for instrument in instruments {
            book.upsert(instrument);
        }
        book
    }

    /// Adds an instrument if it is not tracked yet and returns its cell.
    pub fn upsert(&self, instrument: &Instrument) -> Option<SharedPriceCell> {
        if let Some(cell) = self.cell(&instrument.symbol) {
            return Some(cell);
        }

        let Some(state) = PriceCell::from_instrument(instrument) else {
            warn!(
                "Skipping {}: invalid price bounds (min {}, max {}, max change {})",
                instrument.symbol, instrument.min_price, instrument.max_price, instrument.max_change
            );
            return None;
        };

        let mut cells = match self.cells.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cell = cells
            .entry(instrument.symbol.clone())
            .or_insert_with(|| Arc::new(RwLock::new(state)))
            .clone();
        Some(cell)
    }

    pub fn cell(&self, symbol: &str) -> Option<SharedPriceCell> {
        let cells = match self.cells.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        cells.get(symbol).cloned()
    }

    /// Cells in symbol order, so each tick walks the universe deterministically.
    pub fn cells(&self) -> Vec<(String, SharedPriceCell)> {
        let cells = match self.cells.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut entries: Vec<_> = cells
            .iter()
            .map(|(symbol, cell)| (symbol.clone(), cell.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn current(&self, symbol: &str) -> Option<Cents> {
        let cell = self.cell(symbol)?;
        let state = cell.read().await;
        Some(state.current)
    }

    /// Current price of every instrument. Each cell is read independently.
    pub async fn snapshot(&self) -> HashMap<String, Cents> {
        let mut prices = HashMap::new();
        for (symbol, cell) in self.cells() {
            prices.insert(symbol, cell.read().await.current);
        }
        prices
    }

    pub fn len(&self) -> usize {
        match self.cells.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
