use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::actors::subscriber_hub::BroadcastTrigger;
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::services::price_book::PriceBook;
use crate::domain::services::price_generator::PriceGenerator;
use crate::domain::value_objects::money::Cents;

/// Message for the price ticker
#[derive(Debug)]
pub enum TickerMessage {
    /// Run one tick immediately, outside the schedule
    TickNow,
    /// Shutdown the ticker
    Shutdown,
}

/// Actor that advances every instrument's price on a fixed period, persists the
/// batch and signals the hubs.
pub struct PriceTicker {
    prices: PriceBook,
    generator: PriceGenerator,
    store: Arc<dyn TradingStore>,
    triggers: Vec<BroadcastTrigger>,
    tick_interval: Duration,
    ticks: u64,
}

impl PriceTicker {
    pub fn new(
        prices: PriceBook,
        generator: PriceGenerator,
        store: Arc<dyn TradingStore>,
        tick_interval: Duration,
    ) -> Self {
        PriceTicker {
            prices,
            generator,
            store,
            triggers: Vec::new(),
            tick_interval,
            ticks: 0,
        }
    }

    pub fn with_trigger(mut self, trigger: BroadcastTrigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    /// Advances every price once.
    ///
    /// Each cell is write-locked only for its own step. A failed save is
    /// logged and the in-memory prices stand; the hubs are signalled either way.
    pub async fn tick(&mut self) -> Vec<(String, Cents)> {
        let cells = self.prices.cells();
        let mut updated = Vec::with_capacity(cells.len());

        for (symbol, cell) in cells {
            let mut state = cell.write().await;
            let previous = state.current;
            let next = self.generator.advance(&mut state);
            drop(state);

            debug!("{}: {} -> {}", symbol, previous, next);
            updated.push((symbol, next));
        }

        self.ticks += 1;

        if let Err(e) = self.store.save_prices(&updated).await {
            error!(
                "Tick {}: failed to persist {} prices, continuing from memory: {}",
                self.ticks,
                updated.len(),
                e
            );
        }

        for trigger in &self.triggers {
            trigger.fire();
        }

        updated
    }

    /// Run the ticker
    pub async fn run(mut self, mut rx: mpsc::Receiver<TickerMessage>) {
        info!(
            "Starting price ticker for {} instruments with interval {:?}",
            self.prices.len(),
            self.tick_interval
        );
        if self.prices.is_empty() {
            warn!("Price ticker has no instruments to move");
        }

        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(TickerMessage::TickNow) => {
                            self.tick().await;
                        }
                        Some(TickerMessage::Shutdown) => {
                            info!("Price ticker shutting down after {} ticks", self.ticks);
                            break;
                        }
                        None => {
                            error!("Price ticker message channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Spawn the price ticker
pub fn spawn_price_ticker(ticker: PriceTicker) -> (mpsc::Sender<TickerMessage>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<TickerMessage>(16);
    let handle = tokio::spawn(async move {
        ticker.run(rx).await;
    });
    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::instrument::Instrument;
    use crate::persistence::memory::{FailPoint, InMemoryTradingStore};
    use chrono::Utc;

    fn instrument(id: i64, symbol: &str, price: i64) -> Instrument {
        Instrument {
            id,
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            opening_price: Cents::new(price),
            current_price: Cents::new(price),
            min_price: Cents::new(price - 10),
            max_price: Cents::new(price + 10),
            max_change: Cents::new(2),
            sentiment_score: 0.0,
            updated_at: Utc::now(),
        }
    }

    fn setup() -> (Arc<InMemoryTradingStore>, PriceBook, PriceTicker) {
        let store = Arc::new(InMemoryTradingStore::new());
        store.add_instrument(instrument(1, "AAA", 500));
        store.add_instrument(instrument(2, "BBB", 1_000));
        let prices = PriceBook::from_instruments(&store.instruments());
        let ticker = PriceTicker::new(
            prices.clone(),
            PriceGenerator::new(Some(5)),
            store.clone(),
            Duration::from_secs(3600),
        );
        (store, prices, ticker)
    }

    #[tokio::test]
    async fn test_tick_moves_and_persists_every_price() {
        let (store, prices, mut ticker) = setup();

        let updated = ticker.tick().await;

        assert_eq!(updated.len(), 2);
        for (symbol, price) in &updated {
            assert_eq!(prices.current(symbol).await, Some(*price));
            let saved = store.get_instrument_by_symbol(symbol).await.unwrap().unwrap();
            assert_eq!(saved.current_price, *price);
            assert_ne!(saved.current_price, saved.opening_price);
        }
        assert_eq!(store.price_saves(), 1);
    }

    #[tokio::test]
    async fn test_prices_stay_in_bounds_over_many_ticks() {
        let (_store, prices, mut ticker) = setup();
        for _ in 0..500 {
            ticker.tick().await;
        }
        let aaa = prices.current("AAA").await.unwrap();
        assert!(aaa >= Cents::new(490) && aaa <= Cents::new(510));
    }

    #[tokio::test]
    async fn test_save_failure_keeps_ticking() {
        let (store, prices, ticker) = setup();
        let trigger = BroadcastTrigger::new();
        let mut ticker = ticker.with_trigger(trigger.clone());

        store.fail_at(FailPoint::SavePrices);
        let first = ticker.tick().await;
        let second = ticker.tick().await;

        assert_eq!(store.price_saves(), 0);
        assert_eq!(prices.current("AAA").await, Some(second[0].1));
        assert_ne!(first[0].1, second[0].1);
        let stored = store.get_instrument_by_symbol("AAA").await.unwrap().unwrap();
        assert_eq!(stored.current_price, Cents::new(500));

        // Hubs still hear about the tick
        tokio::time::timeout(Duration::from_secs(1), trigger.fired())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tick_now_and_shutdown() {
        let (store, _prices, ticker) = setup();
        let trigger = BroadcastTrigger::new();
        let (tx, handle) = spawn_price_ticker(ticker.with_trigger(trigger.clone()));

        tx.send(TickerMessage::TickNow).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), trigger.fired())
            .await
            .unwrap();
        assert_eq!(store.price_saves(), 1);

        tx.send(TickerMessage::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_scheduled_ticks() {
        let store = Arc::new(InMemoryTradingStore::new());
        store.add_instrument(instrument(1, "AAA", 500));
        let prices = PriceBook::from_instruments(&store.instruments());
        let ticker = PriceTicker::new(
            prices,
            PriceGenerator::new(Some(9)),
            store.clone(),
            Duration::from_millis(100),
        );
        let (tx, _handle) = spawn_price_ticker(ticker);

        // No tick at startup
        assert_eq!(store.price_saves(), 0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(store.price_saves() >= 2);

        tx.send(TickerMessage::Shutdown).await.unwrap();
    }
}
