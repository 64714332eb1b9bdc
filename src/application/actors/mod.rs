pub mod price_ticker;
pub mod snapshot_sources;
pub mod subscriber_hub;

pub use price_ticker::{spawn_price_ticker, PriceTicker, TickerMessage};
pub use snapshot_sources::{DashboardHub, DashboardSource, MarketHub, MarketSource};
pub use subscriber_hub::{BroadcastTrigger, ConnectionId, HubHandle, SnapshotSource, SubscriberSink};
