//! Snapshot sources for the two hubs: per-account dashboards and
//! per-instrument market views.

use crate::application::actors::subscriber_hub::{HubHandle, SnapshotSource};
use crate::domain::entities::account::AccountId;
use crate::domain::errors::SnapshotError;
use crate::domain::services::snapshot_builder::{AccountSnapshot, MarketSnapshot, SnapshotBuilder};
use async_trait::async_trait;

pub type DashboardHub = HubHandle<AccountId>;
pub type MarketHub = HubHandle<String>;

pub struct DashboardSource {
    builder: SnapshotBuilder,
}

impl DashboardSource {
    pub fn new(builder: SnapshotBuilder) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl SnapshotSource for DashboardSource {
    type Key = AccountId;
    type Snapshot = AccountSnapshot;

    async fn snapshot(&self, account_id: &AccountId) -> Result<AccountSnapshot, SnapshotError> {
        self.builder.build_account_snapshot(*account_id).await
    }
}

pub struct MarketSource {
    builder: SnapshotBuilder,
}

impl MarketSource {
    pub fn new(builder: SnapshotBuilder) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl SnapshotSource for MarketSource {
    type Key = String;
    type Snapshot = MarketSnapshot;

    async fn snapshot(&self, symbol: &String) -> Result<MarketSnapshot, SnapshotError> {
        self.builder.build_market_snapshot(symbol).await
    }
}
