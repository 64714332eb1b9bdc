use crate::domain::entities::account::AccountId;
use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};

/// Price alert an account keeps on an instrument. Independent of trading.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchlistEntry {
    pub account_id: AccountId,
    pub instrument_id: i64,
    pub symbol: String,
    pub target_price: Cents,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
