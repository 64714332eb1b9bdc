use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};

pub type AccountId = i64;

/// A trading account. Credentials live with the auth collaborator, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub email: String,
    pub cash_balance: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn can_afford(&self, notional: Cents) -> bool {
        notional <= self.cash_balance
    }
}
