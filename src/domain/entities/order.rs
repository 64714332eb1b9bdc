use crate::domain::entities::account::AccountId;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderSide {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(ValidationError::InvalidSide(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Executed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Executed => "EXECUTED",
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXECUTED" => Ok(OrderStatus::Executed),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// A validated trade intent. Construction guarantees a non-empty symbol and a
/// strictly positive quantity, so the engine never sees either.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRequest {
    account_id: AccountId,
    symbol: String,
    side: OrderSide,
    quantity: i64,
}

impl TradeRequest {
    pub fn new(
        account_id: AccountId,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
    ) -> Result<Self, ValidationError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(ValidationError::InvalidSymbol(
                "symbol must not be empty".to_string(),
            ));
        }
        if quantity <= 0 {
            return Err(ValidationError::InvalidQuantity(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }

        Ok(TradeRequest {
            account_id,
            symbol: symbol.to_uppercase(),
            side,
            quantity,
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }
}

/// Order row about to be appended to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub account_id: AccountId,
    pub instrument_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Cents,
    pub notional: Cents,
    pub realized_pnl: Cents,
    pub executed_at: DateTime<Utc>,
}

/// Immutable ledger entry, created once per executed sub-order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRecord {
    pub id: i64,
    pub account_id: AccountId,
    pub instrument_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub quantity: i64,
    pub price: Cents,
    pub notional: Cents,
    pub realized_pnl: Cents,
    pub executed_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn from_new(id: i64, order: NewOrder) -> Self {
        OrderRecord {
            id,
            account_id: order.account_id,
            instrument_id: order.instrument_id,
            symbol: order.symbol,
            side: order.side,
            status: OrderStatus::Executed,
            quantity: order.quantity,
            price: order.price,
            notional: order.notional,
            realized_pnl: order.realized_pnl,
            executed_at: order.executed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_request_valid() {
        let request = TradeRequest::new(1, " acme ", OrderSide::Buy, 10).unwrap();
        assert_eq!(request.symbol(), "ACME");
        assert_eq!(request.quantity(), 10);
        assert_eq!(request.side(), OrderSide::Buy);
    }

    #[test]
    fn test_trade_request_rejects_zero_quantity() {
        let result = TradeRequest::new(1, "ACME", OrderSide::Sell, 0);
        assert!(matches!(result, Err(ValidationError::InvalidQuantity(_))));
    }

    #[test]
    fn test_trade_request_rejects_negative_quantity() {
        let result = TradeRequest::new(1, "ACME", OrderSide::Buy, -5);
        assert!(matches!(result, Err(ValidationError::InvalidQuantity(_))));
    }

    #[test]
    fn test_trade_request_rejects_empty_symbol() {
        let result = TradeRequest::new(1, "  ", OrderSide::Buy, 5);
        assert!(matches!(result, Err(ValidationError::InvalidSymbol(_))));
    }

    #[test]
    fn test_order_side_parsing() {
        assert_eq!("buy".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("SELL".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert!("hold".parse::<OrderSide>().is_err());
    }

    #[test]
    fn test_order_side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1);
        assert_eq!(OrderSide::Sell.sign(), -1);
    }
}
