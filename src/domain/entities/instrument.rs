use crate::domain::value_objects::money::Cents;
use chrono::{DateTime, Utc};

/// A tradable instrument and its simulated price state as last persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub opening_price: Cents,
    pub current_price: Cents,
    pub min_price: Cents,
    pub max_price: Cents,
    /// Maximum absolute move per tick.
    pub max_change: Cents,
    /// Aggregate news sentiment, maintained by the news collaborator.
    pub sentiment_score: f32,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    /// Bounds are usable by the random walk only when `min <= max`.
    pub fn has_valid_bounds(&self) -> bool {
        self.min_price <= self.max_price && self.max_change.value() >= 0
    }

    /// Price movement since the opening reference price.
    pub fn change_since_open(&self, current: Cents) -> Cents {
        current - self.opening_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(min: i64, max: i64) -> Instrument {
        Instrument {
            id: 1,
            symbol: "ACME".to_string(),
            name: "Acme Corp".to_string(),
            opening_price: Cents::new(500),
            current_price: Cents::new(500),
            min_price: Cents::new(min),
            max_price: Cents::new(max),
            max_change: Cents::new(2),
            sentiment_score: 0.0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_bounds_validation() {
        assert!(instrument(400, 600).has_valid_bounds());
        assert!(instrument(500, 500).has_valid_bounds());
        assert!(!instrument(600, 400).has_valid_bounds());
    }

    #[test]
    fn test_change_since_open() {
        let i = instrument(400, 600);
        assert_eq!(i.change_since_open(Cents::new(525)), Cents::new(25));
        assert_eq!(i.change_since_open(Cents::new(480)), Cents::new(-20));
    }
}
