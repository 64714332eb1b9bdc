pub mod account;
pub mod instrument;
pub mod news;
pub mod order;
pub mod position;
pub mod watchlist;
