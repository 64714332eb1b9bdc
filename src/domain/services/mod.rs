pub mod execution_engine;
pub mod price_book;
pub mod price_generator;
pub mod snapshot_builder;
