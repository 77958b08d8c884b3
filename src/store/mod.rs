pub mod database;

pub use database::{
    Database, ItemRecord, NewItem, NewQuery, PriceHistoryRecord, SearchQuery, StoreStatistics,
};
