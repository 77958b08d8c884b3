pub mod client;
pub mod images;
pub mod types;

pub use client::{MarketplaceClient, SearchProvider};
pub use types::{Listing, SearchParams};
