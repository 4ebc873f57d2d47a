pub mod archive;
pub mod cache;
pub mod coordinates;
pub mod fetcher;
pub mod types;
