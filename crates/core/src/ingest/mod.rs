pub mod catalog;
pub mod fetcher;
pub mod provider;
pub mod types;
pub mod yahoo;
