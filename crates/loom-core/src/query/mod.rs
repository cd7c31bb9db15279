pub mod cache;
pub mod guards;
pub mod scoring;
pub mod search;
