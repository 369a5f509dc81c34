pub mod improvements;
pub mod indexer;
pub mod profile;
pub mod retrieval;
pub mod scorer;
