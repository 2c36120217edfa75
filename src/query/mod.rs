// Retrieval over the persisted index

pub mod engine;
