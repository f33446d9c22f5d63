// Library interface for fuelscope modules
// This allows tests and the binary to import modules

pub mod agent;
pub mod cache;
pub mod chunking;
pub mod error;
pub mod gnews;
pub mod indexer;
pub mod ingestion;
pub mod kakao;
pub mod llm;
pub mod opinet;
pub mod pipeline;
pub mod schema;
pub mod scraping;
pub mod stations;
pub mod storage;

pub use error::Error;

#[cfg(test)]
pub(crate) mod test_utils;
