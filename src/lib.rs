//! Ragbus - article search, recommendation and quiz generation over a
//! message broker
//!
//! A RAG service answering natural-language queries over a corpus of indexed
//! articles. Callers talk to it via RPC layered on RabbitMQ: requests are
//! published to a direct exchange and responses travel back over a private
//! reply queue, correlated by id. Retrieval runs against a Qdrant collection
//! of embedded article chunks; answers are produced by a llama.cpp server.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod indexer;
pub mod protocol;
pub mod retrieval;
pub mod rpc;
pub mod service;

pub use error::{RagbusError, Result};
