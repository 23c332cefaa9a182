//! RPC layered on a one-way publish/subscribe transport
//!
//! Requests are published to a durable direct exchange with a fresh
//! correlation id and a `reply_to` address; the server publishes the result
//! back to that address tagged with the same id. The client resolves the
//! matching in-flight call from a single background consumer on a private
//! reply queue.

mod client;
mod connection;
mod server;

pub use client::RpcClient;
pub use connection::{BrokerConnection, ConnectionState};
pub use server::{RequestMeta, RpcHandler, RpcServer};

/// Header carrying the shared service API key
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header carrying an optional caller-supplied trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";
