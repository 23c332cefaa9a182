//! RPC client: publish a request, await the correlated response
//!
//! One background task owns a private, exclusive, auto-deleting reply queue
//! and resolves in-flight calls by correlation id. The queue is re-declared
//! whenever the broker connection recovers; the shared
//! `amq.rabbitmq.reply-to` mechanism is deliberately not used because it
//! does not survive reconnects or consumer cancellation.

use crate::error::{RagbusError, Result};
use crate::rpc::connection::BrokerConnection;
use crate::rpc::{API_KEY_HEADER, TRACE_ID_HEADER};
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

/// Delay between reply-consumer re-establishment attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Polling interval while waiting for the reply consumer to come up
const REPLY_READY_POLL: Duration = Duration::from_millis(50);

/// Table of in-flight calls keyed by correlation id.
///
/// Invariant: every entry is resolved or failed exactly once. Completion
/// removes the entry before sending, so a duplicate response for the same id
/// finds nothing and is dropped.
#[derive(Default)]
pub(crate) struct PendingCalls {
    inner: Mutex<HashMap<String, oneshot::Sender<Vec<u8>>>>,
}

impl PendingCalls {
    /// Register a call and hand back the receiving end of its future
    fn register(&self, correlation_id: &str) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("pending-call table poisoned")
            .insert(correlation_id.to_string(), tx);
        rx
    }

    /// Resolve the call registered under `correlation_id`, if any.
    /// Returns false when the id is unknown (already timed out or resolved).
    fn complete(&self, correlation_id: &str, body: Vec<u8>) -> bool {
        let sender = self
            .inner
            .lock()
            .expect("pending-call table poisoned")
            .remove(correlation_id);
        match sender {
            Some(tx) => tx.send(body).is_ok(),
            None => false,
        }
    }

    /// Remove an entry without resolving it (timeout/cancellation path)
    fn remove(&self, correlation_id: &str) -> bool {
        self.inner
            .lock()
            .expect("pending-call table poisoned")
            .remove(correlation_id)
            .is_some()
    }

    /// Drop every pending sender; receivers observe `ConnectionLost`
    fn fail_all(&self) {
        let drained: Vec<_> = {
            let mut map = self.inner.lock().expect("pending-call table poisoned");
            map.drain().collect()
        };
        if !drained.is_empty() {
            tracing::warn!("Failing {} in-flight RPC calls", drained.len());
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("pending-call table poisoned").len()
    }
}

/// RPC client bound to one exchange
pub struct RpcClient {
    conn: Arc<BrokerConnection>,
    exchange: String,
    api_key: Option<String>,
    pending: Arc<PendingCalls>,
    /// Name of the live reply queue; `None` until the consumer is up
    reply_queue: Arc<RwLock<Option<String>>>,
    publish_channel: tokio::sync::Mutex<Option<Channel>>,
}

impl RpcClient {
    /// Create a client and spawn its reply consumer.
    ///
    /// The consumer loop keeps itself alive across broker reconnects; each
    /// recovery re-declares the private reply queue and fails any calls that
    /// were in flight when the link dropped.
    pub fn new(conn: Arc<BrokerConnection>, exchange: &str, api_key: Option<String>) -> Self {
        let pending = Arc::new(PendingCalls::default());
        let reply_queue = Arc::new(RwLock::new(None));

        tokio::spawn(reply_loop(
            Arc::clone(&conn),
            Arc::clone(&pending),
            Arc::clone(&reply_queue),
        ));

        Self {
            conn,
            exchange: exchange.to_string(),
            api_key,
            pending,
            reply_queue,
            publish_channel: tokio::sync::Mutex::new(None),
        }
    }

    /// Publish `payload` under `routing_key` and await the correlated
    /// response, decoded as `R`.
    ///
    /// On timeout the pending entry is removed before returning, so a late
    /// response cannot resolve a stale future.
    pub async fn call<T, R>(
        &self,
        routing_key: &str,
        payload: &T,
        timeout: Duration,
        trace_id: Option<&str>,
    ) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload).map_err(|e| RagbusError::Json {
            source: e,
            context: "Failed to serialize RPC request".to_string(),
        })?;

        let reply_to = self.await_reply_queue(timeout).await?;
        let correlation_id = Uuid::new_v4().to_string();

        // Register before publishing so a fast response cannot race the
        // pending-table insert
        let rx = self.pending.register(&correlation_id);

        let mut headers = FieldTable::default();
        if let Some(key) = &self.api_key {
            headers.insert(API_KEY_HEADER.into(), AMQPValue::LongString(key.as_str().into()));
        }
        if let Some(trace) = trace_id {
            headers.insert(TRACE_ID_HEADER.into(), AMQPValue::LongString(trace.into()));
        }

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_correlation_id(correlation_id.as_str().into())
            .with_reply_to(reply_to.as_str().into())
            .with_delivery_mode(2)
            .with_headers(headers);

        if let Err(e) = self.publish(routing_key, &body, properties).await {
            self.pending.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(bytes)) => serde_json::from_slice(&bytes).map_err(|e| RagbusError::Json {
                source: e,
                context: format!("Failed to decode RPC response from '{routing_key}'"),
            }),
            // Sender dropped: the reply loop failed all pending calls
            Ok(Err(_)) => Err(RagbusError::ConnectionLost),
            Err(_) => {
                self.pending.remove(&correlation_id);
                Err(RagbusError::Timeout {
                    routing_key: routing_key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Number of calls currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Wait until the reply consumer is up; new calls must not publish a
    /// `reply_to` that nothing consumes
    async fn await_reply_queue(&self, timeout: Duration) -> Result<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(name) = self.reply_queue.read().await.clone() {
                return Ok(name);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RagbusError::ConnectionLost);
            }
            tokio::time::sleep(REPLY_READY_POLL).await;
        }
    }

    async fn publish(
        &self,
        routing_key: &str,
        body: &[u8],
        properties: BasicProperties,
    ) -> Result<()> {
        let mut guard = self.publish_channel.lock().await;

        let needs_new = match guard.as_ref() {
            Some(ch) => !ch.status().connected(),
            None => true,
        };
        if needs_new {
            let channel = self.conn.channel().await?;
            channel
                .exchange_declare(
                    &self.exchange,
                    ExchangeKind::Direct,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            *guard = Some(channel);
        }

        let channel = guard.as_ref().expect("publish channel just established");
        channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}

/// Background task: own the reply queue and resolve pending calls.
async fn reply_loop(
    conn: Arc<BrokerConnection>,
    pending: Arc<PendingCalls>,
    reply_queue: Arc<RwLock<Option<String>>>,
) {
    loop {
        match consume_replies(&conn, &pending, &reply_queue).await {
            Ok(()) => tracing::warn!("Reply consumer stream ended"),
            Err(e) => tracing::warn!("Reply consumer failed: {}", e),
        }

        // The queue is gone with the connection; in-flight calls cannot be
        // answered any more
        *reply_queue.write().await = None;
        pending.fail_all();

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn consume_replies(
    conn: &BrokerConnection,
    pending: &PendingCalls,
    reply_queue: &RwLock<Option<String>>,
) -> Result<()> {
    let channel = conn.channel().await?;

    // Private reply queue: exclusive to this connection, auto-deleted with
    // it, server-named
    let queue = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                auto_delete: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    let queue_name = queue.name().as_str().to_string();

    let mut consumer = channel
        .basic_consume(
            &queue_name,
            "rpc-reply",
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    tracing::debug!("Reply consumer ready on queue '{}'", queue_name);
    *reply_queue.write().await = Some(queue_name);

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        match delivery.properties.correlation_id() {
            Some(cid) => {
                if !pending.complete(cid.as_str(), delivery.data) {
                    // Already timed out, or an id we never issued
                    tracing::debug!("Dropping reply with unknown correlation id {}", cid);
                }
            }
            None => tracing::debug!("Dropping reply without correlation id"),
        }
    }

    Ok(())
}
