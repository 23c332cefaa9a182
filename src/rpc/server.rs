//! RPC server: consume requests from a bound queue, dispatch, reply, ack
//!
//! Every consumed message is acknowledged exactly once, whatever the
//! outcome. A handler failure becomes a best-effort error response, never an
//! unacknowledged message, so a poison request cannot enter a redelivery
//! loop.

use crate::error::Result;
use crate::protocol::RagResponse;
use crate::rpc::connection::BrokerConnection;
use crate::rpc::{API_KEY_HEADER, TRACE_ID_HEADER};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, ExchangeKind};
use std::sync::Arc;
use std::time::Duration;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Per-request metadata passed alongside the decoded payload
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub trace_id: String,
}

/// Async request handler bound to one routing key
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Process one request body and produce the response body.
    ///
    /// Validation failures should be mapped to a well-formed response inside
    /// the handler; an `Err` here is treated as an unexpected runtime failure
    /// and surfaced to the caller as a generic error response.
    async fn handle(&self, body: &[u8], meta: &RequestMeta) -> Result<Vec<u8>>;
}

/// RPC server consuming one queue bound to one routing key
pub struct RpcServer {
    conn: Arc<BrokerConnection>,
    exchange: String,
    queue_name: String,
    routing_key: String,
    handler: Arc<dyn RpcHandler>,
    prefetch: u16,
    required_api_key: Option<String>,
}

impl RpcServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conn: Arc<BrokerConnection>,
        exchange: &str,
        queue_name: &str,
        routing_key: &str,
        handler: Arc<dyn RpcHandler>,
        prefetch: u16,
        required_api_key: Option<String>,
    ) -> Self {
        Self {
            conn,
            exchange: exchange.to_string(),
            queue_name: queue_name.to_string(),
            routing_key: routing_key.to_string(),
            handler,
            prefetch,
            required_api_key,
        }
    }

    /// Spawn the consume loop; it keeps itself alive across broker
    /// reconnects
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.serve().await {
                    Ok(()) => tracing::warn!(
                        "RPC server stream for '{}' ended, re-establishing",
                        self.routing_key
                    ),
                    Err(e) => tracing::warn!("RPC server for '{}' failed: {}", self.routing_key, e),
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        })
    }

    async fn serve(&self) -> Result<()> {
        let channel = self.conn.channel().await?;

        // The prefetch limit bounds how many unacknowledged requests this
        // server holds at once; it is the backpressure against a slow
        // handler
        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await?;

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
        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &self.queue_name,
                &self.exchange,
                &self.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.queue_name,
                &format!("rpc-{}", self.routing_key),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        tracing::info!(
            "RPC server consuming '{}' (routing key '{}', prefetch {})",
            self.queue_name,
            self.routing_key,
            self.prefetch
        );

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            self.handle_delivery(&channel, delivery).await;
        }

        Ok(())
    }

    /// Process one delivery. Acks exactly once on every path.
    async fn handle_delivery(&self, channel: &Channel, delivery: Delivery) {
        let props = &delivery.properties;
        let trace_id = header_string(props.headers(), TRACE_ID_HEADER).unwrap_or_default();

        let reply = match (props.reply_to(), props.correlation_id()) {
            (Some(reply_to), Some(cid)) => {
                Some((reply_to.as_str().to_string(), cid.as_str().to_string()))
            }
            _ => None,
        };

        let response_body = match &reply {
            None => {
                // Cannot be a valid RPC request; nothing is addressable
                tracing::warn!(trace_id = %trace_id, "RPC message missing reply_to/correlation_id");
                None
            }
            Some(_) => {
                let provided = header_string(props.headers(), API_KEY_HEADER);
                if !auth_ok(self.required_api_key.as_deref(), provided.as_deref()) {
                    tracing::warn!(trace_id = %trace_id, "Unauthorized RPC call on '{}'", self.routing_key);
                    Some(RagResponse::unauthorized().to_bytes())
                } else {
                    let meta = RequestMeta {
                        trace_id: trace_id.clone(),
                    };
                    match self.handler.handle(&delivery.data, &meta).await {
                        Ok(bytes) => Some(bytes),
                        Err(e) => {
                            tracing::error!(trace_id = %trace_id, "RPC handler for '{}' failed: {}", self.routing_key, e);
                            Some(RagResponse::handler_failure(&e.to_string()).to_bytes())
                        }
                    }
                }
            }
        };

        // Best effort: a reply target that no longer exists must not take
        // the server down
        if let (Some((reply_to, correlation_id)), Some(body)) = (reply, response_body) {
            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_correlation_id(correlation_id.as_str().into());
            let published = channel
                .basic_publish(
                    "",
                    &reply_to,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await;
            match published {
                Ok(confirm) => {
                    if let Err(e) = confirm.await {
                        tracing::warn!(trace_id = %trace_id, "Reply confirm failed: {}", e);
                    }
                }
                Err(e) => tracing::warn!(trace_id = %trace_id, "Failed to publish reply: {}", e),
            }
        }

        if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
            tracing::error!(trace_id = %trace_id, "Failed to ack delivery: {}", e);
        }
    }
}

/// A server with no configured key accepts everything; a configured key must
/// match exactly
fn auth_ok(required: Option<&str>, provided: Option<&str>) -> bool {
    match required {
        None => true,
        Some(required) => provided == Some(required),
    }
}

/// Extract a string header from AMQP message headers
fn header_string(headers: &Option<FieldTable>, name: &str) -> Option<String> {
    let table = headers.as_ref()?;
    match table.inner().get(name) {
        Some(AMQPValue::LongString(s)) => {
            Some(String::from_utf8_lossy(s.as_bytes()).into_owned())
        }
        Some(AMQPValue::ShortString(s)) => Some(s.as_str().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_matrix() {
        assert!(auth_ok(None, None));
        assert!(auth_ok(None, Some("anything")));
        assert!(auth_ok(Some("secret"), Some("secret")));
        assert!(!auth_ok(Some("secret"), Some("wrong")));
        assert!(!auth_ok(Some("secret"), None));
    }

    #[test]
    fn header_extraction() {
        let mut table = FieldTable::default();
        table.insert(
            API_KEY_HEADER.into(),
            AMQPValue::LongString("secret".into()),
        );
        let headers = Some(table);

        assert_eq!(
            header_string(&headers, API_KEY_HEADER).as_deref(),
            Some("secret")
        );
        assert_eq!(header_string(&headers, TRACE_ID_HEADER), None);
        assert_eq!(header_string(&None, API_KEY_HEADER), None);
    }
}
