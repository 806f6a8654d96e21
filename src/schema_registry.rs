//! Subscription to the schema registry.
//!
//! One subscription connects (retrying a bounded number of times), then
//! compiles every pushed message into a schema generation until the stream
//! ends. Compilation results go to the schema channel; transport, parse and
//! panic failures go to the error channel.

pub mod proto;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::{ConvertError, RegistryError};
use crate::executable_schema::ExecutableSchema;
use crate::live_schema::LiveSchema;
use crate::metrics::Metrics;
use crate::schema_converter::SchemaConverter;
use crate::schema_document;
use crate::upstreams;
use proto::{RegistryClient, RegistryMessage, SubscribeParams};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type MessageStream = BoxStream<'static, Result<RegistryMessage, tonic::Status>>;
pub type SchemaResult = Result<ExecutableSchema, ConvertError>;

/// Opens the registry's push stream.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(&self) -> Result<MessageStream, BoxError>;
}

pub struct GrpcRegistryConnector {
    endpoint: tonic::transport::Endpoint,
}

impl GrpcRegistryConnector {
    pub fn new(url: &str) -> Result<Self, BoxError> {
        let endpoint = tonic::transport::Endpoint::from_shared(url.to_string())?;
        Ok(GrpcRegistryConnector { endpoint })
    }
}

#[async_trait]
impl RegistryConnector for GrpcRegistryConnector {
    async fn connect(&self) -> Result<MessageStream, BoxError> {
        let channel = self.endpoint.connect().await?;
        let response = RegistryClient::new(channel)
            .subscribe(SubscribeParams {})
            .await?;
        Ok(response.into_inner().boxed())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

/// How one subscription ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The registry closed the stream.
    Closed,
    /// Connecting failed on every attempt, or the stream broke. The error was
    /// reported on the error channel.
    Failed,
    /// Cancelled, or nobody is listening any more.
    Cancelled,
}

enum State {
    Connecting { attempt: u32 },
    Backoff { attempt: u32 },
    Streaming(MessageStream),
    Failed(RegistryError),
}

#[derive(Clone)]
pub struct RegistrySubscription {
    connector: Arc<dyn RegistryConnector>,
    converter: Arc<SchemaConverter>,
    retry: RetryPolicy,
}

impl RegistrySubscription {
    pub fn new(connector: Arc<dyn RegistryConnector>, converter: Arc<SchemaConverter>) -> Self {
        RegistrySubscription {
            connector,
            converter,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs one subscription until the stream ends, fails or `cancel` fires.
    pub async fn run(
        &self,
        schemas: &mpsc::Sender<SchemaResult>,
        errors: &mpsc::Sender<RegistryError>,
        cancel: &CancellationToken,
    ) -> SubscriptionEnd {
        let mut state = State::Connecting { attempt: 1 };
        loop {
            state = match state {
                State::Connecting { attempt } => {
                    let span = tracing::info_span!("registry_subscribe", attempt);
                    let connected = tokio::select! {
                        _ = cancel.cancelled() => return SubscriptionEnd::Cancelled,
                        connected = self.connector.connect().instrument(span) => connected,
                    };
                    match connected {
                        Ok(stream) => {
                            tracing::info!(attempt, "subscribed to registry");
                            State::Streaming(stream)
                        }
                        Err(source) if attempt < self.retry.attempts => {
                            tracing::warn!(attempt, error = %source, "failed to subscribe to registry");
                            State::Backoff { attempt }
                        }
                        Err(source) => State::Failed(RegistryError::Connect {
                            attempts: attempt,
                            source,
                        }),
                    }
                }
                State::Backoff { attempt } => {
                    tokio::select! {
                        _ = cancel.cancelled() => return SubscriptionEnd::Cancelled,
                        _ = tokio::time::sleep(self.retry.delay) => State::Connecting { attempt: attempt + 1 },
                    }
                }
                State::Streaming(mut stream) => {
                    let received = tokio::select! {
                        _ = cancel.cancelled() => return SubscriptionEnd::Cancelled,
                        received = stream.next() => received,
                    };
                    match received {
                        None => {
                            tracing::warn!("registry closed the stream");
                            return SubscriptionEnd::Closed;
                        }
                        Some(Err(status)) => State::Failed(RegistryError::Stream(status)),
                        Some(Ok(message)) => {
                            if !self.deliver(message, schemas, errors).await {
                                return SubscriptionEnd::Cancelled;
                            }
                            State::Streaming(stream)
                        }
                    }
                }
                State::Failed(err) => {
                    tracing::error!(error = %err, "registry subscription failed");
                    // Ignored: the process is shutting down if nobody listens.
                    let _ = errors.send(err).await;
                    return SubscriptionEnd::Failed;
                }
            };
        }
    }

    /// Compiles one push and sends the outcome. Returns `false` once the
    /// receiving side is gone.
    async fn deliver(
        &self,
        message: RegistryMessage,
        schemas: &mpsc::Sender<SchemaResult>,
        errors: &mpsc::Sender<RegistryError>,
    ) -> bool {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.compile(message)))
            .unwrap_or_else(|panic| Err(RegistryError::Panicked(panic_message(panic.as_ref()))));

        match outcome {
            Ok(result) => schemas.send(result).await.is_ok(),
            Err(err) => {
                tracing::warn!(error = %err, "discarding registry message");
                errors.send(err).await.is_ok()
            }
        }
    }

    fn compile(&self, message: RegistryMessage) -> Result<SchemaResult, RegistryError> {
        let definition = message.schema.ok_or(RegistryError::MissingSchema)?.definition;
        let document = schema_document::parse(&definition)?;
        let server = upstreams::rebuild(
            message.upstreams.into_iter().map(Into::into),
            message.upstream_auth_credentials.into_iter().map(Into::into),
        );
        Ok(self.converter.convert(server, &document))
    }

    /// Keeps subscribing until `cancel` fires, waiting `reconnect_delay`
    /// after each subscription ends. A panicking subscription is reported on
    /// the error channel and counts as a failed one.
    pub fn spawn(
        self,
        schemas: mpsc::Sender<SchemaResult>,
        errors: mpsc::Sender<RegistryError>,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let end = match AssertUnwindSafe(self.run(&schemas, &errors, &cancel))
                    .catch_unwind()
                    .await
                {
                    Ok(end) => end,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(%message, "registry subscription panicked");
                        // Ignored: the process is shutting down if nobody listens.
                        let _ = errors.send(RegistryError::Panicked(message)).await;
                        SubscriptionEnd::Failed
                    }
                };
                if end == SubscriptionEnd::Cancelled {
                    break;
                }
                tracing::info!(?end, delay_ms = reconnect_delay.as_millis() as u64, "resubscribing to registry");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
            tracing::debug!("registry supervisor stopped");
        })
    }
}

/// Logs every registry error. Returns the error count once
/// `max_startup_failures` errors arrived while no schema was ever live, or
/// `None` when the error channel closes. A threshold of zero never trips.
pub async fn consume_errors(
    mut errors: mpsc::Receiver<RegistryError>,
    live: LiveSchema,
    metrics: Option<Metrics>,
    max_startup_failures: u32,
) -> Option<u32> {
    let mut startup_failures = 0;
    let mut ever_live = false;

    while let Some(err) = errors.recv().await {
        if let Some(metrics) = &metrics {
            metrics.registry_error();
        }
        ever_live = ever_live || live.current().is_some();
        if ever_live {
            tracing::warn!(error = %err, "registry error, still serving the live schema");
            continue;
        }

        startup_failures += 1;
        tracing::error!(error = %err, startup_failures, "registry error before the first schema");
        if max_startup_failures > 0 && startup_failures >= max_startup_failures {
            return Some(startup_failures);
        }
    }
    None
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
