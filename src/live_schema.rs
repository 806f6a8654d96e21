use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::ConvertError;
use crate::executable_schema::ExecutableSchema;
use crate::metrics::Metrics;

/// The schema generation currently being served. One writer swaps it,
/// any number of request handlers read it.
#[derive(Clone)]
pub struct LiveSchema {
    sender: Arc<watch::Sender<Option<Arc<ExecutableSchema>>>>,
}

impl LiveSchema {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        LiveSchema {
            sender: Arc::new(sender),
        }
    }

    /// Publishes `schema` and returns the generation it replaced.
    pub fn swap(&self, schema: ExecutableSchema) -> Option<Arc<ExecutableSchema>> {
        self.sender.send_replace(Some(Arc::new(schema)))
    }

    /// The live schema, or `None` before the first successful swap.
    pub fn current(&self) -> Option<Arc<ExecutableSchema>> {
        self.sender.borrow().clone()
    }

    /// Notified on every swap.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<ExecutableSchema>>> {
        self.sender.subscribe()
    }
}

impl Default for LiveSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies conversion results in the order they arrive. A failed conversion
/// is logged and leaves the live schema untouched. Returns when the
/// producer side closes.
pub async fn consume_schemas(
    live: LiveSchema,
    mut schemas: mpsc::Receiver<Result<ExecutableSchema, ConvertError>>,
    metrics: Option<Metrics>,
) {
    while let Some(result) = schemas.recv().await {
        match result {
            Ok(schema) => {
                let generation = schema.generation();
                let previous = live.swap(schema);
                tracing::info!(
                    generation,
                    previous = previous.map(|schema| schema.generation()),
                    "swapped live schema"
                );
                if let Some(metrics) = &metrics {
                    metrics.schema_swapped(generation);
                }
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    live_generation = live.current().map(|schema| schema.generation()),
                    "schema conversion failed, keeping the live schema"
                );
                if let Some(metrics) = &metrics {
                    metrics.conversion_failed();
                }
            }
        }
    }
    tracing::debug!("schema channel closed");
}
