use tracing::Instrument;

use crate::GraphQLRequest;
use crate::execution::{self, GraphQLResponse};
use crate::live_schema::LiveSchema;
use crate::metrics::Metrics;

#[derive(Debug, thiserror::Error)]
#[error("no schema has been compiled yet")]
pub struct SchemaUnavailable;

/// Serves client requests from whichever schema generation is live when the
/// request arrives. A swap mid-request does not affect that request.
#[derive(Clone)]
pub struct Gateway {
    live: LiveSchema,
    metrics: Metrics,
}

impl Gateway {
    pub fn new(live: LiveSchema, metrics: Metrics) -> Self {
        Gateway { live, metrics }
    }

    pub fn live(&self) -> &LiveSchema {
        &self.live
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> Result<GraphQLResponse, SchemaUnavailable> {
        let _active = self.metrics.request_started();
        let schema = self.live.current().ok_or(SchemaUnavailable)?;

        let span = tracing::info_span!(
            "graphql_request",
            generation = schema.generation(),
            operation = request.operation_name.as_deref().unwrap_or_default(),
        );
        async move {
            let response = execution::execute(&schema, request).await;
            if !response.errors.is_empty() {
                tracing::debug!(errors = response.errors.len(), "request completed with errors");
            }
            Ok(response)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::tests::RecordingExecutor;
    use crate::schema_converter::SchemaConverter;
    use crate::schema_document;
    use crate::upstream_auth::tests::StaticTokens;
    use crate::upstreams::ServerContext;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn request(query: &str) -> GraphQLRequest {
        GraphQLRequest {
            query: query.to_string(),
            variables: None,
            operation_name: None,
            auth_headers: None,
        }
    }

    #[tokio::test]
    async fn unavailable_until_a_schema_is_live() {
        let gateway = Gateway::new(LiveSchema::new(), Metrics::new().unwrap());

        assert!(gateway.process_request(request("{ a }")).await.is_err());
        assert_eq!(gateway.metrics().total_requests.get(), 1);
        assert_eq!(gateway.metrics().active_requests.get(), 0);
    }

    #[tokio::test]
    async fn serves_the_live_schema() {
        let converter = SchemaConverter::new(
            RecordingExecutor::new(200, Value::Null),
            Arc::new(StaticTokens),
        );
        let document =
            schema_document::parse(r#"type Query { greeting: String @localResolver(value: "hello") }"#).unwrap();
        let live = LiveSchema::new();
        live.swap(converter.convert(ServerContext::default(), &document).unwrap());
        let gateway = Gateway::new(live, Metrics::new().unwrap());

        let response = gateway.process_request(request("{ greeting }")).await.unwrap();

        assert_eq!(response.data, Some(json!({"greeting": "hello"})));
        assert!(response.errors.is_empty());
    }
}
