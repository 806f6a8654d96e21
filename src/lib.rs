pub mod config;
pub mod directives;
pub mod error;
pub mod executable_schema;
pub mod execution;
pub mod gateway;
pub mod live_schema;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod query_builder;
pub mod query_executor;
pub mod resolve;
pub mod schema_converter;
pub mod schema_document;
pub mod schema_registry;
pub mod server;
pub mod upstream_auth;
pub mod upstreams;

pub use executable_schema::ExecutableSchema;
pub use execution::{GraphQLError, GraphQLResponse};
pub use gateway::Gateway;
pub use live_schema::LiveSchema;
pub use query_executor::HttpQueryExecutor;
pub use schema_converter::SchemaConverter;
pub use schema_registry::{GrpcRegistryConnector, RegistrySubscription};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    #[serde(alias = "operation_name")]
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub auth_headers: Option<HashMap<String, String>>,
}
