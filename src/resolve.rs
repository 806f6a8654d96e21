use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::error::FieldError;
use crate::query_builder::{FragmentDefinition, Selection};

pub type Arguments = Map<String, Value>;

/// Terminal field resolver. Each call owns its [`ResolveContext`].
pub type Resolver =
    Arc<dyn Fn(ResolveContext) -> BoxFuture<'static, Result<Value, FieldError>> + Send + Sync>;

/// Headers of the inbound HTTP request that resolvers may forward upstream.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    headers: HashMap<String, String>,
}

impl RequestContext {
    pub const FORWARDED_HEADERS: [&'static str; 3] = ["authorization", "x-api-key", "x-token"];

    pub fn new(headers: HashMap<String, String>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        RequestContext { headers }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.header("authorization")
    }
}

/// Values middlewares hand to later middlewares and to the terminal resolver
/// of the same field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extensions {
    /// Extra headers sent with the upstream call.
    pub upstream_headers: BTreeMap<String, String>,
    /// Overrides the computed `Authorization` header for the upstream call.
    pub authorization: Option<String>,
}

/// Where in the request a field is being resolved.
#[derive(Clone, Debug, Default)]
pub struct ExecutionInfo {
    pub field_name: String,
    pub parent_type: String,
    pub path: Vec<String>,
    pub selection_set: Vec<Selection>,
    pub fragments: Arc<HashMap<String, FragmentDefinition>>,
}

impl ExecutionInfo {
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResolveContext {
    pub arguments: Arguments,
    pub parent: Value,
    pub info: ExecutionInfo,
    pub request: Arc<RequestContext>,
    pub extensions: Extensions,
}

impl ResolveContext {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn source(&self, name: &str) -> Option<&Value> {
        self.parent.as_object().and_then(|parent| parent.get(name))
    }
}

/// Resolver used for fields that carry middleware but no resolver directive.
pub fn property_resolver(field_name: &str) -> Resolver {
    let field_name = field_name.to_string();
    Arc::new(move |ctx: ResolveContext| {
        let value = ctx.source(&field_name).cloned().unwrap_or(Value::Null);
        async move { Ok::<_, FieldError>(value) }.boxed()
    })
}
