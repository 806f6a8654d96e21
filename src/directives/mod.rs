//! Directive registry and middleware composition.
//!
//! Every directive a schema may use is registered once at start-up. A
//! directive either builds the field's terminal resolver (`@gql`, `@rest`,
//! `@localResolver`) or contributes one [`Middleware`] to the field's chain.
//! Request transforms run in declaration order before the resolver, response
//! transforms run in declaration order after it.

mod common;
mod gql;
mod rest;

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ConvertError, FieldError};
use crate::query_executor::QueryExecutor;
use crate::resolve::{ResolveContext, Resolver};
use crate::schema_document::{DirectiveApplication, FieldDefinition};
use crate::upstream_auth::{self, TokenProvider};
use crate::upstreams::ServerContext;

pub type RequestTransform =
    Arc<dyn Fn(ResolveContext) -> Result<ResolveContext, FieldError> + Send + Sync>;
pub type ResponseTransform = Arc<dyn Fn(Value) -> Result<Value, FieldError> + Send + Sync>;

#[derive(Clone)]
pub enum Middleware {
    RequestTransform(RequestTransform),
    ResponseTransform(ResponseTransform),
}

impl Middleware {
    pub fn request<F>(transform: F) -> Self
    where
        F: Fn(ResolveContext) -> Result<ResolveContext, FieldError> + Send + Sync + 'static,
    {
        Middleware::RequestTransform(Arc::new(transform))
    }

    pub fn response<F>(transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value, FieldError> + Send + Sync + 'static,
    {
        Middleware::ResponseTransform(Arc::new(transform))
    }
}

/// What resolver directives can reach: the upstream snapshot of the schema
/// generation being compiled, and the upstream call capabilities.
#[derive(Clone)]
pub struct ResolverEnv {
    pub server: Arc<ServerContext>,
    pub executor: Arc<dyn QueryExecutor>,
    pub tokens: Arc<dyn TokenProvider>,
}

pub type MiddlewareFactory =
    fn(&FieldDefinition, &DirectiveApplication) -> Result<Middleware, ConvertError>;
pub type ResolverFactory =
    fn(&FieldDefinition, &DirectiveApplication, &ResolverEnv) -> Result<Resolver, ConvertError>;

#[derive(Clone, Copy)]
pub enum DirectiveFactory {
    Middleware(MiddlewareFactory),
    Resolver(ResolverFactory),
}

#[derive(Clone, Copy)]
pub struct DirectiveDefinition {
    pub name: &'static str,
    pub factory: DirectiveFactory,
}

#[derive(Default)]
pub struct DirectiveRegistry {
    definitions: HashMap<&'static str, DirectiveDefinition>,
}

static BUILTIN: LazyLock<DirectiveRegistry> = LazyLock::new(|| {
    let mut registry = DirectiveRegistry::new();
    registry
        .register(gql::DEFINITION)
        .register(rest::DEFINITION)
        .register(common::LOCAL_RESOLVER)
        .register(common::LOG)
        .register(common::SET_HEADER)
        .register(common::REVERSE)
        .register(common::SELECT);
    registry
});

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The directives every compiled schema may use.
    pub fn builtin() -> &'static DirectiveRegistry {
        &BUILTIN
    }

    pub fn register(&mut self, definition: DirectiveDefinition) -> &mut Self {
        self.definitions.insert(definition.name, definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&DirectiveDefinition> {
        self.definitions.get(name)
    }

    fn lookup(
        &self,
        field: &FieldDefinition,
        directive: &DirectiveApplication,
    ) -> Result<&DirectiveDefinition, ConvertError> {
        self.get(&directive.name)
            .ok_or_else(|| ConvertError::UnknownDirective {
                directive: directive.name.clone(),
                type_name: field.parent_type.clone(),
                field: field.name.clone(),
            })
    }

    /// The field's middleware chain, in the order its directives are written.
    pub fn middlewares(&self, field: &FieldDefinition) -> Result<Vec<Middleware>, ConvertError> {
        let mut middlewares = Vec::new();
        for directive in &field.directives {
            if let DirectiveFactory::Middleware(factory) = self.lookup(field, directive)?.factory {
                middlewares.push(factory(field, directive)?);
            }
        }
        Ok(middlewares)
    }

    /// The terminal resolver built by the field's resolver directive, if any.
    pub fn resolver(
        &self,
        field: &FieldDefinition,
        env: &ResolverEnv,
    ) -> Result<Option<Resolver>, ConvertError> {
        let mut resolver = None;
        for directive in &field.directives {
            if let DirectiveFactory::Resolver(factory) = self.lookup(field, directive)?.factory {
                if resolver.is_some() {
                    return Err(ConvertError::ConflictingResolvers {
                        type_name: field.parent_type.clone(),
                        field: field.name.clone(),
                    });
                }
                resolver = Some(factory(field, directive, env)?);
            }
        }
        Ok(resolver)
    }
}

/// Wraps `resolver` with a middleware chain.
pub fn wrap(resolver: Resolver, middlewares: Vec<Middleware>) -> Resolver {
    if middlewares.is_empty() {
        return resolver;
    }

    let mut requests = Vec::new();
    let mut responses = Vec::new();
    for middleware in middlewares {
        match middleware {
            Middleware::RequestTransform(transform) => requests.push(transform),
            Middleware::ResponseTransform(transform) => responses.push(transform),
        }
    }
    let requests: Arc<[RequestTransform]> = requests.into();
    let responses: Arc<[ResponseTransform]> = responses.into();

    Arc::new(move |ctx: ResolveContext| {
        let resolver = Arc::clone(&resolver);
        let requests = Arc::clone(&requests);
        let responses = Arc::clone(&responses);
        async move {
            let mut ctx = ctx;
            for transform in requests.iter() {
                ctx = transform(ctx)?;
            }
            let mut value = resolver(ctx).await?;
            for transform in responses.iter() {
                value = transform(value)?;
            }
            Ok::<_, FieldError>(value)
        }
        .boxed()
    })
}

/// Deserializes a directive's literal arguments.
pub(crate) fn arguments<T: DeserializeOwned>(
    field: &FieldDefinition,
    directive: &DirectiveApplication,
) -> Result<T, ConvertError> {
    serde_json::from_value(Value::Object(directive.arguments.clone())).map_err(|e| {
        ConvertError::InvalidArguments {
            directive: directive.name.clone(),
            type_name: field.parent_type.clone(),
            field: field.name.clone(),
            reason: e.to_string(),
        }
    })
}

/// Checks an explicit `upstream:` argument against the compiled snapshot.
pub(crate) fn check_upstream(
    field: &FieldDefinition,
    directive: &DirectiveApplication,
    upstream: Option<&str>,
    env: &ResolverEnv,
) -> Result<(), ConvertError> {
    match upstream {
        Some(host) if env.server.upstream(host).is_none() => Err(ConvertError::UnknownUpstream {
            directive: directive.name.clone(),
            type_name: field.parent_type.clone(),
            field: field.name.clone(),
            upstream: host.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Headers for a forwarded call: whatever the field's middlewares set, plus
/// the `Authorization` header chosen for the target upstream.
pub(crate) async fn upstream_headers(
    ctx: &ResolveContext,
    env: &ResolverEnv,
    url: &str,
    upstream: Option<&str>,
) -> Result<Vec<(String, String)>, FieldError> {
    let mut headers: Vec<(String, String)> = ctx
        .extensions
        .upstream_headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let authorization =
        upstream_auth::authorization_header(ctx, &env.server, url, upstream, env.tokens.as_ref()).await?;
    if let Some(authorization) = authorization {
        headers.push(("Authorization".to_string(), authorization));
    }
    Ok(headers)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::query_executor::{UpstreamRequest, UpstreamResponse};
    use crate::schema_document::TypeRef;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{Map, json};
    use std::sync::Mutex;

    /// Records every upstream call and answers with a fixed response.
    pub(crate) struct RecordingExecutor {
        pub(crate) requests: Mutex<Vec<UpstreamRequest>>,
        pub(crate) response: UpstreamResponse,
    }

    impl RecordingExecutor {
        pub(crate) fn new(status: u16, body: Value) -> Arc<Self> {
            Arc::new(RecordingExecutor {
                requests: Mutex::new(Vec::new()),
                response: UpstreamResponse { status, body },
            })
        }

        pub(crate) fn last(&self) -> UpstreamRequest {
            self.requests.lock().unwrap().last().cloned().expect("no upstream call")
        }
    }

    #[async_trait]
    impl QueryExecutor for RecordingExecutor {
        async fn execute(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    pub(crate) fn env(executor: Arc<dyn QueryExecutor>, server: ServerContext) -> ResolverEnv {
        ResolverEnv {
            server: Arc::new(server),
            executor,
            tokens: Arc::new(crate::upstream_auth::tests::StaticTokens),
        }
    }

    pub(crate) fn directive(name: &str, arguments: Value) -> DirectiveApplication {
        DirectiveApplication {
            name: name.to_string(),
            arguments: arguments.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    pub(crate) fn field(name: &str, directives: Vec<DirectiveApplication>) -> FieldDefinition {
        FieldDefinition {
            parent_type: "Query".to_string(),
            name: name.to_string(),
            ty: TypeRef::Named("String".to_string()),
            arguments: vec![],
            directives,
        }
    }

    fn append_trail(ctx: ResolveContext, mark: &str) -> ResolveContext {
        let mut ctx = ctx;
        let trail = ctx.extensions.upstream_headers.entry("x-trail".to_string()).or_default();
        trail.push_str(mark);
        ctx
    }

    fn trail_a(_: &FieldDefinition, _: &DirectiveApplication) -> Result<Middleware, ConvertError> {
        Ok(Middleware::request(|ctx| Ok(append_trail(ctx, "a"))))
    }

    fn trail_b(_: &FieldDefinition, _: &DirectiveApplication) -> Result<Middleware, ConvertError> {
        Ok(Middleware::request(|ctx| Ok(append_trail(ctx, "b"))))
    }

    fn suffix_1(_: &FieldDefinition, _: &DirectiveApplication) -> Result<Middleware, ConvertError> {
        Ok(Middleware::response(|value| Ok(json!(format!("{}1", value.as_str().unwrap_or_default())))))
    }

    fn suffix_2(_: &FieldDefinition, _: &DirectiveApplication) -> Result<Middleware, ConvertError> {
        Ok(Middleware::response(|value| Ok(json!(format!("{}2", value.as_str().unwrap_or_default())))))
    }

    fn deny(_: &FieldDefinition, _: &DirectiveApplication) -> Result<Middleware, ConvertError> {
        Ok(Middleware::request(|_| Err(FieldError::new("denied"))))
    }

    fn echo_trail(_: &FieldDefinition, _: &DirectiveApplication, _: &ResolverEnv) -> Result<Resolver, ConvertError> {
        Ok(Arc::new(|ctx: ResolveContext| {
            let trail = ctx.extensions.upstream_headers.get("x-trail").cloned().unwrap_or_default();
            async move { Ok::<_, FieldError>(json!(trail)) }.boxed()
        }))
    }

    fn registry() -> DirectiveRegistry {
        let mut registry = DirectiveRegistry::new();
        registry
            .register(DirectiveDefinition { name: "a", factory: DirectiveFactory::Middleware(trail_a) })
            .register(DirectiveDefinition { name: "b", factory: DirectiveFactory::Middleware(trail_b) })
            .register(DirectiveDefinition { name: "one", factory: DirectiveFactory::Middleware(suffix_1) })
            .register(DirectiveDefinition { name: "two", factory: DirectiveFactory::Middleware(suffix_2) })
            .register(DirectiveDefinition { name: "deny", factory: DirectiveFactory::Middleware(deny) })
            .register(DirectiveDefinition { name: "echo", factory: DirectiveFactory::Resolver(echo_trail) });
        registry
    }

    async fn run(names: &[&str]) -> Result<Value, FieldError> {
        let registry = registry();
        let env = env(RecordingExecutor::new(200, Value::Null), ServerContext::default());
        let field = field("f", names.iter().map(|name| directive(name, json!({}))).collect());

        let resolver = registry.resolver(&field, &env).unwrap().unwrap();
        let resolver = wrap(resolver, registry.middlewares(&field).unwrap());
        resolver(ResolveContext::default()).await
    }

    #[tokio::test]
    async fn request_transforms_run_in_declaration_order() {
        assert_eq!(run(&["a", "b", "echo"]).await.unwrap(), json!("ab"));
        assert_eq!(run(&["b", "a", "echo"]).await.unwrap(), json!("ba"));
    }

    #[tokio::test]
    async fn response_transforms_run_in_declaration_order() {
        assert_eq!(run(&["a", "one", "two", "echo"]).await.unwrap(), json!("a12"));
        assert_eq!(run(&["two", "echo", "a", "one"]).await.unwrap(), json!("a21"));
    }

    #[tokio::test]
    async fn failing_middleware_aborts_the_field() {
        assert_eq!(run(&["deny", "one", "echo"]).await, Err(FieldError::new("denied")));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        let field = field("f", vec![directive("nope", json!({}))]);

        let err = registry().middlewares(&field).err().unwrap();

        assert_eq!(err.to_string(), "unknown directive @nope on Query.f");
    }

    #[test]
    fn two_resolver_directives_conflict() {
        let env = env(RecordingExecutor::new(200, Value::Null), ServerContext::default());
        let field = field("f", vec![directive("echo", json!({})), directive("echo", json!({}))]);

        assert!(matches!(
            registry().resolver(&field, &env),
            Err(ConvertError::ConflictingResolvers { .. })
        ));
    }

    #[test]
    fn builtin_registry_knows_every_directive() {
        let registry = DirectiveRegistry::builtin();

        for name in ["gql", "rest", "localResolver", "log", "setHeader", "reverse", "select"] {
            assert!(registry.get(name).is_some(), "missing @{name}");
        }
    }
}
