use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;

use super::{DirectiveDefinition, DirectiveFactory, ResolverEnv, arguments, check_upstream, upstream_headers};
use crate::error::{ConvertError, FieldError, UpstreamError};
use crate::params;
use crate::query_builder::{build_leaf_query, build_query};
use crate::query_executor::UpstreamRequest;
use crate::resolve::{ResolveContext, Resolver};
use crate::schema_document::{DirectiveApplication, FieldDefinition};

pub(super) const DEFINITION: DirectiveDefinition = DirectiveDefinition {
    name: "gql",
    factory: DirectiveFactory::Resolver(gql),
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlArgs {
    url: String,
    name: Option<String>,
    upstream: Option<String>,
    timeout_ms: Option<u64>,
}

/// Forwards a field to a GraphQL upstream.
struct GqlCall {
    url: String,
    name: String,
    upstream: Option<String>,
    timeout: Option<Duration>,
    env: ResolverEnv,
}

fn gql(field: &FieldDefinition, directive: &DirectiveApplication, env: &ResolverEnv) -> Result<Resolver, ConvertError> {
    let args: GqlArgs = arguments(field, directive)?;
    check_upstream(field, directive, args.upstream.as_deref(), env)?;

    let call = Arc::new(GqlCall {
        url: args.url,
        name: args.name.unwrap_or_else(|| field.name.clone()),
        upstream: args.upstream,
        timeout: args.timeout_ms.map(Duration::from_millis),
        env: env.clone(),
    });

    Ok(Arc::new(move |ctx: ResolveContext| {
        let call = Arc::clone(&call);
        async move { call.resolve(ctx).await }.boxed()
    }))
}

impl GqlCall {
    async fn resolve(&self, ctx: ResolveContext) -> Result<Value, FieldError> {
        let url = params::substitute(&ctx, &self.url);
        let query = if ctx.info.selection_set.is_empty() {
            build_leaf_query(&self.name, &ctx)
        } else {
            build_query(&self.name, &ctx)?
        };

        let mut request = UpstreamRequest::graphql(url.clone(), &query);
        request.headers = upstream_headers(&ctx, &self.env, &url, self.upstream.as_deref()).await?;
        request.timeout = self.timeout;

        tracing::debug!(field = %ctx.info.path_string(), %url, "forwarding field to graphql upstream");
        let response = self.env.executor.execute(request).await?;
        if !response.is_success() {
            return Err(UpstreamError::Status {
                url,
                status: response.status,
            }
            .into());
        }

        if let Some(errors) = response.body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|error| error.get("message").and_then(Value::as_str))
                    .collect();
                return Err(FieldError::new(format!(
                    "upstream {url} returned errors: {}",
                    messages.join("; ")
                )));
            }
        }

        Ok(response
            .body
            .get("data")
            .and_then(|data| data.get(&self.name))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::DirectiveRegistry;
    use crate::directives::tests::{RecordingExecutor, directive, env, field};
    use crate::query_builder::{FieldSelection, Selection};
    use crate::resolve::{ExecutionInfo, RequestContext};
    use crate::upstreams::{self, ServerContext, Upstream, UpstreamAuth, UpstreamAuthCredential};
    use http::Method;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;

    fn books_context() -> ResolveContext {
        ResolveContext {
            arguments: json!({"genre": "sci-fi"}).as_object().cloned().unwrap(),
            info: ExecutionInfo {
                field_name: "books".to_string(),
                parent_type: "Query".to_string(),
                path: vec!["books".to_string()],
                selection_set: vec![
                    Selection::Field(FieldSelection::leaf("title")),
                    Selection::Field(FieldSelection::leaf("author")),
                ],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn resolver(executor: Arc<RecordingExecutor>, server: ServerContext, args: Value) -> Resolver {
        let env = env(executor, server);
        let field = field("books", vec![directive("gql", args)]);
        DirectiveRegistry::builtin().resolver(&field, &env).unwrap().unwrap()
    }

    #[tokio::test]
    async fn forwards_sub_selection_and_extracts_data() {
        let executor = RecordingExecutor::new(200, json!({"data": {"books": [{"title": "Dune", "author": "Herbert"}]}}));
        let resolver = resolver(
            executor.clone(),
            ServerContext::default(),
            json!({"url": "http://books.svc/graphql", "timeoutMs": 1500}),
        );

        let value = resolver(books_context()).await.unwrap();

        assert_eq!(value, json!([{"title": "Dune", "author": "Herbert"}]));
        let request = executor.last();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.url, "http://books.svc/graphql");
        assert_eq!(request.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            request.body,
            Some(json!({
                "query": "query {\nbooks(genre: \"sci-fi\") {\nauthor\ntitle\n}\n}\n",
                "variables": {},
            }))
        );
    }

    #[tokio::test]
    async fn name_argument_renames_the_upstream_field() {
        let executor = RecordingExecutor::new(200, json!({"data": {"allBooks": []}}));
        let resolver = resolver(
            executor.clone(),
            ServerContext::default(),
            json!({"url": "http://books.svc/graphql", "name": "allBooks"}),
        );

        let value = resolver(books_context()).await.unwrap();

        assert_eq!(value, json!([]));
        let body = executor.last().body.unwrap();
        assert!(body["query"].as_str().unwrap().starts_with("query {\nallBooks("));
    }

    #[tokio::test]
    async fn leaf_fields_are_forwarded_without_braces() {
        let executor = RecordingExecutor::new(200, json!({"data": {"count": 3}}));
        let resolver = resolver(executor.clone(), ServerContext::default(), json!({"url": "http://books.svc/graphql"}));

        let value = resolver(ResolveContext::default()).await.unwrap();

        assert_eq!(value, json!(3));
        assert_eq!(executor.last().body.unwrap()["query"], json!("query {\ncount\n}\n"));
    }

    #[tokio::test]
    async fn upstream_errors_fail_the_field() {
        let executor = RecordingExecutor::new(200, json!({"data": null, "errors": [{"message": "boom"}]}));
        let resolver = resolver(executor, ServerContext::default(), json!({"url": "http://books.svc/graphql"}));

        let err = resolver(books_context()).await.unwrap_err();

        assert_eq!(err.message, "upstream http://books.svc/graphql returned errors: boom");
    }

    #[tokio::test]
    async fn non_success_status_fails_the_field() {
        let executor = RecordingExecutor::new(502, Value::Null);
        let resolver = resolver(executor, ServerContext::default(), json!({"url": "http://books.svc/graphql"}));

        let err = resolver(books_context()).await.unwrap_err();

        assert_eq!(err.message, "http://books.svc/graphql responded with status 502");
    }

    #[tokio::test]
    async fn sends_middleware_headers_and_upstream_token() {
        let server = upstreams::rebuild(
            vec![Upstream {
                host: "books.svc".to_string(),
                auth: Some(UpstreamAuth {
                    auth_type: "ActiveDirectory".to_string(),
                    authority: "https://login/tenant".to_string(),
                    resource: "api://books".to_string(),
                }),
            }],
            vec![UpstreamAuthCredential {
                auth_type: "ActiveDirectory".to_string(),
                authority: "https://login/tenant".to_string(),
                client_id: "gateway".to_string(),
                client_secret: "secret".to_string(),
            }],
        );
        let executor = RecordingExecutor::new(200, json!({"data": {"books": []}}));
        let resolver = resolver(
            executor.clone(),
            server,
            json!({"url": "http://books.svc/graphql", "upstream": "books.svc"}),
        );

        let mut ctx = books_context();
        ctx.request = Arc::new(RequestContext::new(HashMap::from([(
            "Authorization".to_string(),
            "Bearer user".to_string(),
        )])));
        ctx.extensions
            .upstream_headers
            .insert("x-tenant".to_string(), "acme".to_string());
        resolver(ctx).await.unwrap();

        assert_eq!(
            executor.last().headers,
            vec![
                ("x-tenant".to_string(), "acme".to_string()),
                ("Authorization".to_string(), "Bearer gateway@api://books".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_upstream_fails_conversion() {
        let env = env(RecordingExecutor::new(200, Value::Null), ServerContext::default());
        let field = field("books", vec![directive("gql", json!({"url": "http://x", "upstream": "missing.svc"}))]);

        let err = DirectiveRegistry::builtin().resolver(&field, &env).err().unwrap();

        assert_eq!(
            err.to_string(),
            "@gql on Query.books references unknown upstream `missing.svc`"
        );
    }

    #[test]
    fn url_is_required() {
        let env = env(RecordingExecutor::new(200, Value::Null), ServerContext::default());
        let field = field("books", vec![directive("gql", json!({"name": "books"}))]);

        assert!(matches!(
            DirectiveRegistry::builtin().resolver(&field, &env),
            Err(ConvertError::InvalidArguments { .. })
        ));
    }
}
