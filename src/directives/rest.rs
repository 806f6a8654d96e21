use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use http::Method;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{DirectiveDefinition, DirectiveFactory, ResolverEnv, arguments, check_upstream, upstream_headers};
use crate::error::{ConvertError, FieldError, UpstreamError};
use crate::params;
use crate::query_executor::UpstreamRequest;
use crate::resolve::{ResolveContext, Resolver};
use crate::schema_document::{DirectiveApplication, FieldDefinition};

pub(super) const DEFINITION: DirectiveDefinition = DirectiveDefinition {
    name: "rest",
    factory: DirectiveFactory::Resolver(rest),
};

const DEFAULT_BODY_ARG: &str = "input";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    body: Option<String>,
    body_arg: Option<String>,
    #[serde(default)]
    query: Vec<QueryParam>,
    #[serde(default)]
    headers: Vec<HeaderParam>,
    timeout_ms: Option<u64>,
    #[serde(default)]
    not_found_as_null: bool,
    upstream: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Clone, Debug, Deserialize)]
struct QueryParam {
    key: String,
    value: String,
    #[serde(default)]
    required: bool,
}

#[derive(Clone, Debug, Deserialize)]
struct HeaderParam {
    key: String,
    value: String,
}

struct RestCall {
    url: String,
    method: Method,
    body: Option<String>,
    body_arg: String,
    query: Vec<QueryParam>,
    headers: Vec<HeaderParam>,
    timeout: Option<Duration>,
    not_found_as_null: bool,
    upstream: Option<String>,
    env: ResolverEnv,
}

fn rest(field: &FieldDefinition, directive: &DirectiveApplication, env: &ResolverEnv) -> Result<Resolver, ConvertError> {
    let args: RestArgs = arguments(field, directive)?;
    check_upstream(field, directive, args.upstream.as_deref(), env)?;

    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        ConvertError::InvalidArguments {
            directive: directive.name.clone(),
            type_name: field.parent_type.clone(),
            field: field.name.clone(),
            reason: format!("unsupported method `{}`", args.method),
        }
    })?;

    let call = Arc::new(RestCall {
        url: args.url,
        method,
        body: args.body,
        body_arg: args.body_arg.unwrap_or_else(|| DEFAULT_BODY_ARG.to_string()),
        query: args.query,
        headers: args.headers,
        timeout: args.timeout_ms.map(Duration::from_millis),
        not_found_as_null: args.not_found_as_null,
        upstream: args.upstream,
        env: env.clone(),
    });

    Ok(Arc::new(move |ctx: ResolveContext| {
        let call = Arc::clone(&call);
        async move { call.resolve(ctx).await }.boxed()
    }))
}

impl RestCall {
    fn carries_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH)
    }

    fn url(&self, ctx: &ResolveContext) -> Result<String, FieldError> {
        let raw = params::substitute(ctx, &self.url);
        let mut url = Url::parse(&raw).map_err(|e| UpstreamError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let mut pairs = Vec::new();
        for param in &self.query {
            if let Some(Value::Array(items)) = params::extract_array_if_sole(ctx, &param.value) {
                pairs.extend(items.iter().map(|item| (param.key.clone(), params::stringify(item))));
                continue;
            }

            let value = params::substitute(ctx, &param.value);
            if value.is_empty() {
                if param.required {
                    return Err(FieldError::new(format!(
                        "required query parameter `{}` is empty",
                        param.key
                    )));
                }
                continue;
            }
            pairs.push((param.key.clone(), value));
        }

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.into())
    }

    fn body(&self, ctx: &ResolveContext) -> Option<Value> {
        if !self.carries_body() {
            return None;
        }
        match &self.body {
            Some(template) => {
                let text = params::substitute(ctx, template);
                Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            None => ctx.argument(&self.body_arg).cloned(),
        }
    }

    async fn resolve(&self, ctx: ResolveContext) -> Result<Value, FieldError> {
        let url = self.url(&ctx)?;

        // Directive headers replace computed ones of the same name, including
        // `Authorization`.
        let mut headers = upstream_headers(&ctx, &self.env, &url, self.upstream.as_deref()).await?;
        for header in &self.headers {
            let value = params::substitute(&ctx, &header.value);
            if !value.is_empty() {
                headers.retain(|(name, _)| !name.eq_ignore_ascii_case(&header.key));
                headers.push((header.key.clone(), value));
            }
        }

        let request = UpstreamRequest {
            method: self.method.clone(),
            url: url.clone(),
            headers,
            body: self.body(&ctx),
            timeout: self.timeout,
        };

        tracing::debug!(field = %ctx.info.path_string(), method = %self.method, %url, "forwarding field to rest upstream");
        let response = self.env.executor.execute(request).await?;
        if response.status == 404 && self.not_found_as_null {
            return Ok(Value::Null);
        }
        if !response.is_success() {
            return Err(UpstreamError::Status {
                url,
                status: response.status,
            }
            .into());
        }
        Ok(response.body)
    }
}
