use std::sync::Arc;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;

use super::{DirectiveDefinition, DirectiveFactory, Middleware, ResolverEnv, arguments};
use crate::error::{ConvertError, FieldError};
use crate::params;
use crate::resolve::{ResolveContext, Resolver};
use crate::schema_document::{DirectiveApplication, FieldDefinition};

pub(super) const LOCAL_RESOLVER: DirectiveDefinition = DirectiveDefinition {
    name: "localResolver",
    factory: DirectiveFactory::Resolver(local_resolver),
};

pub(super) const LOG: DirectiveDefinition = DirectiveDefinition {
    name: "log",
    factory: DirectiveFactory::Middleware(log),
};

pub(super) const SET_HEADER: DirectiveDefinition = DirectiveDefinition {
    name: "setHeader",
    factory: DirectiveFactory::Middleware(set_header),
};

pub(super) const REVERSE: DirectiveDefinition = DirectiveDefinition {
    name: "reverse",
    factory: DirectiveFactory::Middleware(reverse),
};

pub(super) const SELECT: DirectiveDefinition = DirectiveDefinition {
    name: "select",
    factory: DirectiveFactory::Middleware(select),
};

#[derive(Deserialize)]
struct LocalResolverArgs {
    value: Value,
}

fn local_resolver(
    field: &FieldDefinition,
    directive: &DirectiveApplication,
    _env: &ResolverEnv,
) -> Result<Resolver, ConvertError> {
    let LocalResolverArgs { value } = arguments(field, directive)?;
    let value = Arc::new(value);

    Ok(Arc::new(move |ctx: ResolveContext| {
        let resolved = params::substitute_value(&ctx, &value);
        async move { Ok::<_, FieldError>(resolved) }.boxed()
    }))
}

#[derive(Deserialize)]
struct LogArgs {
    #[serde(default)]
    message: Option<String>,
}

fn log(field: &FieldDefinition, directive: &DirectiveApplication) -> Result<Middleware, ConvertError> {
    let LogArgs { message } = arguments(field, directive)?;
    let message = message.unwrap_or_else(|| "resolving field".to_string());

    Ok(Middleware::request(move |ctx| {
        let arguments = Value::Object(ctx.arguments.clone());
        tracing::info!(
            field = %ctx.info.path_string(),
            parent_type = %ctx.info.parent_type,
            %arguments,
            "{message}"
        );
        Ok(ctx)
    }))
}

#[derive(Deserialize)]
struct SetHeaderArgs {
    name: String,
    value: String,
}

fn set_header(field: &FieldDefinition, directive: &DirectiveApplication) -> Result<Middleware, ConvertError> {
    let SetHeaderArgs { name, value } = arguments(field, directive)?;

    Ok(Middleware::request(move |mut ctx| {
        let header = params::substitute(&ctx, &value);
        if name.eq_ignore_ascii_case("authorization") {
            ctx.extensions.authorization = Some(header);
        } else {
            ctx.extensions.upstream_headers.insert(name.clone(), header);
        }
        Ok(ctx)
    }))
}

fn reverse(_field: &FieldDefinition, _directive: &DirectiveApplication) -> Result<Middleware, ConvertError> {
    Ok(Middleware::response(|value| {
        Ok(match value {
            Value::String(s) => Value::String(s.chars().rev().collect()),
            other => other,
        })
    }))
}

#[derive(Deserialize)]
struct SelectArgs {
    path: String,
}

fn select(field: &FieldDefinition, directive: &DirectiveApplication) -> Result<Middleware, ConvertError> {
    let SelectArgs { path } = arguments(field, directive)?;
    let segments: Vec<String> = path
        .split('.')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Middleware::response(move |value| {
        let mut current = &value;
        for segment in &segments {
            let next = match current {
                Value::Object(fields) => fields.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return Ok(Value::Null),
            }
        }
        Ok::<_, FieldError>(current.clone())
    }))
}
