use std::fmt;

use serde::Serialize;

/// Failure to turn SDL text into a [`crate::schema_document::SchemaDocument`].
#[derive(Debug, thiserror::Error)]
pub enum SchemaParseError {
    #[error("failed to parse schema: {0}")]
    Syntax(String),
    #[error("type `{type_name}` referenced by `{referenced_by}` is not defined")]
    UnknownType {
        type_name: String,
        referenced_by: String,
    },
    #[error("`extend type {0}` has no matching type definition")]
    DanglingExtension(String),
    #[error("schema does not define a query root type")]
    MissingQueryType,
}

/// Failure to compile a parsed document into an executable schema.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("unknown directive @{directive} on {type_name}.{field}")]
    UnknownDirective {
        directive: String,
        type_name: String,
        field: String,
    },
    #[error("invalid arguments for @{directive} on {type_name}.{field}: {reason}")]
    InvalidArguments {
        directive: String,
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("@{directive} on {type_name}.{field} references unknown upstream `{upstream}`")]
    UnknownUpstream {
        directive: String,
        type_name: String,
        field: String,
        upstream: String,
    },
    #[error("{type_name}.{field} has more than one resolver directive")]
    ConflictingResolvers { type_name: String, field: String },
}

/// Failure to render a sub-selection as a forwarded query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TranslateError {
    #[error("field `{0}` has an empty sub-selection")]
    EmptySelection(String),
    #[error("fragment `{0}` is not defined")]
    UnknownFragment(String),
    #[error("fragment `{0}` spreads itself")]
    FragmentCycle(String),
}

/// Failure while talking to the registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("could not subscribe to registry after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("registry stream failed: {0}")]
    Stream(#[from] tonic::Status),
    #[error("registry pushed an invalid schema: {0}")]
    Parse(#[from] SchemaParseError),
    #[error("registry message has no schema")]
    MissingSchema,
    #[error("registry subscription panicked: {0}")]
    Panicked(String),
}

/// Failure of a call to an upstream service.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to acquire token from {authority}: {reason}")]
    Token { authority: String, reason: String },
}

/// Failure to assemble the gateway configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid listen address `{0}`")]
    ListenAddr(String),
    #[error("invalid log filter: {0}")]
    LogFilter(String),
}

/// A per-field resolution failure. The executor turns it into a `null`
/// value for the field and an entry in the response's `errors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        FieldError {
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FieldError {}

impl From<TranslateError> for FieldError {
    fn from(err: TranslateError) -> Self {
        FieldError::new(err.to_string())
    }
}

impl From<UpstreamError> for FieldError {
    fn from(err: UpstreamError) -> Self {
        FieldError::new(err.to_string())
    }
}
