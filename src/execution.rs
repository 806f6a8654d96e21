//! Executes client requests against an [`ExecutableSchema`].
//!
//! Query root fields and sibling fields resolve concurrently, mutation root
//! fields one after another. A failing field becomes `null` plus an entry in
//! `errors`; its siblings are unaffected.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use graphql_parser::query::{self, Definition, OperationDefinition};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::GraphQLRequest;
use crate::executable_schema::{ExecutableField, ExecutableSchema};
use crate::query_builder::{self, FieldSelection, FragmentDefinition, Selection};
use crate::resolve::{Arguments, ExecutionInfo, RequestContext, ResolveContext};
use crate::schema_document::{TypeKind, TypeRef};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl GraphQLResponse {
    pub fn request_error(message: impl Into<String>) -> Self {
        GraphQLResponse {
            data: None,
            errors: vec![GraphQLError {
                message: message.into(),
                path: Vec::new(),
            }],
        }
    }
}

enum OperationKind {
    Query,
    Mutation,
}

struct Operation {
    kind: OperationKind,
    selection_set: Vec<Selection>,
    fragments: HashMap<String, FragmentDefinition>,
}

/// Parses the request, picks its operation and lowers it to the owned
/// selection model with variables inlined.
fn prepare(request: &GraphQLRequest) -> Result<Operation, String> {
    let document = query::parse_query::<String>(&request.query).map_err(|e| format!("failed to parse query: {e}"))?;

    let mut operations = document.definitions.iter().filter_map(|definition| match definition {
        Definition::Operation(operation) => Some(operation),
        Definition::Fragment(_) => None,
    });

    let operation = match request.operation_name.as_deref() {
        Some(name) => operations
            .find(|operation| operation_name(operation) == Some(name))
            .ok_or_else(|| format!("unknown operation `{name}`"))?,
        None => {
            let first = operations.next().ok_or("request contains no operation")?;
            if operations.next().is_some() {
                return Err("operationName is required when the request contains several operations".to_string());
            }
            first
        }
    };

    let mut variables = match &request.variables {
        Some(Value::Object(variables)) => variables.clone(),
        _ => Map::new(),
    };

    let (kind, definitions, selection_set) = match operation {
        OperationDefinition::SelectionSet(selection_set) => (OperationKind::Query, None, selection_set),
        OperationDefinition::Query(query) => (
            OperationKind::Query,
            Some(&query.variable_definitions),
            &query.selection_set,
        ),
        OperationDefinition::Mutation(mutation) => (
            OperationKind::Mutation,
            Some(&mutation.variable_definitions),
            &mutation.selection_set,
        ),
        OperationDefinition::Subscription(_) => return Err("subscriptions are not supported".to_string()),
    };

    let no_variables = Map::new();
    for definition in definitions.into_iter().flatten() {
        if let Some(default) = &definition.default_value {
            if !variables.contains_key(&definition.name) {
                variables.insert(
                    definition.name.clone(),
                    query_builder::input_to_json(default, &no_variables),
                );
            }
        }
    }

    Ok(Operation {
        kind,
        selection_set: query_builder::selections_from_ast(&selection_set.items, &variables),
        fragments: query_builder::fragments_from_ast(&document, &variables),
    })
}

fn operation_name<'a>(operation: &'a OperationDefinition<'_, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

/// Runs `request` against `schema`.
pub async fn execute(schema: &ExecutableSchema, request: GraphQLRequest) -> GraphQLResponse {
    let operation = match prepare(&request) {
        Ok(operation) => operation,
        Err(message) => return GraphQLResponse::request_error(message),
    };

    let (root_type, serial) = match operation.kind {
        OperationKind::Query => (schema.query_type(), false),
        OperationKind::Mutation => match schema.mutation_type() {
            Some(mutation_type) => (mutation_type, true),
            None => return GraphQLResponse::request_error("schema does not support mutations"),
        },
    };

    let execution = Execution {
        schema,
        fragments: Arc::new(operation.fragments),
        request: Arc::new(RequestContext::new(request.auth_headers.unwrap_or_default())),
        errors: Mutex::new(Vec::new()),
    };

    let root = Value::Object(Map::new());
    let data = execution
        .selection_set(root_type, &operation.selection_set, &root, Vec::new(), serial)
        .await;

    GraphQLResponse {
        data: Some(data),
        errors: execution.errors.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
    }
}

struct Execution<'a> {
    schema: &'a ExecutableSchema,
    fragments: Arc<HashMap<String, FragmentDefinition>>,
    request: Arc<RequestContext>,
    errors: Mutex<Vec<GraphQLError>>,
}

impl<'a> Execution<'a> {
    fn error(&self, message: impl Into<String>, path: &[PathSegment]) {
        let error = GraphQLError {
            message: message.into(),
            path: path.to_vec(),
        };
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error),
            Err(poisoned) => poisoned.into_inner().push(error),
        }
    }

    fn selection_set<'b>(
        &'b self,
        type_name: &'b str,
        selections: &'b [Selection],
        parent: &'b Value,
        path: Vec<PathSegment>,
        serial: bool,
    ) -> BoxFuture<'b, Value> {
        async move {
            let mut fields = Vec::new();
            self.collect_fields(type_name, selections, &mut fields, &mut HashSet::new());

            let mut data = Map::new();
            if serial {
                for field in &fields {
                    let value = self.field(type_name, field, parent, child_path(&path, field)).await;
                    data.insert(field.response_key().to_string(), value);
                }
            } else {
                let values = join_all(
                    fields
                        .iter()
                        .map(|field| self.field(type_name, field, parent, child_path(&path, field))),
                )
                .await;
                for (field, value) in fields.iter().zip(values) {
                    data.insert(field.response_key().to_string(), value);
                }
            }
            Value::Object(data)
        }
        .boxed()
    }

    /// Flattens fragments that apply to `type_name` and merges fields that
    /// share a response key.
    fn collect_fields(
        &self,
        type_name: &str,
        selections: &[Selection],
        fields: &mut Vec<FieldSelection>,
        visited: &mut HashSet<String>,
    ) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    match fields
                        .iter_mut()
                        .find(|existing| existing.response_key() == field.response_key())
                    {
                        Some(existing) => existing.selection_set.extend(field.selection_set.iter().cloned()),
                        None => fields.push(field.clone()),
                    }
                }
                Selection::FragmentSpread(name) => {
                    if !visited.insert(name.clone()) {
                        continue;
                    }
                    if let Some(fragment) = self.fragments.get(name) {
                        if self.schema.is_possible_type(&fragment.type_condition, type_name) {
                            self.collect_fields(type_name, &fragment.selection_set, fields, visited);
                        }
                    }
                }
                Selection::InlineFragment(inline) => {
                    let applies = inline
                        .type_condition
                        .as_deref()
                        .is_none_or(|condition| self.schema.is_possible_type(condition, type_name));
                    if applies {
                        self.collect_fields(type_name, &inline.selection_set, fields, visited);
                    }
                }
            }
        }
    }

    async fn field(&self, type_name: &str, field: &FieldSelection, parent: &Value, path: Vec<PathSegment>) -> Value {
        if field.name == "__typename" {
            return Value::String(type_name.to_string());
        }

        let Some(definition) = self.schema.field(type_name, &field.name) else {
            self.error(format!("cannot query field `{}` on type `{type_name}`", field.name), &path);
            return Value::Null;
        };

        let arguments = match coerce_arguments(definition, field) {
            Ok(arguments) => arguments,
            Err(message) => {
                self.error(message, &path);
                return Value::Null;
            }
        };

        let value = match &definition.resolver {
            Some(resolver) => {
                let ctx = ResolveContext {
                    arguments,
                    parent: parent.clone(),
                    info: ExecutionInfo {
                        field_name: field.name.clone(),
                        parent_type: type_name.to_string(),
                        path: path.iter().map(segment_string).collect(),
                        selection_set: field.selection_set.clone(),
                        fragments: Arc::clone(&self.fragments),
                    },
                    request: Arc::clone(&self.request),
                    extensions: Default::default(),
                };
                match resolver(ctx).await {
                    Ok(value) => value,
                    Err(err) => {
                        tracing::debug!(error = %err, path = ?path, "field resolution failed");
                        self.error(err.message, &path);
                        return Value::Null;
                    }
                }
            }
            None => parent.get(&field.name).cloned().unwrap_or(Value::Null),
        };

        self.complete(&definition.ty, field, value, path).await
    }

    fn complete<'b>(
        &'b self,
        ty: &'b TypeRef,
        field: &'b FieldSelection,
        value: Value,
        path: Vec<PathSegment>,
    ) -> BoxFuture<'b, Value> {
        async move {
            if value.is_null() {
                return Value::Null;
            }
            match ty {
                TypeRef::NonNull(inner) => self.complete(inner, field, value, path).await,
                TypeRef::List(inner) => {
                    let Value::Array(items) = value else {
                        self.error(format!("expected a list for field `{}`", field.name), &path);
                        return Value::Null;
                    };
                    let completed = join_all(items.into_iter().enumerate().map(|(index, item)| {
                        let mut item_path = path.clone();
                        item_path.push(PathSegment::Index(index));
                        self.complete(inner, field, item, item_path)
                    }))
                    .await;
                    Value::Array(completed)
                }
                TypeRef::Named(name) => {
                    let kind = self.schema.get_type(name).map(|ty| ty.kind);
                    match kind {
                        Some(TypeKind::Object | TypeKind::Interface | TypeKind::Union) => {
                            if !value.is_object() {
                                self.error(format!("expected an object for field `{}`", field.name), &path);
                                return Value::Null;
                            }
                            let runtime_type = self.runtime_type(name, &value);
                            self.selection_set(runtime_type, &field.selection_set, &value, path, false)
                                .await
                        }
                        _ => value,
                    }
                }
            }
        }
        .boxed()
    }

    /// The concrete type of an abstract value, taken from its `__typename`
    /// when the upstream sent one.
    fn runtime_type<'b>(&self, declared: &'b str, value: &'b Value) -> &'b str {
        value
            .get("__typename")
            .and_then(Value::as_str)
            .filter(|typename| self.schema.is_possible_type(declared, typename))
            .unwrap_or(declared)
    }
}

fn child_path(path: &[PathSegment], field: &FieldSelection) -> Vec<PathSegment> {
    let mut path = path.to_vec();
    path.push(PathSegment::Field(field.response_key().to_string()));
    path
}

fn segment_string(segment: &PathSegment) -> String {
    match segment {
        PathSegment::Field(name) => name.clone(),
        PathSegment::Index(index) => index.to_string(),
    }
}

/// Request arguments plus SDL defaults for the ones the request left out.
fn coerce_arguments(definition: &ExecutableField, field: &FieldSelection) -> Result<Arguments, String> {
    if let Some(unknown) = field
        .arguments
        .iter()
        .find(|argument| !definition.arguments.iter().any(|known| known.name == argument.name))
    {
        return Err(format!("unknown argument `{}` on field `{}`", unknown.name, field.name));
    }

    let mut arguments = Arguments::new();
    for known in &definition.arguments {
        let provided = field
            .arguments
            .iter()
            .find(|argument| argument.name == known.name)
            .map(|argument| argument.value.clone())
            .filter(|value| !value.is_null() || known.default_value.is_none());

        match provided.or_else(|| known.default_value.clone()) {
            Some(value) => {
                arguments.insert(known.name.clone(), value);
            }
            None if matches!(known.ty, TypeRef::NonNull(_)) => {
                return Err(format!(
                    "missing required argument `{}` on field `{}`",
                    known.name, field.name
                ));
            }
            None => {}
        }
    }
    Ok(arguments)
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
    use serde_json::json;

    const SDL: &str = r#"
        interface Node { id: ID! }
        type Book implements Node {
          id: ID!
          title: String
          code: String @reverse
        }
        type Author implements Node { id: ID! name: String }
        type Query {
          book(id: ID!): Book @localResolver(value: {id: "{args.id}", title: "Dune"})
          books(limit: Int = 2): [Book] @localResolver(value: [{id: "1", code: "ab"}, {id: "2", code: "cd"}])
          greet(name: String = "world"): String @localResolver(value: "hello {args.name}")
          node: Node @localResolver(value: {__typename: "Author", id: "a-1", name: "Le Guin"})
          broken: String @rest(url: "{args.nothing}")
        }
        type Mutation {
          first: String @localResolver(value: "1")
          second: String @localResolver(value: "2")
        }
    "#;

    fn schema() -> ExecutableSchema {
        let document = schema_document::parse(SDL).unwrap();
        SchemaConverter::new(RecordingExecutor::new(200, Value::Null), Arc::new(StaticTokens))
            .convert(ServerContext::default(), &document)
            .unwrap()
    }

    async fn run(query: &str, variables: Value) -> GraphQLResponse {
        execute(
            &schema(),
            GraphQLRequest {
                query: query.to_string(),
                variables: Some(variables),
                operation_name: None,
                auth_headers: None,
            },
        )
        .await
    }

    #[tokio::test]
    async fn resolves_nested_fields_and_aliases() {
        let response = run(r#"{ first: book(id: "7") { id title } greet }"#, json!({})).await;

        assert_eq!(response.errors, vec![]);
        assert_eq!(
            response.data,
            Some(json!({"first": {"id": "7", "title": "Dune"}, "greet": "hello world"}))
        );
    }

    #[tokio::test]
    async fn variables_and_defaults() {
        let response = run(
            r#"query($who: String = "nobody") { greet(name: $who) }"#,
            json!({"who": "Ursula"}),
        )
        .await;
        assert_eq!(response.data, Some(json!({"greet": "hello Ursula"})));

        let response = run(r#"query($who: String = "nobody") { greet(name: $who) }"#, json!({})).await;
        assert_eq!(response.data, Some(json!({"greet": "hello nobody"})));
    }

    #[tokio::test]
    async fn completes_lists_and_middleware_fields() {
        let response = run("{ books { id code } }", json!({})).await;

        assert_eq!(
            response.data,
            Some(json!({"books": [{"id": "1", "code": "ba"}, {"id": "2", "code": "dc"}]}))
        );
    }

    #[tokio::test]
    async fn fragments_match_the_runtime_type() {
        let response = run(
            r#"
            { node { __typename id ...authorFields ... on Book { title } } }
            fragment authorFields on Author { name }
            "#,
            json!({}),
        )
        .await;

        assert_eq!(
            response.data,
            Some(json!({"node": {"__typename": "Author", "id": "a-1", "name": "Le Guin"}}))
        );
    }

    #[tokio::test]
    async fn failing_field_does_not_affect_siblings() {
        let response = run("{ broken greet }", json!({})).await;

        assert_eq!(response.data, Some(json!({"broken": null, "greet": "hello world"})));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].path, vec![PathSegment::Field("broken".to_string())]);
    }

    #[tokio::test]
    async fn unknown_fields_are_field_errors() {
        let response = run("{ greet missing }", json!({})).await;

        assert_eq!(response.data, Some(json!({"greet": "hello world", "missing": null})));
        assert_eq!(response.errors[0].message, "cannot query field `missing` on type `Query`");
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let response = run("{ book { id } }", json!({})).await;

        assert_eq!(response.data, Some(json!({"book": null})));
        assert_eq!(response.errors[0].message, "missing required argument `id` on field `book`");
    }

    #[tokio::test]
    async fn mutations_use_the_mutation_root() {
        let response = run("mutation { second first }", json!({})).await;

        assert_eq!(response.data, Some(json!({"second": "2", "first": "1"})));
    }

    #[tokio::test]
    async fn request_errors_have_no_data() {
        let response = run("{ greet", json!({})).await;

        assert_eq!(response.data, None);
        assert!(response.errors[0].message.starts_with("failed to parse query"));
    }

    #[tokio::test]
    async fn operation_name_selects_the_operation() {
        let response = execute(
            &schema(),
            GraphQLRequest {
                query: "query A { greet } query B { __typename }".to_string(),
                variables: None,
                operation_name: Some("B".to_string()),
                auth_headers: None,
            },
        )
        .await;

        assert_eq!(response.data, Some(json!({"__typename": "Query"})));
    }

    #[test]
    fn serializes_errors_with_paths() {
        let response = GraphQLResponse {
            data: Some(json!({"books": [null]})),
            errors: vec![GraphQLError {
                message: "boom".to_string(),
                path: vec![
                    PathSegment::Field("books".to_string()),
                    PathSegment::Index(0),
                ],
            }],
        };

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"data": {"books": [null]}, "errors": [{"message": "boom", "path": ["books", 0]}]})
        );
    }
}
