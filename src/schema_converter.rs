//! Compiles a [`SchemaDocument`] into an [`ExecutableSchema`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::directives::{self, DirectiveRegistry, ResolverEnv};
use crate::error::ConvertError;
use crate::executable_schema::{ExecutableField, ExecutableSchema, ExecutableType};
use crate::query_executor::QueryExecutor;
use crate::resolve::{self, Resolver};
use crate::schema_document::{FieldDefinition, SchemaDocument, TypeKind};
use crate::upstream_auth::TokenProvider;
use crate::upstreams::ServerContext;

pub struct SchemaConverter {
    directives: &'static DirectiveRegistry,
    executor: Arc<dyn QueryExecutor>,
    tokens: Arc<dyn TokenProvider>,
    generations: AtomicU64,
}

impl SchemaConverter {
    pub fn new(executor: Arc<dyn QueryExecutor>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_directives(DirectiveRegistry::builtin(), executor, tokens)
    }

    pub fn with_directives(
        directives: &'static DirectiveRegistry,
        executor: Arc<dyn QueryExecutor>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        SchemaConverter {
            directives,
            executor,
            tokens,
            generations: AtomicU64::new(0),
        }
    }

    /// Converts the whole document or nothing. Every resolver of the result
    /// closes over `server`.
    pub fn convert(
        &self,
        server: ServerContext,
        document: &SchemaDocument,
    ) -> Result<ExecutableSchema, ConvertError> {
        let env = ResolverEnv {
            server: Arc::new(server),
            executor: Arc::clone(&self.executor),
            tokens: Arc::clone(&self.tokens),
        };

        let mut types = HashMap::new();
        let mut possible_types: HashMap<String, HashSet<String>> = HashMap::new();

        for definition in &document.types {
            match definition.kind {
                TypeKind::Object => {
                    for interface in &definition.related {
                        possible_types
                            .entry(interface.clone())
                            .or_default()
                            .insert(definition.name.clone());
                    }
                }
                TypeKind::Union => {
                    possible_types
                        .entry(definition.name.clone())
                        .or_default()
                        .extend(definition.related.iter().cloned());
                }
                _ => {}
            }

            let mut fields = HashMap::new();
            for field in &definition.fields {
                let resolver = self.field_resolver(field, &env)?;
                fields.insert(
                    field.name.clone(),
                    ExecutableField {
                        name: field.name.clone(),
                        ty: field.ty.clone(),
                        arguments: field.arguments.clone(),
                        resolver,
                    },
                );
            }

            types.insert(
                definition.name.clone(),
                ExecutableType {
                    name: definition.name.clone(),
                    kind: definition.kind,
                    fields,
                },
            );
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let schema = ExecutableSchema::new(
            generation,
            types,
            document.query_type.clone(),
            document.mutation_type.clone(),
            possible_types,
        );

        tracing::info!(
            generation,
            upstreams = env.server.upstream_count(),
            resolvers = schema.resolver_count(),
            "compiled schema"
        );
        Ok(schema)
    }

    fn field_resolver(
        &self,
        field: &FieldDefinition,
        env: &ResolverEnv,
    ) -> Result<Option<Resolver>, ConvertError> {
        let middlewares = self.directives.middlewares(field)?;
        let resolver = match self.directives.resolver(field, env)? {
            Some(resolver) => resolver,
            None if middlewares.is_empty() => return Ok(None),
            None => resolve::property_resolver(&field.name),
        };
        Ok(Some(directives::wrap(resolver, middlewares)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::tests::RecordingExecutor;
    use crate::resolve::ResolveContext;
    use crate::schema_document;
    use crate::upstream_auth::tests::StaticTokens;
    use crate::upstreams::{self, Upstream};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn converter() -> SchemaConverter {
        SchemaConverter::new(RecordingExecutor::new(200, Value::Null), Arc::new(StaticTokens))
    }

    const SDL: &str = r#"
        interface Node { id: ID! }
        type Book implements Node {
          id: ID!
          title: String @reverse
          isbn: String
        }
        type Magazine implements Node { id: ID! }
        union Item = Book | Magazine
        type Query {
          books: [Book] @gql(url: "http://books.svc/graphql", upstream: "books.svc")
          greeting: String @localResolver(value: "hello")
        }
    "#;

    fn server() -> ServerContext {
        upstreams::rebuild(
            vec![Upstream {
                host: "books.svc".to_string(),
                auth: None,
            }],
            vec![],
        )
    }

    #[tokio::test]
    async fn attaches_resolvers_from_directives() {
        let document = schema_document::parse(SDL).unwrap();

        let schema = converter().convert(server(), &document).unwrap();

        assert_eq!(schema.query_type(), "Query");
        assert!(schema.field("Query", "books").unwrap().resolver.is_some());
        assert!(schema.field("Book", "isbn").unwrap().resolver.is_none());

        let greeting = schema.field("Query", "greeting").unwrap().resolver.clone().unwrap();
        assert_eq!(greeting(ResolveContext::default()).await, Ok(json!("hello")));
    }

    #[tokio::test]
    async fn middleware_only_fields_read_the_parent() {
        let document = schema_document::parse(SDL).unwrap();
        let schema = converter().convert(server(), &document).unwrap();

        let title = schema.field("Book", "title").unwrap().resolver.clone().unwrap();
        let value = title(ResolveContext {
            parent: json!({"title": "enuD"}),
            ..Default::default()
        })
        .await;

        assert_eq!(value, Ok(json!("Dune")));
    }

    #[test]
    fn records_possible_types() {
        let document = schema_document::parse(SDL).unwrap();
        let schema = converter().convert(server(), &document).unwrap();

        assert!(schema.is_possible_type("Node", "Book"));
        assert!(schema.is_possible_type("Item", "Magazine"));
        assert!(schema.is_possible_type("Book", "Book"));
        assert!(!schema.is_possible_type("Book", "Magazine"));
    }

    #[test]
    fn generations_increase() {
        let document = schema_document::parse(SDL).unwrap();
        let converter = converter();

        let first = converter.convert(server(), &document).unwrap();
        let second = converter.convert(server(), &document).unwrap();

        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
    }

    #[test]
    fn unknown_directive_fails_the_whole_document() {
        let document = schema_document::parse(
            r#"type Query { a: String @localResolver(value: "a") b: String @shout }"#,
        )
        .unwrap();

        let err = converter().convert(server(), &document).unwrap_err();

        assert_eq!(err.to_string(), "unknown directive @shout on Query.b");
    }

    #[test]
    fn upstream_missing_from_snapshot_fails() {
        let document = schema_document::parse(SDL).unwrap();

        let err = converter().convert(ServerContext::default(), &document).unwrap_err();

        assert!(matches!(err, ConvertError::UnknownUpstream { upstream, .. } if upstream == "books.svc"));
    }
}
