//! The compiled, servable form of a schema document.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::resolve::Resolver;
use crate::schema_document::{ArgumentDefinition, TypeKind, TypeRef};

pub struct ExecutableField {
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    /// `None` for plain fields, which read the parent value's property.
    pub resolver: Option<Resolver>,
}

pub struct ExecutableType {
    pub name: String,
    pub kind: TypeKind,
    pub fields: HashMap<String, ExecutableField>,
}

/// An immutable schema generation. Resolvers close over the upstream
/// snapshot this generation was compiled with.
pub struct ExecutableSchema {
    generation: u64,
    types: HashMap<String, ExecutableType>,
    query_type: String,
    mutation_type: Option<String>,
    possible_types: HashMap<String, HashSet<String>>,
}

impl ExecutableSchema {
    pub(crate) fn new(
        generation: u64,
        types: HashMap<String, ExecutableType>,
        query_type: String,
        mutation_type: Option<String>,
        possible_types: HashMap<String, HashSet<String>>,
    ) -> Self {
        ExecutableSchema {
            generation,
            types,
            query_type,
            mutation_type,
            possible_types,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> Option<&str> {
        self.mutation_type.as_deref()
    }

    pub fn get_type(&self, name: &str) -> Option<&ExecutableType> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&ExecutableField> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    /// Whether a value of object type `object_type` satisfies a fragment
    /// condition on `condition`.
    pub fn is_possible_type(&self, condition: &str, object_type: &str) -> bool {
        condition == object_type
            || self
                .possible_types
                .get(condition)
                .is_some_and(|members| members.contains(object_type))
    }

    /// Object types that implement an interface or belong to a union.
    pub fn possible_types(&self, abstract_type: &str) -> impl Iterator<Item = &str> {
        self.possible_types
            .get(abstract_type)
            .into_iter()
            .flat_map(|members| members.iter().map(String::as_str))
    }

    pub fn resolver_count(&self) -> usize {
        self.types
            .values()
            .flat_map(|ty| ty.fields.values())
            .filter(|field| field.resolver.is_some())
            .count()
    }
}

impl fmt::Debug for ExecutableSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableSchema")
            .field("generation", &self.generation)
            .field("query_type", &self.query_type)
            .field("mutation_type", &self.mutation_type)
            .field("types", &self.types.len())
            .field("resolvers", &self.resolver_count())
            .finish()
    }
}
