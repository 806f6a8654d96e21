//! Owned model of a schema-definition-language document, as far as the
//! schema converter needs it.

use std::collections::HashMap;

use graphql_parser::schema::{self, Definition, TypeDefinition as AstTypeDefinition, TypeExtension};
use serde_json::{Map, Number, Value};

use crate::error::SchemaParseError;

pub const BUILTIN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.named(),
        }
    }

    fn from_ast(ty: &schema::Type<'_, String>) -> Self {
        match ty {
            schema::Type::NamedType(name) => TypeRef::Named(name.clone()),
            schema::Type::ListType(inner) => TypeRef::List(Box::new(TypeRef::from_ast(inner))),
            schema::Type::NonNullType(inner) => TypeRef::NonNull(Box::new(TypeRef::from_ast(inner))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    InputObject,
    Enum,
    Scalar,
}

/// A directive written on a field, with its literal arguments as JSON.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectiveApplication {
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArgumentDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefinition {
    pub parent_type: String,
    pub name: String,
    pub ty: TypeRef,
    pub arguments: Vec<ArgumentDefinition>,
    pub directives: Vec<DirectiveApplication>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDefinition>,
    /// Interfaces an object implements, or the members of a union.
    pub related: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDocument {
    pub types: Vec<TypeDefinition>,
    pub query_type: String,
    pub mutation_type: Option<String>,
}

impl SchemaDocument {
    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.iter().find(|ty| ty.name == name)
    }
}

/// Parses and validates SDL text.
pub fn parse(sdl: &str) -> Result<SchemaDocument, SchemaParseError> {
    let document = schema::parse_schema::<String>(sdl)
        .map_err(|e| SchemaParseError::Syntax(e.to_string()))?;

    let mut types: Vec<TypeDefinition> = Vec::new();
    let mut extensions = Vec::new();
    let mut roots: (Option<String>, Option<String>) = (None, None);

    for definition in &document.definitions {
        match definition {
            Definition::SchemaDefinition(schema_definition) => {
                roots = (schema_definition.query.clone(), schema_definition.mutation.clone());
            }
            Definition::TypeDefinition(type_definition) => types.push(convert_type(type_definition)),
            Definition::TypeExtension(extension) => extensions.push(extension),
            Definition::DirectiveDefinition(_) => {}
        }
    }

    for extension in extensions {
        apply_extension(&mut types, extension)?;
    }

    let index: HashMap<&str, TypeKind> = types.iter().map(|ty| (ty.name.as_str(), ty.kind)).collect();
    let query_type = roots.0.unwrap_or_else(|| "Query".to_string());
    let mutation_type = roots
        .1
        .or_else(|| index.contains_key("Mutation").then(|| "Mutation".to_string()));

    if index.get(query_type.as_str()) != Some(&TypeKind::Object) {
        return Err(SchemaParseError::MissingQueryType);
    }
    validate_references(&types, &index)?;

    Ok(SchemaDocument {
        types,
        query_type,
        mutation_type,
    })
}

fn validate_references(
    types: &[TypeDefinition],
    index: &HashMap<&str, TypeKind>,
) -> Result<(), SchemaParseError> {
    let known = |name: &str| BUILTIN_SCALARS.contains(&name) || index.contains_key(name);

    for ty in types {
        for related in &ty.related {
            if !known(related) {
                return Err(SchemaParseError::UnknownType {
                    type_name: related.clone(),
                    referenced_by: ty.name.clone(),
                });
            }
        }
        for field in &ty.fields {
            let references = std::iter::once(&field.ty).chain(field.arguments.iter().map(|a| &a.ty));
            for reference in references {
                if !known(reference.named()) {
                    return Err(SchemaParseError::UnknownType {
                        type_name: reference.named().to_string(),
                        referenced_by: format!("{}.{}", ty.name, field.name),
                    });
                }
            }
        }
    }

    Ok(())
}

fn convert_type(definition: &AstTypeDefinition<'_, String>) -> TypeDefinition {
    let (name, kind, fields, related) = match definition {
        AstTypeDefinition::Object(object) => (
            &object.name,
            TypeKind::Object,
            convert_fields(&object.name, &object.fields),
            object.implements_interfaces.clone(),
        ),
        AstTypeDefinition::Interface(interface) => (
            &interface.name,
            TypeKind::Interface,
            convert_fields(&interface.name, &interface.fields),
            Vec::new(),
        ),
        AstTypeDefinition::Union(union) => (&union.name, TypeKind::Union, Vec::new(), union.types.clone()),
        AstTypeDefinition::InputObject(input) => (&input.name, TypeKind::InputObject, Vec::new(), Vec::new()),
        AstTypeDefinition::Enum(enumeration) => (&enumeration.name, TypeKind::Enum, Vec::new(), Vec::new()),
        AstTypeDefinition::Scalar(scalar) => (&scalar.name, TypeKind::Scalar, Vec::new(), Vec::new()),
    };

    TypeDefinition {
        name: name.clone(),
        kind,
        fields,
        related,
    }
}

fn apply_extension(
    types: &mut [TypeDefinition],
    extension: &TypeExtension<'_, String>,
) -> Result<(), SchemaParseError> {
    let (name, fields, related) = match extension {
        TypeExtension::Object(object) => (
            &object.name,
            convert_fields(&object.name, &object.fields),
            object.implements_interfaces.clone(),
        ),
        TypeExtension::Interface(interface) => (
            &interface.name,
            convert_fields(&interface.name, &interface.fields),
            Vec::new(),
        ),
        TypeExtension::Union(union) => (&union.name, Vec::new(), union.types.clone()),
        TypeExtension::Scalar(scalar) => (&scalar.name, Vec::new(), Vec::new()),
        TypeExtension::Enum(enumeration) => (&enumeration.name, Vec::new(), Vec::new()),
        TypeExtension::InputObject(input) => (&input.name, Vec::new(), Vec::new()),
    };

    let target = types
        .iter_mut()
        .find(|ty| &ty.name == name)
        .ok_or_else(|| SchemaParseError::DanglingExtension(name.clone()))?;
    target.fields.extend(fields);
    target.related.extend(related);
    Ok(())
}

fn convert_fields(parent_type: &str, fields: &[schema::Field<'_, String>]) -> Vec<FieldDefinition> {
    fields
        .iter()
        .map(|field| FieldDefinition {
            parent_type: parent_type.to_string(),
            name: field.name.clone(),
            ty: TypeRef::from_ast(&field.field_type),
            arguments: field
                .arguments
                .iter()
                .map(|argument| ArgumentDefinition {
                    name: argument.name.clone(),
                    ty: TypeRef::from_ast(&argument.value_type),
                    default_value: argument.default_value.as_ref().map(literal_to_json),
                })
                .collect(),
            directives: field
                .directives
                .iter()
                .map(|directive| DirectiveApplication {
                    name: directive.name.clone(),
                    arguments: directive
                        .arguments
                        .iter()
                        .map(|(name, value)| (name.clone(), literal_to_json(value)))
                        .collect(),
                })
                .collect(),
        })
        .collect()
}

/// Converts a constant SDL literal to JSON. Enum values become strings and
/// variables, which cannot appear in SDL, become null.
pub fn literal_to_json(value: &schema::Value<'_, String>) -> Value {
    match value {
        schema::Value::Variable(_) | schema::Value::Null => Value::Null,
        schema::Value::Int(n) => n.as_i64().map(Value::from).unwrap_or(Value::Null),
        schema::Value::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        schema::Value::String(s) => Value::String(s.clone()),
        schema::Value::Boolean(b) => Value::Bool(*b),
        schema::Value::Enum(name) => Value::String(name.clone()),
        schema::Value::List(items) => Value::Array(items.iter().map(literal_to_json).collect()),
        schema::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), literal_to_json(value)))
                .collect(),
        ),
    }
}
