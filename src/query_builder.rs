//! Renders the sub-selection a client asked for under one field as a
//! standalone query document for the upstream that owns the field.
//!
//! Output has one token group per line and no indentation. Within a
//! selection set, fields are ordered by name (then alias) while fragment
//! spreads and inline fragments keep the positions they had in the request.
//! Named fragments are emitted once each after the operation, in order of
//! first reference.

use std::collections::{HashMap, HashSet};

use graphql_parser::query::{self, TypeCondition};
use serde_json::{Map, Value};

use crate::error::TranslateError;
use crate::resolve::ResolveContext;

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Field(FieldSelection),
    FragmentSpread(String),
    InlineFragment(InlineFragment),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSelection {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    pub selection_set: Vec<Selection>,
}

/// A request argument with variables already inlined: GraphQL literal text
/// for forwarding upstream and JSON for resolvers.
#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    pub name: String,
    pub literal: String,
    pub value: Value,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Argument {
            name: name.into(),
            literal: json_to_literal(&value),
            value,
        }
    }
}

impl FieldSelection {
    pub fn leaf(name: impl Into<String>) -> Self {
        FieldSelection {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_selections(name: impl Into<String>, selection_set: Vec<Selection>) -> Self {
        FieldSelection {
            name: name.into(),
            selection_set,
            ..Default::default()
        }
    }

    /// The key this field's value is stored under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: Vec<Selection>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub selection_set: Vec<Selection>,
}

/// A forwarded query ready for the upstream call boundary.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryRequest {
    pub query: String,
    pub variables: Map<String, Value>,
}

/// Builds `query { <operation_name>(<args>) { <sub-selection> } }` followed by
/// every fragment the sub-selection needs.
pub fn build_query(operation_name: &str, ctx: &ResolveContext) -> Result<QueryRequest, TranslateError> {
    if ctx.info.selection_set.is_empty() {
        return Err(TranslateError::EmptySelection(operation_name.to_string()));
    }

    let mut renderer = Renderer::new(&ctx.info.fragments);
    let mut query = String::from("query {\n");
    query.push_str(operation_name);
    query.push_str(&render_arguments(&ctx.arguments));
    query.push_str(" {\n");
    renderer.selection_set(&ctx.info.selection_set, &mut query)?;
    query.push_str("}\n}\n");

    for definition in renderer.definitions {
        query.push_str(&definition);
    }

    Ok(QueryRequest {
        query,
        variables: Map::new(),
    })
}

/// Query for a field that returns a scalar and therefore has no sub-selection.
pub fn build_leaf_query(operation_name: &str, ctx: &ResolveContext) -> QueryRequest {
    QueryRequest {
        query: format!(
            "query {{\n{operation_name}{}\n}}\n",
            render_arguments(&ctx.arguments)
        ),
        variables: Map::new(),
    }
}

struct Renderer<'a> {
    fragments: &'a HashMap<String, FragmentDefinition>,
    definitions: Vec<String>,
    rendered: HashSet<String>,
    active: HashSet<String>,
}

impl<'a> Renderer<'a> {
    fn new(fragments: &'a HashMap<String, FragmentDefinition>) -> Self {
        Renderer {
            fragments,
            definitions: Vec::new(),
            rendered: HashSet::new(),
            active: HashSet::new(),
        }
    }

    fn selection_set(&mut self, selections: &[Selection], out: &mut String) -> Result<(), TranslateError> {
        let mut fields: Vec<&FieldSelection> = selections
            .iter()
            .filter_map(|selection| match selection {
                Selection::Field(field) => Some(field),
                _ => None,
            })
            .collect();
        fields.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.alias.cmp(&b.alias)));
        let mut fields = fields.into_iter();

        for selection in selections {
            match selection {
                Selection::Field(_) => {
                    if let Some(field) = fields.next() {
                        self.field(field, out)?;
                    }
                }
                Selection::FragmentSpread(name) => {
                    self.fragment(name)?;
                    out.push_str("...");
                    out.push_str(name);
                    out.push('\n');
                }
                Selection::InlineFragment(inline) => {
                    match &inline.type_condition {
                        Some(type_condition) => {
                            out.push_str("... on ");
                            out.push_str(type_condition);
                            out.push_str(" {\n");
                        }
                        None => out.push_str("... {\n"),
                    }
                    self.selection_set(&inline.selection_set, out)?;
                    out.push_str("}\n");
                }
            }
        }

        Ok(())
    }

    fn field(&mut self, field: &FieldSelection, out: &mut String) -> Result<(), TranslateError> {
        if let Some(alias) = &field.alias {
            out.push_str(alias);
            out.push_str(": ");
        }
        out.push_str(&field.name);

        if !field.arguments.is_empty() {
            let arguments: Vec<String> = field
                .arguments
                .iter()
                .map(|argument| format!("{}: {}", argument.name, argument.literal))
                .collect();
            out.push('(');
            out.push_str(&arguments.join(", "));
            out.push(')');
        }

        if field.selection_set.is_empty() {
            out.push('\n');
        } else {
            out.push_str(" {\n");
            self.selection_set(&field.selection_set, out)?;
            out.push_str("}\n");
        }

        Ok(())
    }

    fn fragment(&mut self, name: &str) -> Result<(), TranslateError> {
        if self.rendered.contains(name) {
            return Ok(());
        }
        if !self.active.insert(name.to_string()) {
            return Err(TranslateError::FragmentCycle(name.to_string()));
        }

        let definition = self
            .fragments
            .get(name)
            .ok_or_else(|| TranslateError::UnknownFragment(name.to_string()))?;

        // Reserve the slot so definitions keep first-reference order even when
        // this fragment spreads others.
        let slot = self.definitions.len();
        self.definitions.push(String::new());

        let mut text = format!("fragment {name} on {} {{\n", definition.type_condition);
        self.selection_set(&definition.selection_set, &mut text)?;
        text.push_str("}\n");

        self.definitions[slot] = text;
        self.active.remove(name);
        self.rendered.insert(name.to_string());
        Ok(())
    }
}

fn render_arguments(arguments: &Map<String, Value>) -> String {
    if arguments.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = arguments
        .iter()
        .map(|(name, value)| format!("{name}: {}", json_to_literal(value)))
        .collect();
    format!("({})", rendered.join(", "))
}

/// Renders a JSON value as a GraphQL input literal.
pub fn json_to_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(json_to_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{key}: {}", json_to_literal(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

/// Renders a request argument literal, inlining variable values.
fn render_input(value: &query::Value<'_, String>, variables: &Map<String, Value>) -> String {
    match value {
        query::Value::Variable(name) => variables
            .get(name)
            .map(json_to_literal)
            .unwrap_or_else(|| "null".to_string()),
        query::Value::Int(n) => n.as_i64().map(|n| n.to_string()).unwrap_or_default(),
        query::Value::Float(f) => f.to_string(),
        query::Value::String(s) => Value::String(s.clone()).to_string(),
        query::Value::Boolean(b) => b.to_string(),
        query::Value::Null => "null".to_string(),
        query::Value::Enum(name) => name.clone(),
        query::Value::List(items) => {
            let items: Vec<String> = items.iter().map(|item| render_input(item, variables)).collect();
            format!("[{}]", items.join(", "))
        }
        query::Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{key}: {}", render_input(value, variables)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

/// Converts a request argument literal to JSON, inlining variable values.
/// Enum values become strings.
pub fn input_to_json(value: &query::Value<'_, String>, variables: &Map<String, Value>) -> Value {
    match value {
        query::Value::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
        query::Value::Int(n) => n.as_i64().map(Value::from).unwrap_or(Value::Null),
        query::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        query::Value::String(s) | query::Value::Enum(s) => Value::String(s.clone()),
        query::Value::Boolean(b) => Value::Bool(*b),
        query::Value::Null => Value::Null,
        query::Value::List(items) => Value::Array(
            items
                .iter()
                .map(|item| input_to_json(item, variables))
                .collect(),
        ),
        query::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), input_to_json(value, variables)))
                .collect(),
        ),
    }
}

/// Evaluates `@skip(if:)` and `@include(if:)`.
pub fn is_included(directives: &[query::Directive<'_, String>], variables: &Map<String, Value>) -> bool {
    let condition = |directive: &query::Directive<'_, String>| {
        directive
            .arguments
            .iter()
            .find(|(name, _)| name == "if")
            .map(|(_, value)| match value {
                query::Value::Boolean(b) => *b,
                query::Value::Variable(name) => {
                    variables.get(name).and_then(Value::as_bool).unwrap_or(false)
                }
                _ => false,
            })
            .unwrap_or(false)
    };

    directives.iter().all(|directive| match directive.name.as_str() {
        "skip" => !condition(directive),
        "include" => condition(directive),
        _ => true,
    })
}

/// Converts request selections into the owned model, dropping skipped
/// selections and inlining variables.
pub fn selections_from_ast(
    items: &[query::Selection<'_, String>],
    variables: &Map<String, Value>,
) -> Vec<Selection> {
    items
        .iter()
        .filter_map(|item| match item {
            query::Selection::Field(field) => is_included(&field.directives, variables).then(|| {
                Selection::Field(FieldSelection {
                    alias: field.alias.clone(),
                    name: field.name.clone(),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|(name, value)| Argument {
                            name: name.clone(),
                            literal: render_input(value, variables),
                            value: input_to_json(value, variables),
                        })
                        .collect(),
                    selection_set: selections_from_ast(&field.selection_set.items, variables),
                })
            }),
            query::Selection::FragmentSpread(spread) => is_included(&spread.directives, variables)
                .then(|| Selection::FragmentSpread(spread.fragment_name.clone())),
            query::Selection::InlineFragment(inline) => is_included(&inline.directives, variables)
                .then(|| {
                    Selection::InlineFragment(InlineFragment {
                        type_condition: inline
                            .type_condition
                            .as_ref()
                            .map(|TypeCondition::On(name)| name.clone()),
                        selection_set: selections_from_ast(&inline.selection_set.items, variables),
                    })
                }),
        })
        .collect()
}

/// Collects the fragment table of a request document.
pub fn fragments_from_ast(
    document: &query::Document<'_, String>,
    variables: &Map<String, Value>,
) -> HashMap<String, FragmentDefinition> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            query::Definition::Fragment(fragment) => {
                let TypeCondition::On(type_condition) = &fragment.type_condition;
                Some((
                    fragment.name.clone(),
                    FragmentDefinition {
                        name: fragment.name.clone(),
                        type_condition: type_condition.clone(),
                        selection_set: selections_from_ast(&fragment.selection_set.items, variables),
                    },
                ))
            }
            query::Definition::Operation(_) => None,
        })
        .collect()
}
