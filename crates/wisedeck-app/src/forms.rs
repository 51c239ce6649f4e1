// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::model::ToolDef;
use crate::schema::{FieldKind, classify, resolve_property};

/// String drafts, keyed by property name. Keys always mirror the field
/// list; parsing happens once, at serialization time.
pub type FormValues = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct FormField {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
    pub examples: Vec<String>,
    pub default: Option<Value>,
}

impl FormField {
    pub fn first_example(&self) -> Option<&str> {
        self.examples.first().map(String::as_str)
    }
}

/// A parent form frozen while the user edits one element of an
/// array-of-objects field. `edit_index` is -1 when appending.
#[derive(Debug, Clone, PartialEq)]
pub struct FormStackEntry {
    pub fields: Vec<FormField>,
    pub values: FormValues,
    pub field_name: String,
    pub edit_index: isize,
}

pub fn form_fields(tool: &ToolDef) -> Vec<FormField> {
    fields_from_schema(
        &tool.input_schema.properties,
        &tool.input_schema.required,
        &tool.input_schema.defs,
    )
}

/// Shared by the top-level form and arrayObj sub-forms; `$ref`s inside
/// item schemas resolve against the tool-level definitions table.
pub fn fields_from_schema(
    properties: &Map<String, Value>,
    required: &[String],
    defs: &Map<String, Value>,
) -> Vec<FormField> {
    properties
        .iter()
        .map(|(name, property)| {
            let resolved = resolve_property(property, defs);
            let kind = classify(&resolved, defs);
            FormField {
                name: name.clone(),
                kind,
                required: required.iter().any(|entry| entry == name),
                description: resolved
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                examples: resolved
                    .get("examples")
                    .and_then(Value::as_array)
                    .map(|examples| {
                        examples
                            .iter()
                            .map(|example| match example.as_str() {
                                Some(text) => text.to_owned(),
                                None => example.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                default: resolved.get("default").cloned().filter(|d| !d.is_null()),
            }
        })
        .collect()
}

pub fn sub_form_fields(item_schema: &Value, defs: &Map<String, Value>) -> Vec<FormField> {
    let empty = Map::new();
    let properties = item_schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let required: Vec<String> = item_schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();
    fields_from_schema(properties, &required, defs)
}

/// Every field gets a draft up front: the schema default when one exists,
/// otherwise "".
pub fn initial_values(fields: &[FormField]) -> FormValues {
    fields
        .iter()
        .map(|field| {
            let draft = field
                .default
                .as_ref()
                .map(|default| default_draft(&field.kind, default))
                .unwrap_or_default();
            (field.name.clone(), draft)
        })
        .collect()
}

fn default_draft(kind: &FieldKind, default: &Value) -> String {
    match (kind, default) {
        (FieldKind::ArrayObj(_), Value::Array(_)) => default.to_string(),
        (FieldKind::ArrayText | FieldKind::ArrayEnum(_), Value::Array(items)) => items
            .iter()
            .map(|item| match item.as_str() {
                Some(text) => text.to_owned(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        (_, Value::String(text)) => text.clone(),
        (_, Value::Bool(flag)) => flag.to_string(),
        (_, Value::Number(number)) => number.to_string(),
        _ => String::new(),
    }
}

/// A required field is unset when its draft trims empty; an arrayObj draft
/// holding `[]` is unset too.
pub fn is_unset(field: &FormField, values: &FormValues) -> bool {
    let draft = values.get(&field.name).map(String::as_str).unwrap_or("");
    let draft = draft.trim();
    if draft.is_empty() {
        return true;
    }
    if matches!(field.kind, FieldKind::ArrayObj(_)) {
        return matches!(
            serde_json::from_str::<Value>(draft),
            Ok(Value::Array(items)) if items.is_empty()
        );
    }
    false
}

pub fn unfilled_required(fields: &[FormField], values: &FormValues) -> Vec<usize> {
    fields
        .iter()
        .enumerate()
        .filter(|(_, field)| field.required && is_unset(field, values))
        .map(|(index, _)| index)
        .collect()
}

pub fn required_progress(fields: &[FormField], values: &FormValues) -> (usize, usize) {
    let total = fields.iter().filter(|field| field.required).count();
    let set = total - unfilled_required(fields, values).len();
    (set, total)
}
