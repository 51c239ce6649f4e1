// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde_json::{Map, Value};

use crate::dates::DateFmt;
use crate::forms::FormField;

/// Editor kind for one resolved schema property, computed once at
/// tool-selection time.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text,
    Number,
    Bool,
    Enum(Vec<String>),
    ArrayText,
    ArrayEnum(Vec<String>),
    Date(DateFmt),
    ArrayObj(Value),
}

impl FieldKind {
    pub const fn badge(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Bool => "yes/no",
            Self::Enum(_) => "select",
            Self::ArrayEnum(_) => "multi",
            Self::ArrayText => "list",
            Self::Date(_) => "date",
            Self::ArrayObj(_) => "form",
        }
    }
}

/// Inline `$ref` (keeping an outer description) and collapse a nullable
/// `anyOf` down to its single non-null member. A `$ref` that cannot be
/// resolved degrades to an empty schema, which classifies as plain text.
pub fn resolve_property(property: &Value, defs: &Map<String, Value>) -> Value {
    let mut resolved = property.clone();

    if let Some(reference) = property.get("$ref").and_then(Value::as_str) {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        resolved = defs.get(name).cloned().unwrap_or_else(|| Value::Object(Map::new()));
        carry_description(property, &mut resolved);
    }

    if let Some(members) = resolved.get("anyOf").and_then(Value::as_array) {
        let non_null: Vec<&Value> = members
            .iter()
            .filter(|member| member.get("type").and_then(Value::as_str) != Some("null"))
            .collect();
        if non_null.len() == 1 {
            let outer = resolved.clone();
            resolved = non_null[0].clone();
            carry_description(&outer, &mut resolved);
        }
    }

    resolved
}

fn carry_description(outer: &Value, resolved: &mut Value) {
    if let Some(description) = outer.get("description").cloned()
        && let Some(object) = resolved.as_object_mut()
        && !object.contains_key("description")
    {
        object.insert("description".to_owned(), description);
    }
}

/// Classification precedence for properties satisfying several predicates:
/// arrayObj > date > arrayEnum > arrayText > bool > enum > number > text.
pub fn classify(resolved: &Value, defs: &Map<String, Value>) -> FieldKind {
    let type_name = resolved.get("type").and_then(Value::as_str).unwrap_or("");

    if type_name == "array" {
        let item = resolved
            .get("items")
            .map(|items| resolve_property(items, defs))
            .unwrap_or(Value::Null);
        if item.get("properties").is_some() {
            return FieldKind::ArrayObj(item);
        }
        if let Some(choices) = enum_choices(&item) {
            return FieldKind::ArrayEnum(choices);
        }
        return FieldKind::ArrayText;
    }

    if type_name == "string" {
        match resolved.get("format").and_then(Value::as_str) {
            Some("date") => return FieldKind::Date(DateFmt::Day),
            Some("date-time") => return FieldKind::Date(DateFmt::Minute),
            _ => {}
        }
    }

    if type_name == "boolean" {
        return FieldKind::Bool;
    }
    if let Some(choices) = enum_choices(resolved) {
        return FieldKind::Enum(choices);
    }
    if type_name == "integer" || type_name == "number" {
        return FieldKind::Number;
    }
    FieldKind::Text
}

fn enum_choices(schema: &Value) -> Option<Vec<String>> {
    let members = schema.get("enum")?.as_array()?;
    Some(
        members
            .iter()
            .map(|member| match member.as_str() {
                Some(text) => text.to_owned(),
                None => member.to_string(),
            })
            .collect(),
    )
}

/// Serialize completed drafts into typed JSON arguments. Empty drafts are
/// unset and omitted entirely; a number draft that does not parse is
/// dropped rather than sent malformed.
pub fn values_to_args(
    fields: &[FormField],
    values: &std::collections::BTreeMap<String, String>,
) -> Map<String, Value> {
    let mut args = Map::new();
    for field in fields {
        let Some(draft) = values.get(&field.name) else {
            continue;
        };
        let draft = draft.trim();
        if draft.is_empty() {
            continue;
        }

        let value = match &field.kind {
            FieldKind::Number => {
                if let Ok(int) = draft.parse::<i64>() {
                    Value::Number(int.into())
                } else if let Some(number) =
                    draft.parse::<f64>().ok().and_then(serde_json::Number::from_f64)
                {
                    Value::Number(number)
                } else {
                    continue;
                }
            }
            FieldKind::Bool => Value::Bool(draft == "true"),
            FieldKind::ArrayText | FieldKind::ArrayEnum(_) => match serde_json::from_str(draft) {
                Ok(Value::Array(items)) => Value::Array(items),
                _ => Value::Array(
                    draft
                        .split(',')
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| Value::String(item.to_owned()))
                        .collect(),
                ),
            },
            FieldKind::ArrayObj(_) => match serde_json::from_str(draft) {
                Ok(value @ Value::Array(_)) => value,
                _ => continue,
            },
            FieldKind::Text | FieldKind::Enum(_) | FieldKind::Date(_) => {
                Value::String(draft.to_owned())
            }
        };
        args.insert(field.name.clone(), value);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::{FieldKind, classify, resolve_property, values_to_args};
    use crate::dates::DateFmt;
    use crate::forms::FormField;
    use serde_json::{Map, Value, json};
    use std::collections::BTreeMap;

    fn defs() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "Highlight": {
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            },
            "Location": {"type": "string", "enum": ["new", "later", "archive"]}
        }) else {
            unreachable!()
        };
        map
    }

    fn kind_of(property: Value) -> FieldKind {
        let defs = defs();
        classify(&resolve_property(&property, &defs), &defs)
    }

    #[test]
    fn classification_precedence_table() {
        assert_eq!(kind_of(json!({"type": "string"})), FieldKind::Text);
        assert_eq!(kind_of(json!({"type": "integer"})), FieldKind::Number);
        assert_eq!(kind_of(json!({"type": "number"})), FieldKind::Number);
        assert_eq!(kind_of(json!({"type": "boolean"})), FieldKind::Bool);
        assert_eq!(
            kind_of(json!({"type": "string", "format": "date"})),
            FieldKind::Date(DateFmt::Day)
        );
        assert_eq!(
            kind_of(json!({"type": "string", "format": "date-time"})),
            FieldKind::Date(DateFmt::Minute)
        );
        assert_eq!(
            kind_of(json!({"type": "string", "enum": ["a", "b"]})),
            FieldKind::Enum(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(
            kind_of(json!({"type": "array", "items": {"type": "string"}})),
            FieldKind::ArrayText
        );
        assert_eq!(
            kind_of(json!({"type": "array", "items": {"enum": ["x", "y"]}})),
            FieldKind::ArrayEnum(vec!["x".to_owned(), "y".to_owned()])
        );
        assert!(matches!(
            kind_of(json!({"type": "array", "items": {"properties": {"text": {}}}})),
            FieldKind::ArrayObj(_)
        ));
    }

    #[test]
    fn nullable_union_collapses_to_inner_member() {
        let kind = kind_of(json!({
            "anyOf": [{"type": "null"}, {"type": "string", "format": "date"}]
        }));
        assert_eq!(kind, FieldKind::Date(DateFmt::Day));
    }

    #[test]
    fn ref_resolves_through_defs_and_keeps_outer_description() {
        let defs = defs();
        let property = json!({"$ref": "#/$defs/Location", "description": "Where to file it"});
        let resolved = resolve_property(&property, &defs);
        assert_eq!(
            resolved.get("description").and_then(Value::as_str),
            Some("Where to file it")
        );
        assert_eq!(
            classify(&resolved, &defs),
            FieldKind::Enum(vec![
                "new".to_owned(),
                "later".to_owned(),
                "archive".to_owned()
            ])
        );
    }

    #[test]
    fn array_item_refs_resolve_through_defs() {
        let kind = kind_of(json!({"type": "array", "items": {"$ref": "#/$defs/Highlight"}}));
        assert!(matches!(kind, FieldKind::ArrayObj(_)));
    }

    #[test]
    fn unresolvable_ref_degrades_to_text() {
        assert_eq!(kind_of(json!({"$ref": "#/$defs/Missing"})), FieldKind::Text);
    }

    fn field(name: &str, kind: FieldKind) -> FormField {
        FormField {
            name: name.to_owned(),
            kind,
            required: false,
            description: None,
            examples: Vec::new(),
            default: None,
        }
    }

    fn drafts(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(name, draft)| ((*name).to_owned(), (*draft).to_owned()))
            .collect()
    }

    #[test]
    fn args_typed_per_kind() {
        let fields = vec![
            field("url", FieldKind::Text),
            field("limit", FieldKind::Number),
            field("html", FieldKind::Bool),
            field("category", FieldKind::Enum(vec!["article".to_owned()])),
            field("tags", FieldKind::ArrayText),
            field("published", FieldKind::Date(DateFmt::Day)),
            field("highlights", FieldKind::ArrayObj(Value::Null)),
        ];
        let values = drafts(&[
            ("url", "https://example.com"),
            ("limit", "25"),
            ("html", "true"),
            ("category", "article"),
            ("tags", "rust, tui"),
            ("published", "2026-02-19"),
            ("highlights", r#"[{"text":"Note"}]"#),
        ]);

        let args = values_to_args(&fields, &values);
        assert_eq!(args["url"], json!("https://example.com"));
        assert_eq!(args["limit"], json!(25));
        let fractional = drafts(&[("limit", "2.5")]);
        assert_eq!(
            values_to_args(&[field("limit", FieldKind::Number)], &fractional)["limit"],
            json!(2.5)
        );
        assert_eq!(args["html"], json!(true));
        assert_eq!(args["category"], json!("article"));
        assert_eq!(args["tags"], json!(["rust", "tui"]));
        assert_eq!(args["published"], json!("2026-02-19"));
        assert_eq!(args["highlights"], json!([{"text": "Note"}]));
    }

    #[test]
    fn empty_and_invalid_drafts_are_omitted() {
        let fields = vec![
            field("limit", FieldKind::Number),
            field("url", FieldKind::Text),
            field("html", FieldKind::Bool),
        ];
        let values = drafts(&[("limit", "not a number"), ("url", ""), ("html", "  ")]);
        assert!(values_to_args(&fields, &values).is_empty());
    }

    #[test]
    fn array_drafts_accept_json_or_comma_form() {
        let fields = vec![field("tags", FieldKind::ArrayText)];
        let json_form = drafts(&[("tags", r#"["a","b"]"#)]);
        let comma_form = drafts(&[("tags", "a, , b")]);
        assert_eq!(values_to_args(&fields, &json_form)["tags"], json!(["a", "b"]));
        assert_eq!(values_to_args(&fields, &comma_form)["tags"], json!(["a", "b"]));
    }

    #[test]
    fn bool_draft_false_still_emitted_when_set() {
        let fields = vec![field("html", FieldKind::Bool)];
        let values = drafts(&[("html", "false")]);
        assert_eq!(values_to_args(&fields, &values)["html"], json!(false));
    }
}
