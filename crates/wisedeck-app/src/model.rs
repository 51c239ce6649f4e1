// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One named operation from the remote catalog. Property order inside
/// `input_schema` is preserved from the wire (serde_json `preserve_order`)
/// and is user-visible in the form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "$defs", default, skip_serializing_if = "Map::is_empty")]
    pub defs: Map<String, Value>,
}

impl ToolDef {
    pub fn is_required(&self, property: &str) -> bool {
        self.input_schema
            .required
            .iter()
            .any(|name| name == property)
    }

    pub fn group(&self) -> CommandGroup {
        if self.name.starts_with("reader_") {
            CommandGroup::Reader
        } else if self.name.starts_with("readwise_") {
            CommandGroup::Readwise
        } else {
            CommandGroup::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandGroup {
    Reader,
    Readwise,
    Other,
}

impl CommandGroup {
    pub const ALL: [Self; 3] = [Self::Reader, Self::Readwise, Self::Other];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Reader => "Reader",
            Self::Readwise => "Readwise",
            Self::Other => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandGroup, ToolDef};
    use serde_json::json;

    fn tool_from(value: serde_json::Value) -> ToolDef {
        serde_json::from_value(value).expect("tool should decode")
    }

    #[test]
    fn decodes_catalog_tool_with_ordered_properties() {
        let tool = tool_from(json!({
            "name": "reader_create_document",
            "description": "Save a document",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "location": {"type": "string", "enum": ["new", "later"]}
                },
                "required": ["url"]
            }
        }));

        let names: Vec<&String> = tool.input_schema.properties.keys().collect();
        assert_eq!(names, ["url", "tags", "location"]);
        assert!(tool.is_required("url"));
        assert!(!tool.is_required("tags"));
    }

    #[test]
    fn missing_schema_sections_default_to_empty() {
        let tool = tool_from(json!({"name": "readwise_list_tags"}));
        assert!(tool.input_schema.properties.is_empty());
        assert!(tool.input_schema.required.is_empty());
        assert!(tool.input_schema.defs.is_empty());
    }

    #[test]
    fn groups_follow_name_prefix() {
        assert_eq!(
            tool_from(json!({"name": "reader_search"})).group(),
            CommandGroup::Reader
        );
        assert_eq!(
            tool_from(json!({"name": "readwise_export"})).group(),
            CommandGroup::Readwise
        );
        assert_eq!(
            tool_from(json!({"name": "ping"})).group(),
            CommandGroup::Other
        );
    }
}
