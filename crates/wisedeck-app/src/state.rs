// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde_json::Value;
use std::collections::BTreeSet;

use crate::dates::DateParts;
use crate::forms::{
    FormField, FormStackEntry, FormValues, form_fields, initial_values, is_unset, sub_form_fields,
    unfilled_required,
};
use crate::model::ToolDef;
use crate::schema::{FieldKind, values_to_args};

/// Sentinel index for the Execute/Add/Save row at the end of the filtered
/// field list.
pub const ACTION_ROW: isize = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Commands,
    Form,
    Loading,
    Results,
}

/// What the last invocation produced. `Empty` is the empty-collection
/// sentinel: the tool answered, but with nothing in it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunOutput {
    #[default]
    None,
    Empty,
    Json(Value),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub view: View,
    pub tools: Vec<ToolDef>,

    /// Terminal size as of the last paint; the loop refreshes this every
    /// frame so resizes land before the next key is handled.
    pub viewport_cols: usize,
    pub viewport_rows: usize,

    // commands palette
    /// Group the catalog by Reader/Readwise/Other prefix; when false the
    /// list keeps plain catalog order with no separators.
    pub group_commands: bool,
    pub cmd_filtered: Vec<usize>,
    pub cmd_cursor: usize,
    pub cmd_scroll: usize,
    pub cmd_query: String,
    pub cmd_query_cursor: usize,
    pub quit_confirm: bool,
    pub quit_token: u64,

    // form palette
    pub selected_tool: Option<usize>,
    pub fields: Vec<FormField>,
    pub values: FormValues,
    pub form_stack: Vec<FormStackEntry>,
    pub form_query: String,
    pub form_query_cursor: usize,
    pub form_filtered: Vec<isize>,
    pub form_cursor: usize,
    pub form_scroll: usize,
    pub show_required: bool,
    pub show_optional: bool,
    pub last_edited: Option<usize>,

    // field editor
    pub editing: bool,
    pub edit_field: usize,
    pub input_buf: String,
    pub input_cursor: usize,
    pub enum_cursor: usize,
    pub enum_selected: BTreeSet<usize>,
    pub date_parts: Option<DateParts>,
    pub list_items: Vec<String>,
    pub list_cursor: usize,

    // results
    pub result: RunOutput,
    pub error: Option<String>,
    pub result_scroll: usize,
    pub result_scroll_x: usize,

    // loading
    pub spinner_frame: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            view: View::default(),
            tools: Vec::new(),
            viewport_cols: 80,
            viewport_rows: 24,
            group_commands: true,
            cmd_filtered: Vec::new(),
            cmd_cursor: 0,
            cmd_scroll: 0,
            cmd_query: String::new(),
            cmd_query_cursor: 0,
            quit_confirm: false,
            quit_token: 0,
            selected_tool: None,
            fields: Vec::new(),
            values: FormValues::new(),
            form_stack: Vec::new(),
            form_query: String::new(),
            form_query_cursor: 0,
            form_filtered: Vec::new(),
            form_cursor: 0,
            form_scroll: 0,
            show_required: false,
            show_optional: false,
            last_edited: None,
            editing: false,
            edit_field: 0,
            input_buf: String::new(),
            input_cursor: 0,
            enum_cursor: 0,
            enum_selected: BTreeSet::new(),
            date_parts: None,
            list_items: Vec::new(),
            list_cursor: 0,
            result: RunOutput::None,
            error: None,
            result_scroll: 0,
            result_scroll_x: 0,
            spinner_frame: 0,
        }
    }
}

fn fold(raw: &str) -> String {
    raw.to_lowercase().replace('-', "_")
}

impl AppState {
    pub fn new(tools: Vec<ToolDef>) -> Self {
        let mut state = Self {
            tools,
            ..Self::default()
        };
        state.rebuild_command_filter();
        state
    }

    /// Filtered catalog indices. With grouping on they are ordered by
    /// group then catalog position, so the renderer can insert group
    /// separators with a single pass; with grouping off, catalog order.
    pub fn rebuild_command_filter(&mut self) {
        let query = fold(self.cmd_query.trim());
        let mut filtered: Vec<usize> = self
            .tools
            .iter()
            .enumerate()
            .filter(|(_, tool)| {
                query.is_empty()
                    || fold(&tool.name).contains(&query)
                    || tool
                        .description
                        .as_deref()
                        .is_some_and(|description| fold(description).contains(&query))
            })
            .map(|(index, _)| index)
            .collect();
        if self.group_commands {
            filtered.sort_by_key(|&index| (self.tools[index].group(), index));
        }
        self.cmd_filtered = filtered;
        self.cmd_cursor = self
            .cmd_cursor
            .min(self.cmd_filtered.len().saturating_sub(1));
        self.cmd_scroll = self.cmd_scroll.min(self.cmd_cursor);
    }

    pub fn selected_command(&self) -> Option<usize> {
        self.cmd_filtered.get(self.cmd_cursor).copied()
    }

    /// Enter the form view for one tool: resolve its fields once, seed
    /// drafts from schema defaults, reset every palette/editor field.
    pub fn select_tool(&mut self, tool_index: usize) {
        let fields = form_fields(&self.tools[tool_index]);
        self.values = initial_values(&fields);
        self.fields = fields;
        self.selected_tool = Some(tool_index);
        self.form_stack.clear();
        self.form_query.clear();
        self.form_query_cursor = 0;
        self.form_cursor = 0;
        self.form_scroll = 0;
        self.show_required = false;
        self.show_optional = false;
        self.last_edited = None;
        self.editing = false;
        self.view = View::Form;
        self.rebuild_form_filter();
    }

    /// Field indices matching the query (required first, optional after;
    /// optional rows hidden until toggled unless a query is active), with
    /// the action-row sentinel appended last.
    pub fn rebuild_form_filter(&mut self) {
        let query = fold(self.form_query.trim());
        let searching = !query.is_empty();
        let matches = |field: &FormField| !searching || fold(&field.name).contains(&query);

        let mut filtered: Vec<isize> = Vec::new();
        for (index, field) in self.fields.iter().enumerate() {
            if field.required && matches(field) {
                filtered.push(index as isize);
            }
        }
        if self.show_optional || searching {
            for (index, field) in self.fields.iter().enumerate() {
                if !field.required && matches(field) {
                    filtered.push(index as isize);
                }
            }
        }
        filtered.push(ACTION_ROW);
        self.form_filtered = filtered;
        self.form_cursor = self
            .form_cursor
            .min(self.form_filtered.len().saturating_sub(1));
        self.form_scroll = self.form_scroll.min(self.form_cursor);
    }

    pub fn field_under_cursor(&self) -> Option<usize> {
        match self.form_filtered.get(self.form_cursor) {
            Some(&index) if index >= 0 => Some(index as usize),
            _ => None,
        }
    }

    pub fn on_action_row(&self) -> bool {
        self.form_filtered.get(self.form_cursor) == Some(&ACTION_ROW)
    }

    pub fn action_label(&self) -> &'static str {
        match self.form_stack.last() {
            None => "Execute",
            Some(entry) if entry.edit_index < 0 => "Add",
            Some(_) => "Save",
        }
    }

    pub fn unfilled_required(&self) -> Vec<usize> {
        unfilled_required(&self.fields, &self.values)
    }

    pub fn set_draft(&mut self, field_index: usize, draft: String) {
        if let Some(field) = self.fields.get(field_index) {
            self.values.insert(field.name.clone(), draft);
            self.last_edited = Some(field_index);
        }
    }

    pub fn draft(&self, field_index: usize) -> &str {
        self.fields
            .get(field_index)
            .and_then(|field| self.values.get(&field.name))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Move the palette cursor to the first unfilled required row, or the
    /// action row when the form is complete. Runs after every editor
    /// confirm in the top-level flow, so enter-enter-enter walks the form.
    pub fn advance_to_next_required(&mut self) {
        let unfilled = self.unfilled_required();
        let target = self
            .form_filtered
            .iter()
            .position(|&entry| entry >= 0 && unfilled.contains(&(entry as usize)))
            .unwrap_or_else(|| self.form_filtered.len().saturating_sub(1));
        self.form_cursor = target;
    }

    /// Tab: next unfilled required strictly after the cursor, wrapping
    /// once; the action row when none remain.
    pub fn jump_next_required(&mut self) {
        let unfilled = self.unfilled_required();
        if unfilled.is_empty() {
            self.form_cursor = self.form_filtered.len().saturating_sub(1);
            return;
        }
        let len = self.form_filtered.len();
        for offset in 1..=len {
            let position = (self.form_cursor + offset) % len;
            if let Some(&entry) = self.form_filtered.get(position)
                && entry >= 0
                && unfilled.contains(&(entry as usize))
            {
                self.form_cursor = position;
                return;
            }
        }
    }

    /// Descend into one element of an arrayObj field. Returns false when
    /// the field is not an arrayObj or the index does not exist.
    pub fn push_sub_form(&mut self, field_index: usize, edit_index: isize) -> bool {
        let Some(field) = self.fields.get(field_index) else {
            return false;
        };
        let field_name = field.name.clone();
        let FieldKind::ArrayObj(item_schema) = field.kind.clone() else {
            return false;
        };
        let defs = self
            .selected_tool
            .map(|index| self.tools[index].input_schema.defs.clone())
            .unwrap_or_default();

        let sub_fields = sub_form_fields(&item_schema, &defs);
        let mut sub_values = initial_values(&sub_fields);
        if edit_index >= 0 {
            let items = parse_array_draft(self.draft(field_index));
            let Some(Value::Object(object)) = items.get(edit_index as usize) else {
                return false;
            };
            for sub_field in &sub_fields {
                if let Some(value) = object.get(&sub_field.name) {
                    sub_values.insert(sub_field.name.clone(), draft_from_json(value));
                }
            }
        }

        let entry = FormStackEntry {
            fields: std::mem::take(&mut self.fields),
            values: std::mem::take(&mut self.values),
            field_name,
            edit_index,
        };
        self.form_stack.push(entry);
        self.fields = sub_fields;
        self.values = sub_values;
        self.form_query.clear();
        self.form_query_cursor = 0;
        self.form_cursor = 0;
        self.form_scroll = 0;
        self.show_required = false;
        self.show_optional = false;
        self.last_edited = None;
        self.editing = false;
        self.rebuild_form_filter();
        true
    }

    /// Ascend to the parent form. On commit the child serializes through
    /// the same draft→args choke point as a tool call and is appended to
    /// (or replaces inside) the parent's array draft.
    pub fn pop_sub_form(&mut self, commit: bool) -> bool {
        let Some(entry) = self.form_stack.pop() else {
            return false;
        };

        let child = Value::Object(values_to_args(&self.fields, &self.values));
        self.fields = entry.fields;
        self.values = entry.values;

        if commit {
            let draft = self
                .values
                .get(&entry.field_name)
                .map(String::as_str)
                .unwrap_or("");
            let mut items = parse_array_draft(draft);
            let slot = entry.edit_index;
            if slot >= 0 && (slot as usize) < items.len() {
                items[slot as usize] = child;
            } else {
                items.push(child);
            }
            self.values
                .insert(entry.field_name.clone(), Value::Array(items).to_string());
            if let Some(index) = self
                .fields
                .iter()
                .position(|field| field.name == entry.field_name)
            {
                self.last_edited = Some(index);
            }
        }

        self.form_query.clear();
        self.form_query_cursor = 0;
        self.form_cursor = 0;
        self.form_scroll = 0;
        self.show_required = false;
        self.show_optional = false;
        self.editing = false;
        self.rebuild_form_filter();
        true
    }

    pub fn tool_args(&self) -> serde_json::Map<String, Value> {
        values_to_args(&self.fields, &self.values)
    }

    pub fn is_field_unset(&self, field_index: usize) -> bool {
        self.fields
            .get(field_index)
            .is_some_and(|field| is_unset(field, &self.values))
    }
}

pub fn parse_array_draft(draft: &str) -> Vec<Value> {
    match serde_json::from_str(draft.trim()) {
        Ok(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Draft representation of a JSON value pulled back out of an arrayObj
/// item, used to prepopulate sub-form editors.
pub fn draft_from_json(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(items) => {
            if items.iter().all(|item| !item.is_object() && !item.is_array()) {
                items
                    .iter()
                    .map(|item| match item.as_str() {
                        Some(text) => text.to_owned(),
                        None => item.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                value.to_string()
            }
        }
        Value::Object(_) => value.to_string(),
    }
}
