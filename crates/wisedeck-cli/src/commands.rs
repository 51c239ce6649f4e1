// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};
use unicode_width::UnicodeWidthStr;
use wisedeck_app::{
    DateParts, FieldKind, FormValues, ToolDef, form_fields, unfilled_required, values_to_args,
};
use wisedeck_mcp::CallOutcome;
use wisedeck_tui::{is_empty_list_result, render_json, strip_ansi};

/// Every catalog tool doubles as a sub-command; names are matched with
/// dashes and underscores interchangeable.
pub fn find_tool<'a>(tools: &'a [ToolDef], raw: &str) -> Result<&'a ToolDef> {
    let wanted = raw.to_lowercase().replace('-', "_");
    tools
        .iter()
        .find(|tool| tool.name == wanted)
        .ok_or_else(|| {
            anyhow!(
                "unknown command {raw:?}; run `wisedeck list` to see the {} available tools",
                tools.len()
            )
        })
}

fn flag_for(field_name: &str) -> String {
    format!("--{}", field_name.replace('_', "-"))
}

/// Parse `--flag value` pairs into typed tool arguments, one flag per
/// schema property. Booleans accept the bare form; arrays take JSON or a
/// comma list; numbers and dates are validated here rather than silently
/// dropped, since there is no form to go back to.
pub fn parse_tool_args(tool: &ToolDef, args: &[String]) -> Result<Map<String, Value>> {
    let fields = form_fields(tool);
    let mut drafts: FormValues = fields
        .iter()
        .map(|field| (field.name.clone(), String::new()))
        .collect();

    let mut position = 0;
    while position < args.len() {
        let arg = &args[position];
        position += 1;

        let Some(raw_flag) = arg.strip_prefix("--") else {
            bail!("unexpected argument {arg:?}; tool options are passed as --flag value");
        };
        let wanted = raw_flag.to_lowercase().replace('-', "_");
        let Some(field) = fields.iter().find(|field| field.name == wanted) else {
            let known: Vec<String> = fields.iter().map(|field| flag_for(&field.name)).collect();
            bail!(
                "unknown option --{raw_flag} for {}; valid options: {}",
                tool.name,
                known.join(", ")
            );
        };

        let draft = match &field.kind {
            FieldKind::Bool => {
                let explicit = args
                    .get(position)
                    .filter(|next| !next.starts_with("--"))
                    .cloned();
                match explicit {
                    Some(value) => {
                        position += 1;
                        if value != "true" && value != "false" {
                            bail!(
                                "{} expects true or false, got {value:?}",
                                flag_for(&field.name)
                            );
                        }
                        value
                    }
                    None => "true".to_owned(),
                }
            }
            _ => {
                let Some(value) = args.get(position) else {
                    bail!("{} requires a value", flag_for(&field.name));
                };
                position += 1;
                value.clone()
            }
        };

        match &field.kind {
            FieldKind::Number => {
                if draft.trim().parse::<f64>().is_err() {
                    bail!(
                        "{} expects a number, got {draft:?}",
                        flag_for(&field.name)
                    );
                }
            }
            FieldKind::Date(fmt) => {
                if DateParts::parse(&draft, *fmt).is_none() {
                    bail!(
                        "{} expects an ISO date ({}), got {draft:?}",
                        flag_for(&field.name),
                        match fmt {
                            wisedeck_app::DateFmt::Day => "YYYY-MM-DD",
                            wisedeck_app::DateFmt::Minute => "YYYY-MM-DDThh:mm",
                        }
                    );
                }
            }
            FieldKind::ArrayObj(_) => {
                if !matches!(serde_json::from_str::<Value>(draft.trim()), Ok(Value::Array(_))) {
                    bail!(
                        "{} expects a JSON array of objects",
                        flag_for(&field.name)
                    );
                }
            }
            _ => {}
        }
        drafts.insert(field.name.clone(), draft);
    }

    let missing = unfilled_required(&fields, &drafts);
    if !missing.is_empty() {
        let flags: Vec<String> = missing
            .iter()
            .filter_map(|&index| fields.get(index))
            .map(|field| flag_for(&field.name))
            .collect();
        bail!("missing required option(s): {}", flags.join(", "));
    }

    Ok(values_to_args(&fields, &drafts))
}

/// Render an invocation result for a pipe-friendly terminal. Tool errors
/// become process errors (exit 1).
pub fn render_outcome(outcome: &CallOutcome, color: bool) -> Result<Vec<String>> {
    let text = outcome.text();
    if outcome.is_error {
        if text.trim().is_empty() {
            bail!("tool reported an error");
        }
        bail!("{text}");
    }

    let value: Option<Value> = if text.trim().is_empty() {
        outcome.structured_content.clone()
    } else {
        serde_json::from_str(&text).ok()
    };

    let lines = match value {
        Some(value) if is_empty_list_result(&value) => vec!["No results found".to_owned()],
        Some(value) => render_json(&value),
        None if text.trim().is_empty() => vec!["OK".to_owned()],
        None => text.lines().map(str::to_owned).collect(),
    };

    if color {
        Ok(lines)
    } else {
        Ok(lines.iter().map(|line| strip_ansi(line)).collect())
    }
}

pub fn catalog_listing(tools: &[ToolDef]) -> Vec<String> {
    let pad = tools
        .iter()
        .map(|tool| tool.name.width())
        .max()
        .unwrap_or(0);
    tools
        .iter()
        .map(|tool| {
            let description = tool.description.as_deref().unwrap_or("");
            format!("{:<pad$}  {}", tool.name, description.replace('\n', " "))
                .trim_end()
                .to_owned()
        })
        .collect()
}
