//! Column role detection and row-to-record extraction.

use super::record::{row_key, IngestedRecord, RecordStatus};
use crate::config::IngestionConfig;
use crate::error::{Result, RowragError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Normalized alias sets for each semantic role
#[derive(Debug, Clone)]
pub struct FieldAliases {
    title: HashSet<String>,
    description: HashSet<String>,
    category: HashSet<String>,
    tags: HashSet<String>,
}

fn normalize_set(items: &[String]) -> HashSet<String> {
    items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl FieldAliases {
    pub fn from_config(cfg: &IngestionConfig) -> Self {
        Self {
            title: normalize_set(&cfg.title_fields),
            description: normalize_set(&cfg.description_fields),
            category: normalize_set(&cfg.category_fields),
            tags: normalize_set(&cfg.tag_fields),
        }
    }
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// Which source column (original spelling) fills each role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldMap {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
}

impl FieldMap {
    fn is_mapped(&self, column: &str) -> bool {
        [&self.title, &self.description, &self.category, &self.tags]
            .iter()
            .any(|m| m.as_deref() == Some(column))
    }
}

/// Map header columns to roles.
///
/// Each column is tested against title, description, category, tags in that
/// order and takes the first role it matches. When several columns match the
/// same role, the last one in header order wins.
pub fn detect_fields(headers: &[String], aliases: &FieldAliases) -> FieldMap {
    let mut map = FieldMap::default();
    for header in headers {
        let key = header.trim().to_lowercase();
        if aliases.title.contains(&key) {
            map.title = Some(header.clone());
        } else if aliases.description.contains(&key) {
            map.description = Some(header.clone());
        } else if aliases.category.contains(&key) {
            map.category = Some(header.clone());
        } else if aliases.tags.contains(&key) {
            map.tags = Some(header.clone());
        }
    }
    map
}

/// Split a comma-separated tag cell, dropping empties
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn cell<'a>(
    headers: &[String],
    values: &'a [Option<String>],
    column: Option<&String>,
) -> Option<&'a str> {
    let column = column?;
    let idx = headers.iter().rposition(|h| h == column)?;
    values.get(idx)?.as_deref()
}

/// Build a record from one parsed row.
///
/// Returns `Parse` for a row with no non-null cells; such a row cannot carry
/// searchable content and counts as a failed row.
pub fn build_record(
    headers: &[String],
    values: &[Option<String>],
    field_map: &FieldMap,
    source_file: &str,
    row_number: i64,
) -> Result<IngestedRecord> {
    let title = cell(headers, values, field_map.title.as_ref()).map(str::to_string);
    let description = cell(headers, values, field_map.description.as_ref()).map(str::to_string);
    let category = cell(headers, values, field_map.category.as_ref()).map(str::to_string);
    let tags = cell(headers, values, field_map.tags.as_ref())
        .map(parse_tags)
        .filter(|t| !t.is_empty());

    let mut parts: Vec<String> = Vec::new();
    if let Some(t) = &title {
        parts.push(t.clone());
    }
    if let Some(d) = &description {
        parts.push(d.clone());
    }
    if let Some(c) = &category {
        parts.push(format!("Category: {}", c));
    }
    if let Some(t) = &tags {
        parts.push(format!("Tags: {}", t.join(", ")));
    }

    for (column, value) in headers.iter().zip(values) {
        if field_map.is_mapped(column) {
            continue;
        }
        if let Some(v) = value {
            let v = v.trim();
            if v.chars().count() > 2 {
                parts.push(format!("{}: {}", column, v));
            }
        }
    }

    let mut searchable_content = parts.join(" | ");
    if searchable_content.trim().is_empty() {
        searchable_content = headers
            .iter()
            .zip(values)
            .filter_map(|(column, value)| value.as_ref().map(|v| format!("{}: {}", column, v)))
            .collect::<Vec<_>>()
            .join(" | ");
    }
    if searchable_content.trim().is_empty() {
        return Err(RowragError::Parse(format!(
            "row {} of {} has no values",
            row_number, source_file
        )));
    }

    let mut raw_data = Map::new();
    for (column, value) in headers.iter().zip(values) {
        let v = value.clone().map(Value::String).unwrap_or(Value::Null);
        raw_data.insert(column.clone(), v);
    }

    let metadata = json!({
        "original_columns": headers,
        "field_mapping": field_map,
    });

    Ok(IngestedRecord {
        source_file: source_file.to_string(),
        row_number,
        row_key: row_key(source_file, row_number),
        raw_data,
        title,
        description,
        category,
        tags,
        searchable_content,
        content_embedding: None,
        title_embedding: None,
        status: RecordStatus::Active,
        metadata,
    })
}
