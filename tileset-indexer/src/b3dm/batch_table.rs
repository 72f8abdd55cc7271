//! b3dm batch table: per-feature attributes.
//!
//! Properties are either JSON arrays with one entry per batch or
//! references into the binary body. Every value is turned into the string
//! that ends up in the index, so callers never deal with JSON types.

use super::component::{component_count, ComponentType};
use super::feature_table::trim_padding;
use crate::error::{IndexerError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Keys of the batch table JSON that are not properties.
const RESERVED_KEYS: [&str; 2] = ["extensions", "extras"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinaryProperty {
    byte_offset: usize,
    component_type: String,
    #[serde(rename = "type")]
    element_type: String,
}

/// One decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cell {
    /// A JSON string
    Text(String),
    /// Any other value, in its string form
    Other(String),
}

impl Cell {
    fn as_str(&self) -> &str {
        match self {
            Cell::Text(s) | Cell::Other(s) => s,
        }
    }
}

/// Decoded batch table.
#[derive(Debug, Clone, Default)]
pub struct BatchTable {
    batch_length: usize,
    properties: BTreeMap<String, Vec<Option<Cell>>>,
}

impl BatchTable {
    /// Decodes `json` and `binary` for `batch_length` features.
    ///
    /// JSON arrays shorter than `batch_length` leave the trailing features
    /// without that property. Binary properties must fit in `binary`.
    pub fn parse(json: &[u8], binary: &[u8], batch_length: usize, context: &str) -> Result<Self> {
        let json = trim_padding(json);
        if json.is_empty() {
            return Ok(Self {
                batch_length,
                properties: BTreeMap::new(),
            });
        }

        let raw: BTreeMap<String, Value> = serde_json::from_slice(json).map_err(|e| {
            IndexerError::format(context, format!("invalid batch table JSON: {}", e))
        })?;

        let mut properties = BTreeMap::new();
        for (name, value) in raw {
            if RESERVED_KEYS.contains(&name.as_str()) {
                continue;
            }
            let values = match value {
                Value::Array(items) => items
                    .iter()
                    .take(batch_length)
                    .map(to_cell)
                    .collect(),
                Value::Object(_) => {
                    let reference: BinaryProperty = serde_json::from_value(value).map_err(|e| {
                        IndexerError::format(
                            context,
                            format!("invalid binary batch property {}: {}", name, e),
                        )
                    })?;
                    read_binary(&name, &reference, binary, batch_length, context)?
                }
                _ => {
                    return Err(IndexerError::format(
                        context,
                        format!("batch property {} is neither an array nor a binary reference", name),
                    ))
                }
            };
            properties.insert(name, values);
        }

        Ok(Self {
            batch_length,
            properties,
        })
    }

    pub fn batch_length(&self) -> usize {
        self.batch_length
    }

    /// Property names, sorted.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    fn cell(&self, name: &str, batch_id: usize) -> Option<&Cell> {
        self.properties
            .get(name)
            .and_then(|values| values.get(batch_id))
            .and_then(Option::as_ref)
    }

    /// Value of `name` for feature `batch_id`, in string form.
    pub fn value(&self, name: &str, batch_id: usize) -> Option<&str> {
        self.cell(name, batch_id).map(Cell::as_str)
    }

    /// Value of `name` for feature `batch_id` if it is a JSON string.
    pub fn string_value(&self, name: &str, batch_id: usize) -> Option<&str> {
        match self.cell(name, batch_id)? {
            Cell::Text(s) => Some(s.as_str()),
            Cell::Other(_) => None,
        }
    }

    /// Every present property of feature `batch_id`.
    pub fn properties(&self, batch_id: usize) -> BTreeMap<String, String> {
        self.properties
            .iter()
            .filter_map(|(name, values)| {
                let cell = values.get(batch_id)?.as_ref()?;
                Some((name.clone(), cell.as_str().to_string()))
            })
            .collect()
    }
}

fn to_cell(value: &Value) -> Option<Cell> {
    match value {
        Value::String(s) => Some(Cell::Text(s.clone())),
        other => stringify(other).map(Cell::Other),
    }
}

/// String form of a batch table JSON value; `null` has none.
fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| stringify(v).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Some(value.to_string()),
    }
}

fn read_binary(
    name: &str,
    reference: &BinaryProperty,
    binary: &[u8],
    batch_length: usize,
    context: &str,
) -> Result<Vec<Option<Cell>>> {
    let component = ComponentType::from_name(&reference.component_type).ok_or_else(|| {
        IndexerError::format(
            context,
            format!("unknown componentType {} for {}", reference.component_type, name),
        )
    })?;
    let components = component_count(&reference.element_type).ok_or_else(|| {
        IndexerError::format(context, format!("unknown type {} for {}", reference.element_type, name))
    })?;

    let element_size = component.size() * components;
    let end = element_size
        .checked_mul(batch_length)
        .and_then(|len| len.checked_add(reference.byte_offset))
        .filter(|end| *end <= binary.len())
        .ok_or_else(|| {
            IndexerError::format(context, format!("binary property {} exceeds the batch table body", name))
        })?;

    let values = binary[reference.byte_offset..end]
        .chunks_exact(element_size)
        .map(|element| {
            let text = element
                .chunks_exact(component.size())
                .map(|c| format_number(component, component.read(c)))
                .collect::<Vec<_>>()
                .join(",");
            Some(Cell::Other(text))
        })
        .collect();
    Ok(values)
}

fn format_number(component: ComponentType, value: f64) -> String {
    if component.is_integer() {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
