//! Turns free-form model output into analysis fields.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::config::PromptConfig;
use crate::services::ProviderError;

const TAGS_FIELD: &str = "tags";

/// Extracts the JSON object from a model reply and normalizes its fields.
///
/// - the object spans from the first `{` to the last `}` (so code fences and
///   surrounding prose are tolerated)
/// - aliases rename provider field names to canonical ones
/// - a missing `tags` field is derived from `#hashtags` in the text values
/// - other missing required fields are filled with empty strings
pub fn normalize_response(
    text: &str,
    prompt: &PromptConfig,
) -> Result<BTreeMap<String, Value>, ProviderError> {
    let mut fields = extract_object(text)?;

    for (alias, canonical) in &prompt.field_aliases {
        if !fields.contains_key(canonical) {
            if let Some(value) = fields.remove(alias) {
                fields.insert(canonical.clone(), value);
            }
        }
    }

    if !fields.contains_key(TAGS_FIELD) {
        let tags = hashtags(&fields);
        if !tags.is_empty() || prompt.required_fields.iter().any(|f| f == TAGS_FIELD) {
            fields.insert(
                TAGS_FIELD.to_string(),
                Value::Array(tags.into_iter().map(Value::String).collect()),
            );
        }
    }

    for field in &prompt.required_fields {
        fields
            .entry(field.clone())
            .or_insert_with(|| Value::String(String::new()));
    }

    Ok(fields)
}

fn extract_object(text: &str) -> Result<BTreeMap<String, Value>, ProviderError> {
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => (start, end),
        _ => {
            return Err(ProviderError::InvalidResponse(format!(
                "no JSON object in reply: {}",
                preview(text)
            )))
        }
    };

    let value: Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed JSON in reply: {}", e)))?;

    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(ProviderError::InvalidResponse(
            "reply JSON is not an object".to_string(),
        )),
    }
}

/// `#words` found in the string fields, first occurrence order, deduplicated.
fn hashtags(fields: &BTreeMap<String, Value>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for value in fields.values() {
        if let Value::String(s) = value {
            for word in s.split_whitespace() {
                let word = word.trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '_');
                if word.len() > 1 && word.starts_with('#') && !tags.iter().any(|t| t == word) {
                    tags.push(word.to_string());
                }
            }
        }
    }
    tags
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
