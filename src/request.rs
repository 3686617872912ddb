//! Request construction
//!
//! Turns a work item's JSON payload into a [`GenerationRequest`]. The default
//! builder renders an optional prompt template whose `{field}` placeholders
//! are filled from the payload. `{{` and `}}` produce literal braces.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use thiserror::Error;

use crate::backend::{GenerationRequest, ReferenceImage};
use crate::session::WorkItem;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Unbalanced '{brace}' at offset {offset}")]
    Unbalanced { brace: char, offset: usize },

    #[error("Empty placeholder at offset {0}")]
    EmptyPlaceholder(usize),
}

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Payload is missing field '{0}'")]
    MissingField(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

pub trait RequestBuilder: Send + Sync {
    fn build(&self, item: &WorkItem) -> Result<GenerationRequest, RequestError>;
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        match inner {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(TemplateError::Unbalanced { brace: '{', offset }),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(TemplateError::Unbalanced { brace: '{', offset });
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(offset));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => return Err(TemplateError::Unbalanced { brace: '}', offset }),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self { segments })
    }

    /// Field names the template references, in order of appearance.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn render(&self, payload: &Value) -> Result<String, RequestError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = lookup(payload, name)
                        .ok_or_else(|| RequestError::MissingField(name.clone()))?;
                    match value {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Dotted-path lookup into nested objects.
fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

/// Default builder: optional template, else the payload's prompt field.
///
/// References come from a `references` array of
/// `{"mime_type": ..., "data": <base64>}` objects.
#[derive(Debug, Clone)]
pub struct PayloadRequestBuilder {
    template: Option<PromptTemplate>,
    prompt_field: String,
}

impl PayloadRequestBuilder {
    pub fn new(template: Option<PromptTemplate>) -> Self {
        Self {
            template,
            prompt_field: "prompt".to_string(),
        }
    }

    /// Parse the template eagerly so a malformed one fails at startup.
    pub fn from_template_source(source: Option<&str>) -> Result<Self, TemplateError> {
        let template = source.map(PromptTemplate::parse).transpose()?;
        Ok(Self::new(template))
    }

    fn prompt(&self, payload: &Value) -> Result<String, RequestError> {
        if let Some(template) = &self.template {
            return template.render(payload);
        }
        match payload {
            Value::String(prompt) => Ok(prompt.clone()),
            _ => lookup(payload, &self.prompt_field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RequestError::MissingField(self.prompt_field.clone())),
        }
    }

    fn references(payload: &Value) -> Result<Vec<ReferenceImage>, RequestError> {
        let Some(entries) = payload.get("references") else {
            return Ok(Vec::new());
        };
        let entries = entries
            .as_array()
            .ok_or_else(|| RequestError::InvalidPayload("references must be an array".to_string()))?;
        entries
            .iter()
            .map(|entry| -> Result<ReferenceImage, RequestError> {
                let mime_type = entry
                    .get("mime_type")
                    .and_then(Value::as_str)
                    .unwrap_or("image/jpeg")
                    .to_string();
                let encoded = entry
                    .get("data")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RequestError::MissingField("references[].data".to_string()))?;
                let data = BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| RequestError::InvalidPayload(format!("reference data: {}", e)))?;
                Ok(ReferenceImage { mime_type, data })
            })
            .collect()
    }
}

impl RequestBuilder for PayloadRequestBuilder {
    fn build(&self, item: &WorkItem) -> Result<GenerationRequest, RequestError> {
        Ok(GenerationRequest {
            prompt: self.prompt(&item.payload)?,
            references: Self::references(&item.payload)?,
        })
    }
}
