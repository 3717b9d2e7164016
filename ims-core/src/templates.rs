use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FALLBACK_CONTENT_TYPE: &str = "default";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no prompt templates for content type '{0}'")]
    UnknownContentType(String),
    #[error("template parameter '{0}' has no value")]
    MissingParameter(String),
}

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTemplates {
    #[serde(default)]
    pub system_instructions: String,
    pub summary_prompt: String,
    pub segment_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplatesConfig {
    pub content_type_prompt: String,
    #[serde(default)]
    pub content: HashMap<String, ContentTemplates>,
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid regex")
    })
}

pub fn render(template: &str, params: &HashMap<&str, String>) -> TemplateResult<String> {
    let mut missing = None;
    let rendered = placeholder().replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        match params.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(TemplateError::MissingParameter(name)),
        None => Ok(rendered.into_owned()),
    }
}

#[derive(Debug, Clone)]
pub struct TemplateService {
    config: TemplatesConfig,
}

impl TemplateService {
    pub fn new(config: TemplatesConfig) -> Self {
        Self { config }
    }

    /// Templates for `content_type`, falling back to the `default` entry.
    pub fn for_content_type(&self, content_type: &str) -> TemplateResult<&ContentTemplates> {
        self.config
            .content
            .get(content_type)
            .or_else(|| self.config.content.get(FALLBACK_CONTENT_TYPE))
            .ok_or_else(|| TemplateError::UnknownContentType(content_type.to_string()))
    }

    pub fn content_type_prompt(&self, content_types: &[String]) -> TemplateResult<String> {
        let params = HashMap::from([("CONTENT_TYPES", content_types.join("\n"))]);
        render(&self.config.content_type_prompt, &params)
    }
}
