//! # Configuration
//!
//! Three documents live next to the binary:
//! - `settings.yaml`: model parameters (`LiteLLMModel`) and agent limits
//! - `prompts.yaml`: prompt-template overrides, merged onto the built-in set
//! - `theme.json`: terminal colors and spacing
//!
//! Prompt overrides win key-by-key; nested mappings are replaced, not merged.

use crate::error::{self, Error, Result};
use minijinja::{Environment, UndefinedBehavior};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::{debug, warn};

/// Token in the override `system_prompt` replaced by the selected interface name
pub const INTERFACE_PLACEHOLDER: &str = "%%INTERFACE%%";

/// Built-in prompt templates
const DEFAULT_PROMPTS: &str = include_str!("../prompts/code_agent.yaml");

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::from(e)
            .with_operation("config::read")
            .with_context("path", path.display().to_string())
    })
}

// ============================================================================
// Settings
// ============================================================================

/// Contents of `settings.yaml`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(rename = "LiteLLMModel")]
    pub model: ModelSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Model parameters, named after the LiteLLM keyword arguments
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelSettings {
    /// `provider/model`, e.g. `openai/gpt-4o` or `anthropic/claude-sonnet-4-20250514`
    pub model_id: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentSettings {
    /// Model calls per turn before the agent is asked for a final answer
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Modules snippets may import on top of the base set
    #[serde(default = "default_authorized_imports")]
    pub additional_authorized_imports: Vec<String>,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            additional_authorized_imports: default_authorized_imports(),
            executor: ExecutorSettings::default(),
        }
    }
}

/// How code snippets are run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    /// Program and leading arguments; the snippet is appended as the last argument
    #[serde(default = "default_executor_command")]
    pub command: Vec<String>,
    #[serde(default = "default_executor_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            command: default_executor_command(),
            timeout_secs: default_executor_timeout(),
        }
    }
}

fn default_max_steps() -> usize {
    6
}

fn default_authorized_imports() -> Vec<String> {
    vec!["scapy.all".to_string(), "socket".to_string()]
}

fn default_executor_command() -> Vec<String> {
    vec!["python3".to_string(), "-c".to_string()]
}

fn default_executor_timeout() -> u64 {
    60
}

impl Settings {
    /// Load and validate `settings.yaml`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_document(path).map_err(|e| e.with_operation("config::load_settings"))?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(text)
            .map_err(|e| error::config_parse(origin, e.to_string()).set_source(e))?;
        settings.validate().map_err(|e| e.with_context("path", origin))?;
        debug!(model = %settings.model.model_id, max_steps = settings.agent.max_steps, "settings loaded");
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(Error::config_invalid("LiteLLMModel.model_id must not be empty"));
        }
        if self.agent.max_steps == 0 {
            return Err(Error::config_invalid("agent.max_steps must be at least 1"));
        }
        if self.agent.executor.command.is_empty() {
            return Err(Error::config_invalid("agent.executor.command must name a program"));
        }
        Ok(())
    }
}

// ============================================================================
// Prompt templates
// ============================================================================

/// Variables available to the system prompt template
#[derive(Debug, Clone, Serialize)]
pub struct PromptVars {
    pub authorized_imports: String,
    pub interface: String,
}

/// A mapping of template name to template (string or nested mapping)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptTemplates {
    templates: Mapping,
}

impl PromptTemplates {
    /// The built-in template set
    pub fn defaults() -> Result<Self> {
        Self::from_yaml_str(DEFAULT_PROMPTS, "built-in prompts")
    }

    /// Load an override document; an empty document yields no overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = read_document(path).map_err(|e| e.with_operation("config::load_prompts"))?;
        Self::from_yaml_str(&text, &path.display().to_string())
    }

    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| error::config_parse(origin, e.to_string()).set_source(e))?;
        match value {
            Value::Null => Ok(Self::default()),
            Value::Mapping(templates) => Ok(Self { templates }),
            _ => Err(error::config_parse(origin, "top level must be a mapping")),
        }
    }

    /// Replace the interface placeholder in `system_prompt`, if there is one
    pub fn substitute_interface(&mut self, interface_name: &str) {
        if let Some(Value::String(prompt)) = self.templates.get_mut("system_prompt") {
            *prompt = prompt.replace(INTERFACE_PLACEHOLDER, interface_name);
        }
    }

    /// Overlay `overrides` onto these templates, key by key
    pub fn merge(&mut self, overrides: PromptTemplates) {
        for (key, value) in overrides.templates {
            self.templates.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.templates.get(key)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.get("system_prompt").and_then(Value::as_str)
    }

    /// Look up a string nested one level down, e.g. `final_answer.pre_messages`
    pub fn nested(&self, key: &str, field: &str) -> Option<&str> {
        self.get(key)?.get(field)?.as_str()
    }

    /// Render `system_prompt` with strict undefined-variable checking
    pub fn render_system_prompt(&self, vars: &PromptVars) -> Result<String> {
        let template = self
            .system_prompt()
            .ok_or_else(|| Error::config_invalid("prompt templates have no system_prompt"))?;
        render_template("system_prompt", template, vars)
    }

    /// Number of top-level templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Render a single template string
pub fn render_template<S: Serialize>(name: &str, template: &str, vars: &S) -> Result<String> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template(name, template)
        .map_err(|e| error::template_failed(name, e.to_string()))?;

    let output = env
        .get_template(name)
        .map_err(|e| error::template_failed(name, e.to_string()))?
        .render(vars)
        .map_err(|e| error::template_failed(name, e.to_string()))?;

    Ok(output.replace("\r\n", "\n").trim().to_string())
}

/// Load the built-in templates, apply the override document and the interface name
pub fn load_prompt_templates(overrides_path: impl AsRef<Path>, interface_name: &str) -> Result<PromptTemplates> {
    let mut templates = PromptTemplates::defaults()?;
    let mut overrides = PromptTemplates::load(overrides_path)?;
    if overrides.system_prompt().is_none() {
        debug!("prompt overrides carry no system_prompt; using the built-in one");
    }
    overrides.substitute_interface(interface_name);
    templates.merge(overrides);
    Ok(templates)
}

// ============================================================================
// Theme
// ============================================================================

/// Vertical spacing between transcript messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Spacing {
    #[default]
    Sm,
    Md,
    Lg,
}

impl Spacing {
    pub fn blank_lines(&self) -> usize {
        match self {
            Spacing::Sm => 0,
            Spacing::Md => 1,
            Spacing::Lg => 2,
        }
    }
}

/// Contents of `theme.json`; colors are names (`cyan`) or `#rrggbb`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Theme {
    pub user_color: String,
    pub assistant_color: String,
    pub title_color: String,
    pub error_color: String,
    pub spacing: Spacing,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            user_color: "cyan".into(),
            assistant_color: "white".into(),
            title_color: "#00cccc".into(),
            error_color: "red".into(),
            spacing: Spacing::Sm,
        }
    }
}

impl Theme {
    /// Load `theme.json`, falling back to the default theme when the file is missing
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "theme file not found, using default theme");
            return Ok(Self::default());
        }
        let text = read_document(path).map_err(|e| e.with_operation("config::load_theme"))?;
        serde_json::from_str(&text)
            .map_err(|e| error::config_parse(path.display().to_string(), e.to_string()).set_source(e))
    }
}
