//! Template engine
//!
//! Uses minijinja with its default `{{ ... }}` / `{% ... %}` syntax and
//! strict undefined behavior. Rendering is pure: no I/O, output depends only
//! on the template text and the variables.

use minijinja::{Environment, UndefinedBehavior, Value};

use super::error::TemplateError;

/// Renders a template with a set of variables
///
/// Implemented by [`MiniJinjaRenderer`] in production; mocked in tests that
/// only care about what gets written, not how it is rendered.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateRenderer: Send + Sync {
    /// Render `template` with `vars` (a JSON object)
    fn render(&self, template: &str, vars: &serde_json::Value) -> Result<String, TemplateError>;
}

/// minijinja-backed renderer
pub struct MiniJinjaRenderer {
    env: Environment<'static>,
}

impl Default for MiniJinjaRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniJinjaRenderer {
    /// Create a renderer with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_filter("unquote", unquote);
        Self { env }
    }
}

impl TemplateRenderer for MiniJinjaRenderer {
    fn render(&self, template: &str, vars: &serde_json::Value) -> Result<String, TemplateError> {
        if !vars.is_object() {
            return Err(TemplateError::Context(format!(
                "template variables must be an object, got {}",
                vars
            )));
        }
        self.env
            .render_str(template, Value::from_serialize(vars))
            .map_err(TemplateError::from)
    }
}

/// Strip one pair of surrounding double quotes
fn unquote(value: String) -> String {
    crate::kube_utils::strip_quotes(&value).to_string()
}
