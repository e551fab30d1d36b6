//! Template rendering behind the [`Renderer`] seam. The default is
//! non-strict handlebars with HTML escaping off.

use anyhow::{Context, Result};
use handlebars::Handlebars;
use serde_json::{Map, Value};

/// Layout used when no template file is given.
pub const DEFAULT_TEMPLATE: &str = "\
{{#if showProjectPath}}
Project Path: {{absolute_code_path}}
{{#if diffPath}}
Diff Path: {{diffPath}}
{{/if}}

---

{{/if}}

Source Tree:

```
{{source_tree}}
```

---

{{#each files}}
{{#if code}}
{{{code}}}

---

{{/if}}
{{/each}}
";

/// Turns a template and variables into prompt text.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String>;
}

/// Handlebars with prompt-friendly settings: missing variables render
/// empty, and nothing is HTML-escaped.
pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_escape_fn(handlebars::no_escape);
        Self { registry }
    }
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for HandlebarsRenderer {
    fn render(&self, template: &str, vars: &Map<String, Value>) -> Result<String> {
        self.registry
            .render_template(template, vars)
            .context("Failed to render template")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_missing_variables_render_empty() {
        let out = HandlebarsRenderer::new()
            .render("[{{nope}}]{{#if also_nope}}x{{/if}}", &Map::new())
            .unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_no_html_escaping() {
        let out = HandlebarsRenderer::new()
            .render("{{code}}", &vars(json!({ "code": "a < b && \"c\"" })))
            .unwrap();
        assert_eq!(out, "a < b && \"c\"");
    }

    #[test]
    fn test_default_template_layout() {
        let v = vars(json!({
            "showProjectPath": true,
            "absolute_code_path": "/work/app",
            "diffPath": null,
            "source_tree": "└── a.rs\n",
            "files": [
                { "path": "a.rs", "code": "# file: a.rs\n\n```rs\nfn a() {}\n```", "status": "unchanged" }
            ]
        }));
        let out = HandlebarsRenderer::new().render(DEFAULT_TEMPLATE, &v).unwrap();
        assert!(out.contains("Project Path: /work/app"));
        assert!(!out.contains("Diff Path"));
        assert!(out.contains("Source Tree:\n\n```\n└── a.rs\n\n```"));
        assert!(out.contains("# file: a.rs\n\n```rs\nfn a() {}\n```\n\n---"));
    }

    #[test]
    fn test_project_path_section_is_optional() {
        let v = vars(json!({ "showProjectPath": false, "absolute_code_path": "/secret" }));
        let out = HandlebarsRenderer::new().render(DEFAULT_TEMPLATE, &v).unwrap();
        assert!(!out.contains("/secret"));
        assert!(out.contains("Source Tree:"));
    }
}
