//! Email template rendering engine.
//!
//! Two Handlebars registries back the engine: one renders plain text without
//! escaping, the other renders HTML and escapes every substituted value.
//! Phrases use `{Field}` placeholders and are rendered after translation.

pub mod phrases;

use crate::error::NotificationResult;
use handlebars::{Handlebars, no_escape};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use phrases::Template;

/// Values substituted into `{Field}` placeholders.
pub type TemplateVars = BTreeMap<String, String>;

const TEXT_LAYOUT: &str = "text_layout";
const HTML_LAYOUT: &str = "html_layout";

/// Pieces of a message body, already rendered for one output format.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BodyParts {
    pub greeting: String,
    pub message: String,
    pub call_to_action: String,
}

/// Template engine for rendering phrases and email layouts.
#[derive(Clone)]
pub struct TemplateEngine {
    text: Arc<Handlebars<'static>>,
    html: Arc<Handlebars<'static>>,
}

impl TemplateEngine {
    /// Create a new template engine with both layouts registered.
    pub fn new() -> NotificationResult<Self> {
        let mut text = Handlebars::new();
        text.register_escape_fn(no_escape);
        text.register_template_string(TEXT_LAYOUT, TEXT_LAYOUT_TEMPLATE)?;

        let mut html = Handlebars::new();
        html.register_escape_fn(escape_html);
        html.register_template_string(HTML_LAYOUT, HTML_LAYOUT_TEMPLATE)?;

        Ok(Self {
            text: Arc::new(text),
            html: Arc::new(html),
        })
    }

    /// Substitute placeholders in a plain-text phrase.
    pub fn render_text(&self, phrase: &str, vars: &TemplateVars) -> NotificationResult<String> {
        if phrase.is_empty() {
            return Ok(String::new());
        }
        Ok(self.text.render_template(&to_handlebars(phrase), vars)?)
    }

    /// Substitute placeholders in a phrase for HTML output.
    ///
    /// Values are escaped, the literal phrase is not.
    pub fn render_html(&self, phrase: &str, vars: &TemplateVars) -> NotificationResult<String> {
        if phrase.is_empty() {
            return Ok(String::new());
        }
        Ok(self.html.render_template(&to_handlebars(phrase), vars)?)
    }

    /// Plain-text body: greeting, message, optional call to action, footer.
    pub fn text_body(&self, parts: &BodyParts) -> NotificationResult<String> {
        Ok(self.text.render(TEXT_LAYOUT, parts)?)
    }

    /// HTML body; `parts` must already be HTML.
    pub fn html_body(&self, parts: &BodyParts) -> NotificationResult<String> {
        Ok(self.html.render(HTML_LAYOUT, parts)?)
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

/// `{Field}` -> `{{Field}}`.
fn to_handlebars(phrase: &str) -> String {
    phrase.replace('{', "{{").replace('}', "}}")
}

/// Escape the characters that are significant in HTML text and attributes.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

/// Turn newlines into `<br>`.
pub fn newlines_to_br(html: &str) -> String {
    html.replace('\n', "<br>")
}

/// Wrap a trailing `{Field}` placeholder of a call to action into a link.
///
/// `Click here: {Link}` becomes `Click here: <a href="{Link}">{Link}</a>`.
pub fn call_to_action_link(phrase: &str) -> String {
    let trimmed = phrase.trim_end();
    if trimmed.ends_with('}') {
        if let Some(start) = trimmed.rfind('{') {
            let (text, placeholder) = trimmed.split_at(start);
            return format!("{text}<a href=\"{placeholder}\">{placeholder}</a>");
        }
    }
    phrase.to_string()
}

// ============================================================================
// Layouts
// ============================================================================

const TEXT_LAYOUT_TEMPLATE: &str = "{{{greeting}}}

{{{message}}}{{#if call_to_action}}

{{{call_to_action}}}{{/if}}


---
ownCloud - Store. Share. Work.
https://owncloud.com
";

const HTML_LAYOUT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body>
<table cellspacing="0" cellpadding="0" border="0" width="100%">
    <tr>
        <td>
            <table cellspacing="0" cellpadding="0" border="0" width="600px">
                <tr>
                    <td width="20px">&nbsp;</td>
                    <td style="font-weight:normal; font-size:0.8em; line-height:1.2em; font-family:verdana,'arial',sans;">
                        {{{greeting}}}
                        <br><br>
                        {{{message}}}{{#if call_to_action}}
                        <br><br>
                        {{{call_to_action}}}{{/if}}
                    </td>
                </tr>
                <tr>
                    <td colspan="2">&nbsp;</td>
                </tr>
                <tr>
                    <td width="20px">&nbsp;</td>
                    <td style="font-weight:normal; font-size:0.8em; line-height:1.2em; font-family:verdana,'arial',sans;">
                        <footer>
                            <br>
                            <br>
                            --- <br>
                            ownCloud - Store. Share. Work.<br>
                            <a href="https://owncloud.com">https://owncloud.com</a>
                        </footer>
                    </td>
                </tr>
                <tr>
                    <td colspan="2">&nbsp;</td>
                </tr>
            </table>
        </td>
    </tr>
</table>
</body>
</html>
"#;
