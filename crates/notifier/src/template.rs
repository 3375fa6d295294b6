//! Feishu interactive-card templates.
//!
//! Every level renders through a built-in default card. Custom templates are
//! JSON documents loaded from a directory (id = file stem) whose string values
//! may reference `{{variable}}` placeholders. A string that is exactly
//! `{{links}}` expands to the rendered link buttons, and the block tags
//! `error_block`, `metrics_block`, `extra_fields` and `actions` expand to the
//! same blocks the default card uses.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};

use probe_common::{Link, Payload, ProbeError, RenderContext, Renderer};

const LINKS_PLACEHOLDER: &str = "links";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A custom card layout.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CardTemplate {
    /// Replaces the default `<emoji> [LEVEL]` title prefix.
    #[serde(default)]
    pub title_prefix: Option<String>,
    #[serde(default)]
    pub elements: Vec<Value>,
    #[serde(default)]
    pub footer_note: Option<String>,
}

/// Template lookup keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, CardTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, id: impl Into<String>, template: CardTemplate) -> Self {
        self.register(id, template);
        self
    }

    pub fn register(&mut self, id: impl Into<String>, template: CardTemplate) {
        self.templates.insert(id.into(), template);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Register every `*.json` file in `dir`, keyed by file stem.
    ///
    /// A missing directory registers nothing. Files that fail to parse are
    /// skipped with a warning. Returns the number of templates registered.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ProbeError> {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "Template directory not found, skipping");
            return Ok(0);
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| ProbeError::Config(format!("cannot read {}: {}", dir.display(), e)))?;

        let mut loaded = 0;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to read template entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str::<CardTemplate>(&raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(template) => {
                    tracing::debug!(template = id, "Loaded template");
                    self.register(id, template);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping invalid template");
                }
            }
        }

        tracing::info!(dir = %dir.display(), loaded, "Templates loaded");
        Ok(loaded)
    }
}

impl Renderer for TemplateRegistry {
    fn render(&self, template: Option<&str>, context: &RenderContext) -> Result<Payload, ProbeError> {
        let card = match template {
            None => default_card(context),
            Some(id) => {
                let custom = self
                    .templates
                    .get(id)
                    .ok_or_else(|| ProbeError::UnknownTemplate(id.to_string()))?;
                custom_card(custom, context)
            }
        };

        Ok(Payload::new(json!({
            "msg_type": "interactive",
            "card": card,
        })))
    }
}

fn default_card(ctx: &RenderContext) -> Value {
    let mut elements = Vec::new();

    if !ctx.content.is_empty() {
        elements.push(json!({ "tag": "markdown", "content": ctx.content }));
    }

    let mut fields = Vec::new();
    if !ctx.source.is_empty() {
        fields.push(short_field("Source", &ctx.source));
    }
    fields.push(short_field("Time", &ctx.timestamp.format(TIMESTAMP_FORMAT).to_string()));
    elements.push(json!({ "tag": "div", "fields": fields }));

    elements.extend(error_block(ctx));
    elements.extend(metrics_block(ctx));
    elements.extend(extra_fields(ctx));

    let at = at_line(ctx);
    if !ctx.links.is_empty() || at.is_some() {
        elements.push(json!({ "tag": "hr" }));
    }
    elements.extend(actions(&ctx.links));
    if let Some(at) = at {
        elements.push(json!({ "tag": "markdown", "content": at }));
    }

    elements.push(note(&format!("From {}", ctx.source), "plain_text"));
    card(header_title(ctx, None), ctx, elements)
}

fn custom_card(template: &CardTemplate, ctx: &RenderContext) -> Value {
    let vars = variables(ctx);

    let mut elements: Vec<Value> = template
        .elements
        .iter()
        .filter_map(|element| render_element(element, ctx, &vars))
        .collect();

    if !elements.is_empty() {
        elements.push(json!({ "tag": "hr" }));
    }
    match &template.footer_note {
        Some(footer) => {
            let footer = substitute(footer, &vars);
            elements.push(note(&format!("{} | From {}", footer, ctx.source), "lark_md"));
        }
        None => elements.push(note(&format!("From {}", ctx.source), "plain_text")),
    }

    let prefix = template.title_prefix.as_deref().map(|p| substitute(p, &vars));
    card(header_title(ctx, prefix), ctx, elements)
}

fn card(title: String, ctx: &RenderContext, elements: Vec<Value>) -> Value {
    json!({
        "config": { "wide_screen_mode": true, "enable_forward": true },
        "header": {
            "template": ctx.level.color(),
            "title": { "tag": "plain_text", "content": title },
        },
        "elements": elements,
    })
}

fn header_title(ctx: &RenderContext, prefix: Option<String>) -> String {
    match prefix {
        Some(prefix) => format!("{} {}", prefix, ctx.title),
        None => format!("{} [{}] {}", ctx.level.emoji(), ctx.level, ctx.title),
    }
}

fn short_field(label: &str, value: &str) -> Value {
    json!({
        "is_short": true,
        "text": { "tag": "lark_md", "content": format!("**{}**\n{}", label, value) },
    })
}

fn note(text: &str, tag: &str) -> Value {
    json!({
        "tag": "note",
        "elements": [{ "tag": tag, "content": text }],
    })
}

/// `<at>` tags for mention-all and every mentioned user, space separated.
fn at_line(ctx: &RenderContext) -> Option<String> {
    let mut tags = Vec::new();
    if ctx.mention_all {
        tags.push("<at id=all></at>".to_string());
    }
    tags.extend(ctx.mentions.iter().map(|id| format!("<at id={}></at>", id)));
    (!tags.is_empty()).then(|| tags.join(" "))
}

fn error_block(ctx: &RenderContext) -> Option<Value> {
    let msg = ctx.error_msg.as_deref().filter(|m| !m.is_empty())?;
    let mut content = String::new();
    if let Some(code) = ctx.error_code.as_deref().filter(|c| !c.is_empty()) {
        content.push_str(&format!("**Error code** `{}`\n\n", code));
    }
    content.push_str(&format!("**Error**\n```\n{}\n```", msg));
    Some(json!({ "tag": "markdown", "content": content }))
}

fn metrics_block(ctx: &RenderContext) -> Option<Value> {
    if ctx.metrics.is_empty() {
        return None;
    }
    let mut lines = vec!["**Metrics**".to_string()];
    for (key, value) in &ctx.metrics {
        lines.push(format!("• {}: {}", key, format_metric(value)));
    }
    Some(json!({ "tag": "markdown", "content": lines.join("\n") }))
}

fn extra_fields(ctx: &RenderContext) -> Option<Value> {
    if ctx.extra.is_empty() {
        return None;
    }
    let fields: Vec<Value> = ctx
        .extra
        .iter()
        .map(|(key, value)| short_field(key, &plain(value)))
        .collect();
    Some(json!({ "tag": "div", "fields": fields }))
}

fn actions(links: &[Link]) -> Option<Value> {
    if links.is_empty() {
        return None;
    }
    Some(json!({ "tag": "action", "actions": buttons(links) }))
}

/// The first non-danger link is the primary button.
fn buttons(links: &[Link]) -> Vec<Value> {
    let mut primary_taken = false;
    links
        .iter()
        .map(|link| {
            let kind = if link.is_danger {
                "danger"
            } else if !primary_taken {
                primary_taken = true;
                "primary"
            } else {
                "default"
            };
            json!({
                "tag": "button",
                "text": { "tag": "plain_text", "content": link.text },
                "type": kind,
                "url": link.url,
            })
        })
        .collect()
}

fn format_metric(value: &Value) -> String {
    match value.as_i64() {
        Some(n) if n.abs() >= 1000 => group_thousands(n),
        _ => plain(value),
    }
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// String form of a JSON value without quotes around strings.
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Placeholder values for custom templates.
///
/// Extra fields are exposed under their own names unless they collide with a
/// built-in variable; metrics are exposed as `metrics.<name>`.
fn variables(ctx: &RenderContext) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (key, value) in &ctx.extra {
        vars.insert(key.clone(), plain(value));
    }
    for (key, value) in &ctx.metrics {
        vars.insert(format!("metrics.{}", key), format_metric(value));
    }

    let builtins = [
        ("level", ctx.level.to_string()),
        ("level_color", ctx.level.color().to_string()),
        ("level_emoji", ctx.level.emoji().to_string()),
        ("level_priority", ctx.level.priority().to_string()),
        ("title", ctx.title.clone()),
        ("formatted_title", header_title(ctx, None)),
        ("content", ctx.content.clone()),
        ("source", ctx.source.clone()),
        ("timestamp", ctx.timestamp.format(TIMESTAMP_FORMAT).to_string()),
        ("error_msg", ctx.error_msg.clone().unwrap_or_default()),
        ("error_code", ctx.error_code.clone().unwrap_or_default()),
        ("mention_all", if ctx.mention_all { "true".into() } else { String::new() }),
        ("mentions", at_line(ctx).unwrap_or_default()),
    ];
    for (key, value) in builtins {
        vars.insert(key.to_string(), value);
    }
    vars
}

/// Replace every `{{ name }}` in `input`. Unknown names render as empty.
fn substitute(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        if let Some(value) = vars.get(name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn is_links_placeholder(s: &str) -> bool {
    s.trim()
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .is_some_and(|name| name.trim() == LINKS_PLACEHOLDER)
}

/// Render one top-level element. `None` drops it from the card.
fn render_element(element: &Value, ctx: &RenderContext, vars: &HashMap<String, String>) -> Option<Value> {
    if let Value::Object(map) = element {
        if let Some(condition) = map.get("condition").and_then(Value::as_str) {
            let rendered = substitute(condition, vars);
            if matches!(rendered.trim(), "" | "false" | "0" | "[]" | "{}") {
                return None;
            }
        }

        match map.get("tag").and_then(Value::as_str) {
            Some("error_block") => return error_block(ctx),
            Some("metrics_block") => return metrics_block(ctx),
            Some("extra_fields") => return extra_fields(ctx),
            Some("actions") => return actions(&ctx.links),
            _ => {}
        }
    }

    let rendered = render_value(element, ctx, vars);
    let empty_markdown = rendered.get("tag").and_then(Value::as_str) == Some("markdown")
        && rendered
            .get("content")
            .and_then(Value::as_str)
            .is_some_and(|c| c.trim().is_empty());
    (!empty_markdown).then_some(rendered)
}

fn render_value(value: &Value, ctx: &RenderContext, vars: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) if is_links_placeholder(s) => Value::Array(buttons(&ctx.links)),
        Value::String(s) => Value::String(substitute(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "condition" && key.as_str() != "_comment")
                .map(|(key, v)| (key.clone(), render_value(v, ctx, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}
