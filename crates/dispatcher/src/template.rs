use std::sync::LazyLock;

use regex::{Captures, Regex};

use bulksend_core::models::Recipient;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("invalid placeholder pattern")
});

/// 消息模板
///
/// 支持 `{name}`、`{phone}` 以及任意 `{字段名}` 占位符，缺失的字段渲染为空字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    raw: String,
}

impl MessageTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        PLACEHOLDER
            .captures_iter(&self.raw)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    pub fn render(&self, recipient: &Recipient) -> String {
        PLACEHOLDER
            .replace_all(&self.raw, |caps: &Captures| {
                let key = caps.get(1).map_or("", |m| m.as_str());
                lookup(recipient, key)
            })
            .into_owned()
    }
}

impl From<&str> for MessageTemplate {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for MessageTemplate {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

fn lookup(recipient: &Recipient, key: &str) -> String {
    if let Some(value) = recipient.template_fields.get(key) {
        return value.to_string();
    }
    match key {
        "name" => recipient.name.clone().unwrap_or_default(),
        "phone" => recipient.phone.clone(),
        _ => String::new(),
    }
}
