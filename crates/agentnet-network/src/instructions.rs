//! Instruction template resolution — runs once, at load time.
//!
//! Instructions may reference shared fragments as `{key}`. Every key present
//! in `commondefs.replacement_strings` is substituted; anything else that looks
//! like a placeholder is left verbatim and reported back to the loader.

use std::collections::BTreeMap;

/// Key of the fragment appended to `demo` nodes.
pub const DEMO_MODE_KEY: &str = "demo_mode";

/// Instructions after substitution, plus any placeholders nobody defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstructions {
    pub text: String,
    pub unresolved: Vec<String>,
}

pub fn resolve(
    template: &str,
    replacements: &BTreeMap<String, String>,
    demo: bool,
) -> ResolvedInstructions {
    let mut text = String::with_capacity(template.len());
    let mut unresolved = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder(&after[..close]) => {
                let key = &after[..close];
                match replacements.get(key) {
                    Some(value) => text.push_str(value.trim()),
                    None => {
                        text.push_str(&rest[open..open + close + 2]);
                        if !unresolved.iter().any(|u| u == key) {
                            unresolved.push(key.to_string());
                        }
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                text.push('{');
                rest = after;
            }
        }
    }
    text.push_str(rest);

    if demo && !template.contains(&format!("{{{}}}", DEMO_MODE_KEY)) {
        if let Some(demo_text) = replacements.get(DEMO_MODE_KEY) {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(demo_text.trim());
        }
    }

    ResolvedInstructions {
        text: text.trim().to_string(),
        unresolved,
    }
}

fn is_placeholder(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
