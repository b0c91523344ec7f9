// Message template compilation
// Replaces `{tag}` placeholders with per-subscriber values.

use crate::models::{FilterPayload, MessageLoads};
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([^{}\s]+)\}").expect("placeholder pattern is a valid regex")
    })
}

/// TemplateCompiler substitutes `{tag}` placeholders in subject and body text
///
/// Values come from two maps: `message_loads` (text) and `filter_payload`
/// (scalars, stringified). When a tag is present in both, the filter payload
/// value wins. Tags found in neither map are left verbatim.
pub struct TemplateCompiler<'a> {
    message_loads: &'a MessageLoads,
    filter_payload: &'a FilterPayload,
}

impl<'a> TemplateCompiler<'a> {
    pub fn new(message_loads: &'a MessageLoads, filter_payload: &'a FilterPayload) -> Self {
        Self {
            message_loads,
            filter_payload,
        }
    }

    fn value_for(&self, tag: &str) -> Option<String> {
        let mut value = self.message_loads.get(tag).cloned();
        if let Some(filter_value) = self.filter_payload.get(tag) {
            value = Some(filter_value.to_string());
        }
        value
    }

    /// Compile a template
    ///
    /// Substitution is a single pass over the original text, so substituted
    /// values are never themselves re-templated.
    pub fn compile(&self, template: &str) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &Captures| {
                self.value_for(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Extract the distinct tag names of a template, in order of first appearance
pub fn extract_tags(template: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut seen = HashSet::new();

    for cap in placeholder_regex().captures_iter(template) {
        let tag = cap[1].to_string();
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }

    tags
}
