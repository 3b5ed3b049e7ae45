//! Path templates for secret stores.
//!
//! Store configs address secrets with templates like
//! `/concourse/{{ .Namespace }}/{{ .Name }}`. Only the two variables below
//! are defined; anything else is a configuration error surfaced at write
//! time.

use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("valid regex"));

/// Render a secret path template, substituting `{{ .Namespace }}` and
/// `{{ .Name }}`.
pub fn render(template: &str, namespace: &str, name: &str) -> Result<String> {
    for caps in VARIABLE.captures_iter(template) {
        let var = &caps[1];
        if var != "Namespace" && var != "Name" {
            bail!("unknown template variable: {var:?}");
        }
    }
    let rendered = VARIABLE.replace_all(template, |caps: &regex::Captures<'_>| {
        match &caps[1] {
            "Namespace" => namespace,
            _ => name,
        }
        .to_string()
    });
    Ok(rendered.into_owned())
}
