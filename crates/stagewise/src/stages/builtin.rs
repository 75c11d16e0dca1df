//! Stages shipped with stagewise

use anyhow::{Context, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::Value;

use super::{Stage, StageContext};
use crate::stage::StageOptions;

/// Identity; useful to make a rule match without transforming anything
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStage;

impl Stage for RawStage {
    fn name(&self) -> &str {
        "raw"
    }

    fn apply(
        &self,
        content: Vec<u8>,
        _options: &StageOptions,
        _cx: &StageContext<'_>,
    ) -> Result<Vec<u8>> {
        Ok(content)
    }
}

/// Line-level whitespace minifier
///
/// Trims every line and drops blank lines and whole-line `//` comments. Lines
/// inside a multi-line template literal are kept verbatim. Regex literals and
/// block comments are not understood; plug a real minifier in through a command
/// stage and `optimization.minimizer` when that matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinifyStage;

impl Stage for MinifyStage {
    fn name(&self) -> &str {
        "minify"
    }

    fn apply(
        &self,
        content: Vec<u8>,
        _options: &StageOptions,
        cx: &StageContext<'_>,
    ) -> Result<Vec<u8>> {
        let text = String::from_utf8(content)
            .with_context(|| format!("{} is not UTF-8 text", cx.path.display()))?;

        let mut out = String::with_capacity(text.len());
        let mut in_template = false;
        for line in text.lines() {
            if in_template {
                out.push_str(line);
                out.push('\n');
                in_template = ends_in_template(line, true);
                continue;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("//") {
                continue;
            }
            in_template = ends_in_template(trimmed, false);
            // Trailing whitespace of an opening line belongs to the literal
            out.push_str(if in_template { line.trim_start() } else { trimmed });
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

/// Whether a template literal is still open at the end of `line`
fn ends_in_template(line: &str, mut in_template: bool) -> bool {
    let mut quote = None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) if in_template || quote.is_some() => {
                chars.next();
            }
            ('`', None) => in_template = !in_template,
            _ if in_template => {}
            ('\'' | '"', None) => quote = Some(c),
            (c, Some(open)) if c == open => quote = None,
            ('/', None) if chars.as_str().starts_with('/') => break,
            _ => {}
        }
    }
    in_template
}

/// Encodes the content as a `data:` URL exported from a script module
///
/// Options: `mimetype` overrides the MIME type guessed from the extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataUrlStage;

impl Stage for DataUrlStage {
    fn name(&self) -> &str {
        "data-url"
    }

    fn apply(
        &self,
        content: Vec<u8>,
        options: &StageOptions,
        cx: &StageContext<'_>,
    ) -> Result<Vec<u8>> {
        let mimetype = match options.get("mimetype") {
            Some(Value::String(mimetype)) => mimetype.as_str(),
            Some(other) => anyhow::bail!("`mimetype` must be a string, got {other}"),
            None => guess_mimetype(cx.path.extension().and_then(|ext| ext.to_str())),
        };
        let url = format!("data:{mimetype};base64,{}", STANDARD.encode(&content));
        Ok(format!("module.exports = {};\n", Value::from(url)).into_bytes())
    }
}

fn guess_mimetype(extension: Option<&str>) -> &'static str {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("eot") => "application/vnd.ms-fontobject",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
