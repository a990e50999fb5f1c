//! Raw option data of a configuration profile
//!
//! An ordered multi-map of OpenVPN directives parsed from the imported
//! configuration text. Directives keep their import order and may repeat
//! (several `remote` lines, for instance). Inline blocks such as
//! `<ca> ... </ca>` are folded into a single directive whose only value
//! is the block body.

use crate::error::{ConfigMgrError, Result};
use serde::{Deserialize, Serialize};

/// Upper bounds applied while parsing configuration text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Maximum size of the complete profile (bytes)
    pub max_profile_size: usize,
    /// Maximum length of a single line outside inline blocks (bytes)
    pub max_line_size: usize,
    /// Maximum length of a directive name (bytes)
    pub max_directive_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_profile_size: 256 * 1024,
            max_line_size: 512,
            max_directive_size: 128,
        }
    }
}

/// A single configuration directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Directive {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self { name: name.into(), args }
    }

    /// First argument, if any
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }

    fn is_inline_block(&self) -> bool {
        self.args.len() == 1 && self.args[0].contains('\n')
    }
}

/// Ordered list of parsed directives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionList {
    directives: Vec<Directive>,
}

impl OptionList {
    /// Parse configuration text
    pub fn parse(text: &str, limits: &ParseLimits) -> Result<Self> {
        if text.len() > limits.max_profile_size {
            return Err(ConfigMgrError::Validation("profile is too large".into()));
        }

        let content = filter_ctrl_chars(text, false);
        let mut directives = Vec::new();
        let mut block: Option<(String, String)> = None;

        for (lineno, line) in content.lines().enumerate() {
            if let Some((name, mut body)) = block.take() {
                if line.trim() == format!("</{}>", name) {
                    directives.push(Directive::new(name, vec![body]));
                } else {
                    body.push_str(line);
                    body.push('\n');
                    block = Some((name, body));
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if line.len() > limits.max_line_size {
                return Err(ConfigMgrError::Validation(format!(
                    "line {} is too long",
                    lineno + 1
                )));
            }

            if trimmed.starts_with("</") {
                return Err(ConfigMgrError::Validation(format!(
                    "unexpected closing tag on line {}: {}",
                    lineno + 1,
                    trimmed
                )));
            }
            if trimmed.starts_with('<') && trimmed.ends_with('>') {
                let name = trimmed[1..trimmed.len() - 1].trim().to_string();
                check_directive_name(&name, limits)?;
                block = Some((name, String::new()));
                continue;
            }

            let mut tokens = tokenize(trimmed)
                .map_err(|e| ConfigMgrError::Validation(format!("line {}: {}", lineno + 1, e)))?;
            if tokens.is_empty() {
                continue;
            }
            let name = tokens.remove(0);
            let name = name.strip_prefix("--").unwrap_or(&name).to_string();
            check_directive_name(&name, limits)?;
            directives.push(Directive::new(name, tokens));
        }

        if let Some((name, _)) = block {
            return Err(ConfigMgrError::Validation(format!(
                "unterminated inline block <{}>",
                name
            )));
        }

        Ok(Self { directives })
    }

    /// Number of directives
    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// Iterate in import order
    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter()
    }

    /// First directive with the given name
    pub fn get(&self, name: &str) -> Option<&Directive> {
        self.directives.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Render as OpenVPN configuration text
    pub fn string_export(&self) -> String {
        let mut out = String::new();
        for d in &self.directives {
            if d.is_inline_block() {
                out.push_str(&format!("<{}>\n", d.name));
                out.push_str(&d.args[0]);
                if !d.args[0].ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&format!("</{}>\n", d.name));
                continue;
            }

            out.push_str(&d.name);
            for arg in &d.args {
                out.push(' ');
                out.push_str(&quote_arg(arg));
            }
            out.push('\n');
        }
        out
    }

    /// Structured form used by `FetchJSON` and the disk record
    pub fn json_export(&self) -> serde_json::Value {
        serde_json::to_value(&self.directives).unwrap_or_default()
    }

    /// Rebuild from the structured form
    pub fn json_import(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let directives: Vec<Directive> = serde_json::from_value(value.clone())?;
        Ok(Self { directives })
    }
}

fn check_directive_name(name: &str, limits: &ParseLimits) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigMgrError::Validation("empty directive name".into()));
    }
    if name.len() > limits.max_directive_size {
        return Err(ConfigMgrError::Validation(format!(
            "directive name too long: {}...",
            name.chars().take(16).collect::<String>()
        )));
    }
    Ok(())
}

/// Split a line into whitespace separated tokens
///
/// Double quotes group words and honour backslash escapes, single quotes
/// group words literally.
fn tokenize(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc) => current.push(esc),
                            None => return Err("dangling escape".into()),
                        },
                        Some(other) => current.push(other),
                        None => return Err("unterminated double quote".into()),
                    }
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => return Err("unterminated single quote".into()),
                    }
                }
            }
            '\\' => {
                in_token = true;
                match chars.next() {
                    Some(esc) => current.push(esc),
                    None => return Err("dangling escape".into()),
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

fn quote_arg(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\' || c == '#' || c == ';');
    if !needs_quotes {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Remove control characters from user supplied text
///
/// `single_line` also drops newlines and tabs.
pub fn filter_ctrl_chars(input: &str, single_line: bool) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || (!single_line && (c == '\n' || c == '\t')))
        .collect()
}
