//! Classification of preprocessed lines.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Line {
    Blank,
    /// `#`×level, whitespace, name and optional `(args)`.
    Heading {
        level: usize,
        name: String,
        args: Vec<String>,
    },
    /// `#`×level followed by `^`.
    Pop { level: usize },
    /// `NAME(arg, ...)`.
    Command { name: String, args: Vec<String> },
    Text,
}

static COMMAND_HEAD: OnceLock<Regex> = OnceLock::new();

fn command_head() -> &'static Regex {
    COMMAND_HEAD.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)\s*\(").unwrap_or_else(|e| panic!("invalid command pattern: {e}"))
    })
}

/// Classify one line. `next` is the following line, used to recognize
/// underlined headings; the caller skips it when the result says so.
pub(crate) fn classify(line: &str, next: Option<&str>) -> Result<(Line, bool), String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok((Line::Blank, false));
    }
    if let Some(heading) = parse_hash_heading(trimmed)? {
        return Ok((heading, false));
    }
    if let Some(level) = next.and_then(underline_level) {
        let (name, args) = parse_name_args(trimmed)?;
        return Ok((Line::Heading { level, name, args }, true));
    }
    if let Some(command) = parse_command(trimmed)? {
        return Ok((command, false));
    }
    Ok((Line::Text, false))
}

/// Follows the active heading level across lines fed one at a time, the
/// way [`classify`] reads them. Malformed lines count as text.
#[derive(Debug, Default, Clone)]
pub(crate) struct LevelTracker {
    level: usize,
    /// The previous line could be underlined into a heading.
    underlinable: bool,
}

impl LevelTracker {
    pub(crate) fn level(&self) -> usize {
        self.level
    }

    pub(crate) fn observe(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.underlinable = false;
            return;
        }
        match parse_hash_heading(trimmed) {
            Ok(Some(Line::Heading { level, .. })) => {
                self.level = level;
                self.underlinable = false;
            }
            Ok(Some(Line::Pop { level })) => {
                self.level = self.level.min(level.saturating_sub(1));
                self.underlinable = false;
            }
            _ => match underline_level(trimmed) {
                Some(level) if self.underlinable => {
                    self.level = level;
                    self.underlinable = false;
                }
                _ => self.underlinable = true,
            },
        }
    }
}

fn parse_hash_heading(trimmed: &str) -> Result<Option<Line>, String> {
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return Ok(None);
    }
    let rest = &trimmed[level..];
    if let Some(after) = rest.strip_prefix('^') {
        if !after.trim().is_empty() {
            return Err("unexpected text after heading pop marker".to_string());
        }
        return Ok(Some(Line::Pop { level }));
    }
    if rest.is_empty() {
        return Err("unnamed heading".to_string());
    }
    // `#version` and friends are text, a heading needs a blank after the marks
    if !rest.starts_with(char::is_whitespace) {
        return Ok(None);
    }
    let (name, args) = parse_name_args(rest.trim())?;
    Ok(Some(Line::Heading { level, name, args }))
}

/// Level of an underline: 0 for `===`, 1 for `---`.
fn underline_level(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    let first = trimmed.chars().next()?;
    if !trimmed.chars().all(|c| c == first) {
        return None;
    }
    match first {
        '=' => Some(0),
        '-' => Some(1),
        _ => None,
    }
}

/// Split `Name(arg arg)` into the name and whitespace-separated arguments.
fn parse_name_args(text: &str) -> Result<(String, Vec<String>), String> {
    let (name, args) = match text.find('(') {
        None => (text.trim(), Vec::new()),
        Some(open) => {
            let name = text[..open].trim();
            let close = matching_paren(text, open)
                .ok_or_else(|| format!("unclosed argument list for heading '{name}'"))?;
            if !text[close + 1..].trim().is_empty() {
                return Err(format!("unexpected text after arguments of heading '{name}'"));
            }
            (name, split_words(&text[open + 1..close]))
        }
    };
    if name.is_empty() {
        return Err("unnamed heading".to_string());
    }
    Ok((name.to_string(), args))
}

fn parse_command(trimmed: &str) -> Result<Option<Line>, String> {
    let Some(captures) = command_head().captures(trimmed) else {
        return Ok(None);
    };
    let name = captures[1].to_string();
    let open = captures[0].len() - 1;
    let close = matching_paren(trimmed, open)
        .ok_or_else(|| format!("unclosed argument list for command '{name}'"))?;
    if !trimmed[close + 1..].trim().is_empty() {
        // e.g. `a(b) + c(d)`: not a command call
        return Ok(None);
    }
    let args = split_args(&trimmed[open + 1..close]);
    Ok(Some(Line::Command { name, args }))
}

/// Byte offset of the `)` closing the `(` at `open`. Quoted spans and
/// nested parentheses are skipped.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    for (offset, c) in text[open..].char_indices() {
        if in_quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quote = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Comma-separated command arguments, trimmed and unquoted.
pub(crate) fn split_args(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_outside_quotes(text, |c, depth| c == ',' && depth == 0)
        .into_iter()
        .map(|arg| unquote(arg.trim()))
        .collect()
}

/// Whitespace-separated heading arguments, quotes grouped.
fn split_words(text: &str) -> Vec<String> {
    split_outside_quotes(text, |c, _| c.is_whitespace())
        .into_iter()
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(unquote)
        .collect()
}

fn split_outside_quotes(text: &str, is_separator: impl Fn(char, usize) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut in_quote = false;
    let mut escaped = false;
    for (offset, c) in text.char_indices() {
        if in_quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_quote = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_quote = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if is_separator(c, depth) => {
                parts.push(&text[start..offset]);
                start = offset + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Strip surrounding quotes and resolve escapes; other text is returned as is.
fn unquote(text: &str) -> String {
    let inner = match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) if text.len() >= 2 => inner,
        _ => return text.to_string(),
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
