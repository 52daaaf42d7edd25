//! Line scanner: comment stripping and directive tokenizing.
//!
//! State carries across physical lines: a `/* */` comment, a directive that
//! has not reached its `]`, or a quoted directive token may all span lines.

/// Directive whose closing `]` has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Directive {
    /// Line the opening `[` was on.
    pub start_line: usize,
    /// Indent level of that line.
    pub indent: usize,
    /// Name followed by arguments.
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scanned {
    /// An ordinary line with comments removed.
    Text(String),
    /// The line belongs to a directive that is still open.
    Continued,
    Directive(Directive),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanError {
    pub line: usize,
    pub message: String,
}

impl ScanError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    start_line: usize,
    indent: usize,
    tokens: Vec<String>,
    current: Option<String>,
    in_quote: bool,
}

impl Pending {
    fn finish_token(&mut self) {
        if let Some(token) = self.current.take() {
            self.tokens.push(token);
        }
    }
}

#[derive(Debug)]
pub(crate) struct Scanner {
    tab_width: usize,
    /// Line a still open block comment started on.
    comment_from: Option<usize>,
    pending: Option<Pending>,
}

impl Scanner {
    pub fn new(tab_width: usize) -> Self {
        Self {
            tab_width: tab_width.max(1),
            comment_from: None,
            pending: None,
        }
    }

    pub fn scan_line(&mut self, line: &str, number: usize) -> Result<Scanned, ScanError> {
        if let Some(pending) = self.pending.take() {
            return self.scan_directive(pending, line, number);
        }
        if self.comment_from.is_none() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix('[') {
                let pending = Pending {
                    start_line: number,
                    indent: indent_level(line, self.tab_width),
                    ..Default::default()
                };
                return self.scan_directive(pending, rest, number);
            }
        }
        Ok(Scanned::Text(self.strip_comments(line, number)))
    }

    /// Check nothing is left open at end of input.
    pub fn finish(&self) -> Result<(), ScanError> {
        if let Some(pending) = &self.pending {
            let message = if pending.in_quote {
                "unterminated quoted string in directive"
            } else {
                "unterminated directive: missing ']'"
            };
            return Err(ScanError::new(pending.start_line, message));
        }
        if let Some(line) = self.comment_from {
            return Err(ScanError::new(line, "unterminated block comment"));
        }
        Ok(())
    }

    /// Copy `text` minus comments; string literals are left untouched.
    fn strip_comments(&mut self, text: &str, number: usize) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_string = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if self.comment_from.is_some() {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    self.comment_from = None;
                }
                continue;
            }
            if in_string {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }
            match (c, chars.peek()) {
                ('/', Some('/')) => break,
                ('/', Some('*')) => {
                    chars.next();
                    self.comment_from = Some(number);
                }
                ('"', _) => {
                    in_string = true;
                    out.push(c);
                }
                _ => out.push(c),
            }
        }
        out.truncate(out.trim_end().len());
        out
    }

    fn scan_directive(&mut self, mut pending: Pending, text: &str, number: usize) -> Result<Scanned, ScanError> {
        let mut chars = text.char_indices().peekable();
        while let Some((offset, c)) = chars.next() {
            if self.comment_from.is_some() {
                if c == '*' && chars.peek().map(|(_, n)| *n) == Some('/') {
                    chars.next();
                    self.comment_from = None;
                }
                continue;
            }
            if pending.in_quote {
                let token = pending.current.get_or_insert_with(String::new);
                match c {
                    '\\' => match chars.next().map(|(_, n)| n) {
                        Some('n') => token.push('\n'),
                        Some('t') => token.push('\t'),
                        Some('"') => token.push('"'),
                        Some('\\') => token.push('\\'),
                        Some(other) => {
                            token.push('\\');
                            token.push(other);
                        }
                        None => token.push('\\'),
                    },
                    '"' => {
                        pending.in_quote = false;
                        pending.finish_token();
                    }
                    c => token.push(c),
                }
                continue;
            }
            match (c, chars.peek().map(|(_, n)| *n)) {
                ('/', Some('/')) => break,
                ('/', Some('*')) => {
                    chars.next();
                    self.comment_from = Some(number);
                }
                ('"', _) => {
                    pending.finish_token();
                    pending.in_quote = true;
                    pending.current = Some(String::new());
                }
                (']', _) => {
                    pending.finish_token();
                    let rest = &text[offset + c.len_utf8()..];
                    if !self.strip_comments(rest, number).trim().is_empty() {
                        return Err(ScanError::new(number, "unexpected text after directive"));
                    }
                    if pending.tokens.is_empty() {
                        return Err(ScanError::new(pending.start_line, "empty directive"));
                    }
                    return Ok(Scanned::Directive(Directive {
                        start_line: pending.start_line,
                        indent: pending.indent,
                        tokens: pending.tokens,
                    }));
                }
                (c, _) if c.is_whitespace() => pending.finish_token(),
                (c, _) => pending.current.get_or_insert_with(String::new).push(c),
            }
        }

        // quoted tokens keep their line breaks; bare tokens end at the line
        if pending.in_quote {
            pending.current.get_or_insert_with(String::new).push('\n');
        } else {
            pending.finish_token();
        }
        self.pending = Some(pending);
        Ok(Scanned::Continued)
    }
}

/// Indent level of a line: literal tabs count one level each, runs of
/// spaces count one level per `tab_width`.
pub(crate) fn indent_level(line: &str, tab_width: usize) -> usize {
    let mut tabs = 0;
    let mut spaces = 0;
    for c in line.chars() {
        match c {
            '\t' => tabs += 1,
            ' ' => spaces += 1,
            _ => break,
        }
    }
    tabs + spaces / tab_width.max(1)
}
