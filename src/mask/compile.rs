//! The mask mini-language compiler.
//!
//! Source form is `<delim>body<delim><flags>` with the delimiter drawn
//! from `/`, `"`, `'`, `%`. Slash bodies are regexes, quote bodies are
//! literals, percent bodies are shell-style globs. The compiled output is
//! one regex over the enriched reference: a deterministic header prefix
//! asserting the flag requirements, then the body searched against the
//! hostmask line.

use regex::Regex;
use thiserror::Error;

/// Delimiters the mask language accepts.
pub const DELIMITERS: [char; 4] = ['/', '"', '\'', '%'];

/// Mask source errors.
#[derive(Debug, Error)]
pub enum MaskError {
    #[error("empty mask provided")]
    Empty,
    #[error("no pattern delimiter found")]
    NoDelimiter,
    #[error("unterminated mask")]
    Unterminated,
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// A mask compiled into a matchable predicate.
#[derive(Debug, Clone)]
pub struct CompiledMask {
    regex: Regex,
}

impl CompiledMask {
    /// Test one enriched reference.
    pub fn matches(&self, reference: &str) -> bool {
        self.regex.is_match(reference)
    }

    /// Test a whole observation: any of its references matching counts.
    pub fn matches_any<S: AsRef<str>>(&self, references: &[S]) -> bool {
        references.iter().any(|r| self.matches(r.as_ref()))
    }

    /// The generated regex source, for diagnostics.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Split a mask literal off the front of an argument string.
///
/// The literal runs from the opening delimiter through its flags, ending
/// at the first space after the closing delimiter. Returns the literal
/// and the remaining arguments.
pub fn mask_token(input: &str) -> Result<(&str, &str), MaskError> {
    let input = input.trim_start();
    let delim = input.chars().next().ok_or(MaskError::Empty)?;
    if !DELIMITERS.contains(&delim) {
        return Err(MaskError::NoDelimiter);
    }
    let close = find_unescaped(input, delim).ok_or(MaskError::Unterminated)?;
    let end = input[close..]
        .find(' ')
        .map(|offset| close + offset)
        .unwrap_or(input.len());
    let rest = input[end..].trim_start();
    Ok((&input[..end], rest))
}

/// Compile a mask source string into a predicate.
pub fn mask_compile(raw: &str) -> Result<CompiledMask, MaskError> {
    let delim = raw.chars().next().ok_or(MaskError::Empty)?;
    if !DELIMITERS.contains(&delim) {
        return Err(MaskError::NoDelimiter);
    }
    let close = find_unescaped(raw, delim).ok_or(MaskError::Unterminated)?;
    let body = &raw[delim.len_utf8()..close];
    let flags = &raw[close + delim.len_utf8()..];
    if body.is_empty() {
        return Err(MaskError::Empty);
    }

    let body = match delim {
        '/' => body.to_string(),
        '%' => anchored(glob_to_regex(&unescape(body, delim)), flags),
        _ => anchored(regex::escape(&unescape(body, delim)), flags),
    };

    // Header assertions: a literal character where a flag demands a value,
    // a wildcard where the mask doesn't care. Case-insensitivity is scoped
    // to the body so `i` can never weaken a header assertion.
    let account = flag_char(flags, 'a', 'A');
    let secure = flag_char(flags, 'z', 'Z');
    let event = if flags.contains('N') { '.' } else { 'n' };
    let body = if flags.contains('i') {
        format!("(?i:{body})")
    } else {
        format!("(?:{body})")
    };

    let pattern = format!("(?m)\\A{account}{secure}{event}\n.*{body}");
    Ok(CompiledMask {
        regex: Regex::new(&pattern)?,
    })
}

fn flag_char(flags: &str, lower: char, upper: char) -> char {
    if flags.contains(lower) {
        lower
    } else if flags.contains(upper) {
        upper
    } else {
        '.'
    }
}

/// Anchor a literal or glob body per the `^` / `$` flags.
fn anchored(mut body: String, flags: &str) -> String {
    if flags.contains('^') {
        body.insert(0, '^');
    }
    if flags.contains('$') {
        body.push('$');
    }
    body
}

/// Byte index of the first unescaped occurrence of `delim` past the
/// opening delimiter.
fn find_unescaped(s: &str, delim: char) -> Option<usize> {
    let mut indices = s.char_indices();
    indices.next();
    while let Some((i, c)) = indices.next() {
        if c == '\\' {
            indices.next();
        } else if c == delim {
            return Some(i);
        }
    }
    None
}

/// Drop the backslash from escaped delimiters; leave other escapes alone.
fn unescape(input: &str, delim: char) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == delim => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Translate a shell-style glob into regex source.
///
/// `*` and `?` become their regex equivalents, `[...]` classes pass
/// through with `!` negation rewritten, everything else is escaped. An
/// unclosed `[` is a literal bracket.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    let mut rest = glob;
    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(rest) {
                Some(end) => {
                    let inner = &rest[..end];
                    rest = &rest[end + 1..];
                    out.push('[');
                    let inner = match inner.strip_prefix('!') {
                        Some(stripped) => {
                            out.push('^');
                            stripped
                        }
                        None => inner,
                    };
                    for member in inner.chars() {
                        if member == '\\' || member == ']' {
                            out.push('\\');
                        }
                        out.push(member);
                    }
                    out.push(']');
                }
                None => out.push_str("\\["),
            },
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// Byte offset of the class-closing bracket, honoring a literal `]` in
/// leading position.
fn class_end(rest: &str) -> Option<usize> {
    let skip = if rest.starts_with("!]") {
        2
    } else if rest.starts_with(']') {
        1
    } else {
        0
    };
    rest[skip..].find(']').map(|i| skip + i)
}
