//! Command Parser - turns semi-structured generator output into typed
//! mutations.
//!
//! The generator replies in prose with at most one command block. The
//! block may arrive wrapped in code fences or HTML comments, and argument
//! values may embed braces, commas, and either quote style, so the
//! argument reader is a brace-balanced, string-aware scanner rather than
//! anything line- or regex-based. A malformed command is dropped alone;
//! the rest of the block still parses.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use chat_ledger::{CellValue, MutationCommand};

use crate::view::ViewSnapshot;

/// Opening marker of the command block in generator output.
pub const BLOCK_OPEN: &str = "<dbEdit>";
/// Closing marker of the command block.
pub const BLOCK_CLOSE: &str = "</dbEdit>";

/// Why a single command inside the block failed to parse.
#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("missing argument list")]
    MissingArguments,

    #[error("missing table index")]
    MissingTableIndex,

    #[error("missing view row index")]
    MissingRowIndex,

    #[error("missing object literal")]
    MissingLiteral,

    #[error("unterminated object literal")]
    UnterminatedLiteral,
}

/// The parsed contents of one generator reply.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub commands: Vec<MutationCommand>,

    /// Commands dropped for malformed arguments.
    pub skipped: u32,

    /// Whether a command block was present at all.
    pub block_found: bool,
}

impl ParseOutcome {
    /// Zero commands is legitimate: "no state change this turn".
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Insert,
    Update,
    Delete,
}

impl Verb {
    const TOKENS: [(Verb, &'static str); 3] = [
        (Verb::Insert, "insertRow"),
        (Verb::Update, "updateRow"),
        (Verb::Delete, "deleteRow"),
    ];

    fn token(self) -> &'static str {
        match self {
            Verb::Insert => "insertRow",
            Verb::Update => "updateRow",
            Verb::Delete => "deleteRow",
        }
    }
}

/// Parse one generator reply against the snapshot of the view it saw.
///
/// View row indices are resolved to permanent row ids immediately; a
/// reference outside the snapshot still emits the command with `row_id`
/// unset so the applier can reject it with a record.
pub fn parse_commands(raw: &str, snapshot: &ViewSnapshot) -> ParseOutcome {
    let Some(block) = extract_block(raw) else {
        return ParseOutcome::default();
    };
    let block = strip_wrapping(block);

    let mut outcome = ParseOutcome {
        block_found: true,
        ..ParseOutcome::default()
    };

    let mut cursor = 0;
    while let Some((verb, at)) = next_verb(&block, cursor) {
        let args_from = at + verb.token().len();
        match parse_one(verb, &block[args_from..], snapshot) {
            Ok((command, consumed)) => {
                outcome.commands.push(command);
                cursor = args_from + consumed;
            }
            Err(error) => {
                warn!(verb = verb.token(), %error, "dropping malformed command");
                outcome.skipped += 1;
                cursor = args_from;
            }
        }
    }
    outcome
}

fn extract_block(raw: &str) -> Option<&str> {
    let start = raw.find(BLOCK_OPEN)? + BLOCK_OPEN.len();
    let end = raw[start..].find(BLOCK_CLOSE)? + start;
    Some(&raw[start..end])
}

/// Drop code-fence lines and neutralize HTML comment markers.
fn strip_wrapping(block: &str) -> String {
    let mut cleaned = String::with_capacity(block.len());
    for line in block.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned.replace("<!--", " ").replace("-->", " ")
}

fn next_verb(text: &str, from: usize) -> Option<(Verb, usize)> {
    Verb::TOKENS
        .iter()
        .filter_map(|(verb, token)| text[from..].find(token).map(|at| (*verb, from + at)))
        .min_by_key(|(_, at)| *at)
}

fn parse_one(
    verb: Verb,
    rest: &str,
    snapshot: &ViewSnapshot,
) -> Result<(MutationCommand, usize), CommandParseError> {
    let bytes = rest.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if pos >= bytes.len() || bytes[pos] != b'(' {
        return Err(CommandParseError::MissingArguments);
    }
    pos += 1;

    let (table_index, after_index) =
        read_integer(rest, pos, false).ok_or(CommandParseError::MissingTableIndex)?;
    pos = after_index;

    match verb {
        Verb::Insert => {
            let open = find_literal(rest, pos)?;
            let literal = balanced_literal(rest, open)?;
            let values = parse_literal(literal);
            Ok((
                MutationCommand::Insert {
                    table_index,
                    values,
                },
                open + literal.len(),
            ))
        }
        Verb::Update => {
            let (view_row_index, after_row) =
                read_integer(rest, pos, true).ok_or(CommandParseError::MissingRowIndex)?;
            let open = find_literal(rest, after_row)?;
            let literal = balanced_literal(rest, open)?;
            let values = parse_literal(literal);
            Ok((
                MutationCommand::Update {
                    table_index,
                    view_row_index,
                    row_id: snapshot.resolve(table_index, view_row_index),
                    values,
                },
                open + literal.len(),
            ))
        }
        Verb::Delete => {
            let (view_row_index, after_row) =
                read_integer(rest, pos, true).ok_or(CommandParseError::MissingRowIndex)?;
            Ok((
                MutationCommand::Delete {
                    table_index,
                    view_row_index,
                    row_id: snapshot.resolve(table_index, view_row_index),
                },
                after_row,
            ))
        }
    }
}

/// Read an unsigned integer, optionally preceded by a comma. Returns the
/// value and the byte offset just past its digits.
fn read_integer(text: &str, mut pos: usize, after_comma: bool) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    if after_comma {
        if pos < bytes.len() && bytes[pos] == b',' {
            pos += 1;
        } else {
            return None;
        }
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
    }
    let start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos == start {
        return None;
    }
    text[start..pos].parse::<usize>().ok().map(|value| (value, pos))
}

/// Locate the opening brace of the object literal, tolerating the comma
/// and whitespace between arguments.
fn find_literal(text: &str, from: usize) -> Result<usize, CommandParseError> {
    for (offset, ch) in text[from..].char_indices() {
        match ch {
            '{' => return Ok(from + offset),
            ' ' | '\t' | '\r' | '\n' | ',' => {}
            _ => return Err(CommandParseError::MissingLiteral),
        }
    }
    Err(CommandParseError::MissingLiteral)
}

/// Extract the brace-balanced object literal starting at `open` (the
/// index of a `{`). String contents are opaque: braces inside either
/// quote style do not count, and backslash escapes are honored.
fn balanced_literal(text: &str, open: usize) -> Result<&str, CommandParseError> {
    let mut depth = 0usize;
    let mut string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text[open..].char_indices() {
        if let Some(quote) = string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => string = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&text[open..open + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Err(CommandParseError::UnterminatedLiteral)
}

/// Parse the interior of an object literal into column values.
///
/// Keys are stringified column positions; anything else is dropped with a
/// warning rather than failing the command.
fn parse_literal(literal: &str) -> BTreeMap<usize, CellValue> {
    let interior = &literal[1..literal.len() - 1];
    let mut values = BTreeMap::new();

    for pair in split_top_level(interior) {
        let Some((key, value)) = split_key_value(pair) else {
            warn!(pair, "ignoring pair without a key");
            continue;
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
        let Ok(column) = key.parse::<usize>() else {
            warn!(key, "ignoring non-positional column key");
            continue;
        };
        values.insert(column, parse_value(value));
    }
    values
}

/// Split on commas at depth zero, outside strings.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if let Some(quote) = string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => string = Some(ch),
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Split a pair at the first colon outside strings.
fn split_key_value(pair: &str) -> Option<(&str, &str)> {
    let mut string: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in pair.char_indices() {
        if let Some(quote) = string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => string = Some(ch),
            ':' => return Some((&pair[..offset], &pair[offset + 1..])),
            _ => {}
        }
    }
    None
}

fn parse_value(raw: &str) -> CellValue {
    let raw = raw.trim();
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        let quoted = (bytes[0] == b'"' && bytes[raw.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[raw.len() - 1] == b'\'');
        if quoted {
            return CellValue::Text(unescape(&raw[1..raw.len() - 1]));
        }
    }
    match raw {
        "true" => return CellValue::Bool(true),
        "false" => return CellValue::Bool(false),
        "null" => return CellValue::blank(),
        _ => {}
    }
    if let Ok(value) = raw.parse::<i64>() {
        return CellValue::Int(value);
    }
    if let Ok(value) = raw.parse::<f64>() {
        return CellValue::Float(value);
    }
    CellValue::Text(raw.to_string())
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
