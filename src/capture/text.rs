//! Conversion of captured bytes into text.
//!
//! Carriage-return handling imitates how a terminal draws progress bars and
//! spinners: a `\r` that is not part of a `\r\n` line ending moves the cursor
//! back to the start of the line and whatever follows overwrites the line in
//! place. This is a lossy normalization, not terminal emulation: cursor
//! movement escape sequences, line wrapping and terminal width are ignored.

use encoding_rs::Encoding;

/// Decodes captured bytes with `encoding`.
///
/// Invalid sequences (for example a multi-byte character cut in half by a
/// partial read) are replaced with U+FFFD. A byte order mark is kept as
/// text, since it was part of what was written.
pub fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Emulates the effect of carriage returns on a terminal.
///
/// The text is split on `\n`; `\r` characters directly before a line break
/// are plain line endings, any other `\r` rewinds to column zero. Trailing
/// empty lines are removed.
pub fn interpret_carriage_returns(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| redraw_line(line.trim_end_matches('\r')))
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Splits text into lines without interpreting carriage returns.
///
/// Every line boundary ends a line: `\n`, `\r\n`, a lone `\r`, vertical
/// tab, form feed, the file/group/record separators, NEL and the Unicode
/// line and paragraph separators. A trailing boundary does not produce an
/// empty last line.
pub fn raw_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find(is_line_boundary) {
        lines.push(rest[..at].to_string());
        let boundary = &rest[at..];
        let width = if boundary.starts_with("\r\n") {
            2
        } else {
            boundary.chars().next().map_or(1, char::len_utf8)
        };
        rest = &rest[at + width..];
    }
    if !rest.is_empty() {
        lines.push(rest.to_string());
    }
    lines
}

fn is_line_boundary(ch: char) -> bool {
    matches!(
        ch,
        '\n' | '\r' | '\u{0b}' | '\u{0c}' | '\u{1c}'..='\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn redraw_line(line: &str) -> String {
    let mut cells: Vec<char> = Vec::with_capacity(line.len());
    let mut column = 0;
    for ch in line.chars() {
        if ch == '\r' {
            column = 0;
            continue;
        }
        if column < cells.len() {
            cells[column] = ch;
        } else {
            cells.push(ch);
        }
        column += 1;
    }
    cells.into_iter().collect()
}
