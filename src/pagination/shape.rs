//! Top-level clause scan of a compiled statement.
//!
//! Only keywords outside parentheses, string literals, quoted identifiers and
//! comments count, so subqueries and CTE bodies are ignored.

/// What the outermost query of a statement already contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Shape {
    /// Byte offset of the top-level `WHERE`.
    pub where_at: Option<usize>,
    /// `GROUP BY`, `HAVING`, `WINDOW` or `QUALIFY`.
    pub grouped: bool,
    /// `UNION`, `INTERSECT`, `EXCEPT` or `MINUS`.
    pub compound: bool,
    /// `ORDER BY`, `LIMIT`, `OFFSET`, `FETCH` or `FOR UPDATE`.
    pub tail: bool,
    /// The text ends inside a `--` comment.
    pub open_comment: bool,
}

impl Shape {
    pub fn scan(sql: &str) -> Self {
        let bytes = sql.as_bytes();
        let mut shape = Shape::default();
        let mut depth = 0usize;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                b'\'' | b'"' | b'`' => i = skip_quoted(bytes, i, bytes[i]),
                b'[' => i = skip_quoted(bytes, i, b']'),
                b'-' if bytes.get(i + 1) == Some(&b'-') => match sql[i..].find('\n') {
                    Some(end) => i += end + 1,
                    None => {
                        shape.open_comment = true;
                        i = bytes.len();
                    }
                },
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i = match sql[i + 2..].find("*/") {
                        Some(end) => i + 2 + end + 2,
                        None => bytes.len(),
                    };
                }
                b'(' => {
                    depth += 1;
                    i += 1;
                }
                b')' => {
                    depth = depth.saturating_sub(1);
                    i += 1;
                }
                c if is_word(c) => {
                    let start = i;
                    while i < bytes.len() && is_word(bytes[i]) {
                        i += 1;
                    }
                    let preceded = start > 0 && matches!(bytes[start - 1], b'.' | b'$' | b':' | b'@');
                    if depth == 0 && !preceded {
                        shape.keyword(&sql[start..i], start);
                    }
                }
                _ => i += 1,
            }
        }

        shape
    }

    fn keyword(&mut self, word: &str, at: usize) {
        match word.to_ascii_uppercase().as_str() {
            "WHERE" if self.where_at.is_none() => self.where_at = Some(at),
            "GROUP" | "HAVING" | "WINDOW" | "QUALIFY" => self.grouped = true,
            "UNION" | "INTERSECT" | "EXCEPT" | "MINUS" => self.compound = true,
            "ORDER" | "LIMIT" | "OFFSET" | "FETCH" | "FOR" => self.tail = true,
            _ => {}
        }
    }

    /// `ORDER BY` and a row limit can be appended as they are.
    pub fn accepts_tail(&self) -> bool {
        !self.tail && !self.compound
    }

    /// A row filter can also be spliced into the `WHERE` clause.
    pub fn accepts_filter(&self) -> bool {
        self.accepts_tail() && !self.grouped
    }
}

fn is_word(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Index just past the literal opened at `start`. A doubled closing quote is
/// an escape.
fn skip_quoted(bytes: &[u8], start: usize, close: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}
