//! Extended-INSERT value scanner
//!
//! One left-to-right pass over each `INSERT INTO ... VALUES ...;` line,
//! tokenizing quoted strings (with backslash escapes), `NULL`, signed
//! numbers including scientific notation, and `_binary 'x'` literals.
//! Tokens are grouped into rows by the declared column count; rows with the
//! wrong arity are dropped and counted, with only the first few logged.

use tracing::warn;

/// Rows with the wrong column count logged before going quiet
const MAX_BAD_ROW_LOGS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    /// Before the first `(` of a row
    RowStart,
    /// At the start of a value
    ValueStart,
    /// Inside a quoted string
    Str,
    /// Inside an unquoted token (numbers, stray keywords)
    Bare,
    /// Matching the `NULL` keyword
    NullKw,
    /// Matching the `_binary '` prefix
    BinaryPrefix,
    /// Collecting the `_binary` payload up to its closing quote
    BinaryValue,
    /// After a complete value, expecting `,` or `)`
    AfterValue,
    /// After a complete row, expecting `,` or `;`
    AfterRow,
}

const BINARY_PREFIX: &str = "_binary '";
const NULL_KW: &str = "NULL";

/// Scanner for one table's INSERT statements. Carries the bad-row counter
/// across lines; the per-statement parse state is reset for each line.
pub struct RowScanner {
    table: String,
    num_cols: usize,
    pub bad_row_count: u64,
}

impl RowScanner {
    pub fn new(table: impl Into<String>, num_cols: usize) -> Self {
        Self {
            table: table.into(),
            num_cols,
            bad_row_count: 0,
        }
    }

    /// Parse one dump line, emitting each complete row. Lines without an
    /// `INSERT INTO ... VALUES` statement are ignored.
    pub fn scan_line(&mut self, line: &str, emit: &mut dyn FnMut(Vec<Option<String>>)) {
        if !line.starts_with("INSERT INTO") {
            return;
        }
        let Some(values_at) = line.find("VALUES ") else {
            return;
        };
        let data = &line[values_at + "VALUES ".len()..];

        let mut state = State::RowStart;
        let mut current_value = String::new();
        let mut current_row: Vec<Option<String>> = Vec::with_capacity(self.num_cols);
        let mut escape_next = false;
        let mut keyword_pos = 0usize;

        let mut chars = data.chars();
        while let Some(c) = chars.next() {
            match state {
                State::RowStart => match c {
                    '(' => {
                        current_row.clear();
                        state = State::ValueStart;
                    }
                    c if c.is_whitespace() => {}
                    _ => return, // malformed remainder; drop the rest of the line
                },

                State::ValueStart => match c {
                    '\'' => {
                        current_value.clear();
                        escape_next = false;
                        state = State::Str;
                    }
                    'N' => {
                        keyword_pos = 1;
                        state = State::NullKw;
                    }
                    '_' => {
                        keyword_pos = 1;
                        state = State::BinaryPrefix;
                    }
                    ')' => {
                        // Empty row; treat as complete
                        self.finish_row(&mut current_row, emit);
                        state = State::AfterRow;
                    }
                    c if c.is_whitespace() => {}
                    c => {
                        current_value.clear();
                        current_value.push(c);
                        state = State::Bare;
                    }
                },

                State::Str => {
                    if escape_next {
                        escape_next = false;
                        current_value.push(match c {
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            '0' => '\0',
                            other => other, // covers \' \\ and anything else
                        });
                    } else if c == '\\' {
                        escape_next = true;
                    } else if c == '\'' {
                        current_row.push(Some(std::mem::take(&mut current_value)));
                        state = State::AfterValue;
                    } else {
                        current_value.push(c);
                    }
                }

                State::Bare => match c {
                    ',' => {
                        current_row.push(Some(std::mem::take(&mut current_value)));
                        state = State::ValueStart;
                    }
                    ')' => {
                        current_row.push(Some(std::mem::take(&mut current_value)));
                        self.finish_row(&mut current_row, emit);
                        state = State::AfterRow;
                    }
                    c => current_value.push(c),
                },

                State::NullKw => {
                    let expected = NULL_KW.as_bytes();
                    if keyword_pos < expected.len() && c == expected[keyword_pos] as char {
                        keyword_pos += 1;
                        if keyword_pos == expected.len() {
                            current_row.push(None);
                            state = State::AfterValue;
                        }
                    } else {
                        // Not NULL after all; keep what matched as a bare token
                        current_value.clear();
                        current_value.push_str(&NULL_KW[..keyword_pos]);
                        state = State::Bare;
                        match c {
                            ',' => {
                                current_row.push(Some(std::mem::take(&mut current_value)));
                                state = State::ValueStart;
                            }
                            ')' => {
                                current_row.push(Some(std::mem::take(&mut current_value)));
                                self.finish_row(&mut current_row, emit);
                                state = State::AfterRow;
                            }
                            c => current_value.push(c),
                        }
                    }
                }

                State::BinaryPrefix => {
                    let expected = BINARY_PREFIX.as_bytes();
                    if keyword_pos < expected.len() && c == expected[keyword_pos] as char {
                        keyword_pos += 1;
                        if keyword_pos == expected.len() {
                            current_value.clear();
                            state = State::BinaryValue;
                        }
                    } else {
                        current_value.clear();
                        current_value.push_str(&BINARY_PREFIX[..keyword_pos]);
                        state = State::Bare;
                        match c {
                            ',' => {
                                current_row.push(Some(std::mem::take(&mut current_value)));
                                state = State::ValueStart;
                            }
                            ')' => {
                                current_row.push(Some(std::mem::take(&mut current_value)));
                                self.finish_row(&mut current_row, emit);
                                state = State::AfterRow;
                            }
                            c => current_value.push(c),
                        }
                    }
                }

                State::BinaryValue => {
                    if c == '\'' {
                        current_row.push(Some(std::mem::take(&mut current_value)));
                        state = State::AfterValue;
                    } else {
                        current_value.push(c);
                    }
                }

                State::AfterValue => match c {
                    ',' => state = State::ValueStart,
                    ')' => {
                        self.finish_row(&mut current_row, emit);
                        state = State::AfterRow;
                    }
                    _ => {} // whitespace
                },

                State::AfterRow => match c {
                    ',' => state = State::RowStart,
                    ';' => return,
                    _ => {} // whitespace / newline
                },
            }
        }

        // Trailing partial group at end of line
        if !current_row.is_empty() {
            self.bad_row_count += 1;
            if self.bad_row_count <= MAX_BAD_ROW_LOGS {
                warn!(
                    table = %self.table,
                    cols = current_row.len(),
                    expected = self.num_cols,
                    "Skipping trailing partial row"
                );
            }
        }
    }

    fn finish_row(
        &mut self,
        current_row: &mut Vec<Option<String>>,
        emit: &mut dyn FnMut(Vec<Option<String>>),
    ) {
        if current_row.len() == self.num_cols {
            emit(std::mem::take(current_row));
        } else {
            self.bad_row_count += 1;
            if self.bad_row_count <= MAX_BAD_ROW_LOGS {
                warn!(
                    table = %self.table,
                    cols = current_row.len(),
                    expected = self.num_cols,
                    "Skipping row with wrong column count"
                );
            }
            current_row.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(num_cols: usize, line: &str) -> (Vec<Vec<Option<String>>>, u64) {
        let mut scanner = RowScanner::new("t", num_cols);
        let mut rows = Vec::new();
        scanner.scan_line(line, &mut |row| rows.push(row));
        (rows, scanner.bad_row_count)
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn test_simple_rows() {
        let (rows, bad) = scan(2, "INSERT INTO `t` VALUES (1,'a'),(2,'b');");
        assert_eq!(rows, vec![vec![s("1"), s("a")], vec![s("2"), s("b")]]);
        assert_eq!(bad, 0);
    }

    #[test]
    fn test_mixed_literals_single_row() {
        let (rows, bad) = scan(
            5,
            r"INSERT INTO `t` VALUES (1, 'he said \'hi\'', NULL, _binary '1', -3.14e-2);",
        );
        assert_eq!(bad, 0);
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0],
            vec![s("1"), s("he said 'hi'"), None, s("1"), s("-3.14e-2")]
        );
    }

    #[test]
    fn test_embedded_commas_and_parens() {
        let (rows, _) = scan(2, "INSERT INTO `t` VALUES (1,'a,b (c) d');");
        assert_eq!(rows[0], vec![s("1"), s("a,b (c) d")]);
    }

    #[test]
    fn test_escape_sequences() {
        let (rows, _) = scan(1, r"INSERT INTO `t` VALUES ('line\nbreak\ttab\\slash\0nul');");
        assert_eq!(rows[0], vec![s("line\nbreak\ttab\\slash\0nul")]);
    }

    #[test]
    fn test_binary_zero_and_one() {
        let (rows, _) = scan(2, "INSERT INTO `t` VALUES (_binary '0',_binary '1');");
        assert_eq!(rows[0], vec![s("0"), s("1")]);
    }

    #[test]
    fn test_rows_across_two_statements() {
        let mut scanner = RowScanner::new("t", 4);
        let mut rows = Vec::new();
        scanner.scan_line(
            "INSERT INTO `t` VALUES (1,'a,b',NULL,_binary '0');",
            &mut |row| rows.push(row),
        );
        scanner.scan_line(
            r"INSERT INTO `t` VALUES (2,'c\'d',NULL,_binary '1');",
            &mut |row| rows.push(row),
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![s("1"), s("a,b"), None, s("0")]);
        assert_eq!(rows[1], vec![s("2"), s("c'd"), None, s("1")]);
        assert_eq!(scanner.bad_row_count, 0);
    }

    #[test]
    fn test_wrong_arity_dropped_and_counted() {
        let (rows, bad) = scan(3, "INSERT INTO `t` VALUES (1,'a'),(1,'b','c'),(2);");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], vec![s("1"), s("b"), s("c")]);
        assert_eq!(bad, 2);
    }

    #[test]
    fn test_non_insert_lines_ignored() {
        let (rows, bad) = scan(2, "-- comment line");
        assert!(rows.is_empty());
        assert_eq!(bad, 0);
    }

    #[test]
    fn test_negative_integers() {
        let (rows, _) = scan(2, "INSERT INTO `t` VALUES (-5,'x');");
        assert_eq!(rows[0], vec![s("-5"), s("x")]);
    }
}
