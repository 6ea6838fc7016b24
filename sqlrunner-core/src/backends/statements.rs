//! Statement splitting for backends that execute one statement at a time.

const DEFAULT_DELIMITER: &str = ";";

/// Drops lines that are entirely `--` comments.
pub fn strip_comment_lines(script: &str) -> String {
    script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits a script into statements.
///
/// Honours client-side `DELIMITER xx` directives (the directive lines are
/// removed), ignores delimiters inside quoted strings and skips empty
/// statements. Comment-only lines are stripped first.
pub fn split_statements(script: &str) -> Vec<String> {
    let cleaned = strip_comment_lines(script);
    let mut statements = Vec::new();
    let mut delimiter = DEFAULT_DELIMITER.to_string();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for line in cleaned.lines() {
        if quote.is_none() {
            if let Some(new_delimiter) = delimiter_directive(line) {
                push_statement(&mut statements, &mut current);
                delimiter = new_delimiter;
                continue;
            }
        }

        let mut i = 0;
        while i < line.len() {
            let rest = &line[i..];
            let Some(c) = rest.chars().next() else {
                break;
            };

            match quote {
                Some(q) => {
                    current.push(c);
                    if c == '\\' {
                        if let Some(next) = rest[1..].chars().next() {
                            current.push(next);
                            i += 1 + next.len_utf8();
                            continue;
                        }
                    } else if c == q {
                        quote = None;
                    }
                }
                None => {
                    if rest.starts_with(delimiter.as_str()) {
                        push_statement(&mut statements, &mut current);
                        i += delimiter.len();
                        continue;
                    }
                    if c == '\'' || c == '"' || c == '`' {
                        quote = Some(c);
                    }
                    current.push(c);
                }
            }
            i += c.len_utf8();
        }
        current.push('\n');
    }

    push_statement(&mut statements, &mut current);
    statements
}

fn delimiter_directive(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let keyword = trimmed.get(..9)?;
    if !keyword.eq_ignore_ascii_case("delimiter") {
        return None;
    }
    let rest = &trimmed[9..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let value = rest.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// True when the statement's first keyword is `SELECT`.
pub fn is_select(statement: &str) -> bool {
    statement
        .split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('(').eq_ignore_ascii_case("select"))
        .unwrap_or(false)
}
