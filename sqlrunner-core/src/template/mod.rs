//! Template expansion for SQL scripts and playbooks.
//!
//! Supports the subset of Go's `text/template` action syntax that playbooks
//! rely on:
//!
//! - `{{.name}}` and nested lookups such as `{{.db.schema}}`
//! - helper calls with literal or variable arguments: `{{nowWithFormat "2006-01-02"}}`
//! - trim markers `{{- ... -}}` and comments `{{/* ... */}}`
//!
//! Missing variables render as `<no value>`. Control structures (`if`,
//! `range`, ...) and pipelines are rejected at parse time.

mod aws;
mod go_time;
mod helpers;

use std::sync::Arc;

use crate::error::{RunnerError, RunnerResult};
use crate::models::Variables;

pub use aws::{AwsCredentials, CredentialResolver};
pub use helpers::{DynTemplateHelper, HelperRegistry, TemplateHelper};

const NO_VALUE: &str = "<no value>";

const KEYWORDS: &[&str] = &[
    "if", "else", "end", "range", "with", "define", "template", "block", "break", "continue",
];

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Literal(String),
    Field(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Value(Arg),
    Call { function: String, args: Vec<Arg> },
}

/// A parsed template, ready to be rendered any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Expands templates against a variable map using an immutable helper set.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    helpers: Arc<HelperRegistry>,
}

impl TemplateEngine {
    pub fn new(helpers: Arc<HelperRegistry>) -> Self {
        Self { helpers }
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    pub fn parse(&self, name: &str, text: &str) -> RunnerResult<Template> {
        let nodes = Parser::new(name, &self.helpers).parse(text)?;
        Ok(Template {
            name: name.to_string(),
            nodes,
        })
    }

    pub async fn execute(&self, template: &Template, variables: &Variables) -> RunnerResult<String> {
        let mut out = String::new();
        for node in &template.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Value(arg) => out.push_str(&resolve_arg(arg, variables)),
                Node::Call { function, args } => {
                    let helper =
                        self.helpers
                            .get(function)
                            .ok_or_else(|| RunnerError::UnknownHelper {
                                name: template.name.clone(),
                                function: function.clone(),
                            })?;
                    let values: Vec<String> =
                        args.iter().map(|a| resolve_arg(a, variables)).collect();
                    let rendered = helper.call(&values).await.map_err(|e| match e {
                        RunnerError::HelperArguments { .. } => e,
                        other => RunnerError::HelperFailed {
                            function: function.clone(),
                            message: other.to_string(),
                        },
                    })?;
                    out.push_str(&rendered);
                }
            }
        }
        Ok(out)
    }

    /// Parses and executes in one go.
    pub async fn render(&self, name: &str, text: &str, variables: &Variables) -> RunnerResult<String> {
        let template = self.parse(name, text)?;
        self.execute(&template, variables).await
    }
}

fn resolve_arg(arg: &Arg, variables: &Variables) -> String {
    match arg {
        Arg::Literal(s) => s.clone(),
        Arg::Field(path) => lookup(path, variables),
    }
}

fn lookup(path: &[String], variables: &Variables) -> String {
    let Some((first, rest)) = path.split_first() else {
        let entries: Vec<String> = variables
            .iter()
            .map(|(k, v)| format!("{}:{}", k, format_value(v)))
            .collect();
        return format!("map[{}]", entries.join(" "));
    };

    let mut current = match variables.get(first) {
        Some(value) => value,
        None => return NO_VALUE.to_string(),
    };

    for key in rest {
        let next = match current {
            serde_yaml::Value::Mapping(map) => map.get(serde_yaml::Value::String(key.clone())),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return NO_VALUE.to_string(),
        }
    }

    format_value(current)
}

fn format_value(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => "<nil>".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(" "))
        }
        serde_yaml::Value::Mapping(map) => {
            let mut parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", format_value(k), format_value(v)))
                .collect();
            parts.sort();
            format!("map[{}]", parts.join(" "))
        }
        serde_yaml::Value::Tagged(tagged) => format_value(&tagged.value),
    }
}

struct Parser<'a> {
    name: &'a str,
    helpers: &'a HelperRegistry,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(name: &'a str, helpers: &'a HelperRegistry) -> Self {
        Self {
            name,
            helpers,
            line: 1,
        }
    }

    fn error(&self, message: impl Into<String>) -> RunnerError {
        RunnerError::TemplateParse {
            name: self.name.to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    fn parse(&mut self, text: &str) -> RunnerResult<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut rest = text;
        let mut trim_next = false;

        loop {
            if trim_next {
                let trimmed = rest.trim_start();
                self.line += rest[..rest.len() - trimmed.len()].matches('\n').count();
                rest = trimmed;
                trim_next = false;
            }

            let Some(start) = rest.find("{{") else {
                if !rest.is_empty() {
                    nodes.push(Node::Text(rest.to_string()));
                }
                break;
            };

            let after_open = &rest[start + 2..];
            let trim_left = has_trim_marker(after_open);
            let mut literal = &rest[..start];
            self.line += literal.matches('\n').count();
            if trim_left {
                literal = literal.trim_end();
            }
            if !literal.is_empty() {
                nodes.push(Node::Text(literal.to_string()));
            }

            let body_start = if trim_left { 1 } else { 0 };
            let body_and_rest = &after_open[body_start..];
            let close = self.find_close(body_and_rest)?;
            let mut body = &body_and_rest[..close];
            if let Some(stripped) = strip_right_trim(body) {
                body = stripped;
                trim_next = true;
            }

            if let Some(node) = self.parse_action(body)? {
                nodes.push(node);
            }
            self.line += body.matches('\n').count();
            rest = &body_and_rest[close + 2..];
        }

        Ok(nodes)
    }

    /// Index of the closing `}}`, skipping over quoted strings and comments.
    fn find_close(&self, text: &str) -> RunnerResult<usize> {
        let trimmed = text.trim_start();
        if trimmed.starts_with("/*") {
            let offset = text.len() - trimmed.len();
            let end = trimmed
                .find("*/")
                .ok_or_else(|| self.error("unclosed comment"))?;
            let after = offset + end + 2;
            return text[after..]
                .find("}}")
                .map(|i| after + i)
                .ok_or_else(|| self.error("unclosed action"));
        }

        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => {
                    i += 1;
                    loop {
                        match bytes.get(i) {
                            None | Some(b'\n') => {
                                return Err(self.error("unterminated quoted string"))
                            }
                            Some(b'"') => break,
                            Some(b'\\') => i += 2,
                            Some(_) => i += 1,
                        }
                    }
                }
                b'`' => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != b'`' {
                        i += 1;
                    }
                    if i >= bytes.len() {
                        return Err(self.error("unterminated raw quoted string"));
                    }
                }
                b'}' if i + 1 < bytes.len() && bytes[i + 1] == b'}' => return Ok(i),
                _ => {}
            }
            i += 1;
        }
        Err(self.error("unclosed action"))
    }

    fn parse_action(&self, body: &str) -> RunnerResult<Option<Node>> {
        let body = body.trim();
        if body.starts_with("/*") {
            if !body.ends_with("*/") {
                return Err(self.error("comment ends before closing delimiter"));
            }
            return Ok(None);
        }

        let tokens = self.tokenize(body)?;
        let Some((first, args)) = tokens.split_first() else {
            return Err(self.error("missing value for command"));
        };

        match first {
            Token::Ident(ident) if KEYWORDS.contains(&ident.as_str()) => Err(self.error(
                format!("unsupported action \"{}\"", ident),
            )),
            Token::Ident(ident) if is_literal_ident(ident) => {
                if !args.is_empty() {
                    return Err(self.error(format!("can't give argument to non-function {}", ident)));
                }
                Ok(Some(Node::Value(Arg::Literal(ident.clone()))))
            }
            Token::Ident(function) => {
                if !self.helpers.contains(function) {
                    return Err(RunnerError::UnknownHelper {
                        name: self.name.to_string(),
                        function: function.clone(),
                    });
                }
                let args = args
                    .iter()
                    .map(|t| self.token_to_arg(t))
                    .collect::<RunnerResult<Vec<_>>>()?;
                Ok(Some(Node::Call {
                    function: function.clone(),
                    args,
                }))
            }
            other => {
                if !args.is_empty() {
                    return Err(self.error("can't give argument to non-function"));
                }
                Ok(Some(Node::Value(self.token_to_arg(other)?)))
            }
        }
    }

    fn token_to_arg(&self, token: &Token) -> RunnerResult<Arg> {
        match token {
            Token::Literal(s) => Ok(Arg::Literal(s.clone())),
            Token::Field(path) => Ok(Arg::Field(path.clone())),
            Token::Ident(ident) if is_literal_ident(ident) => Ok(Arg::Literal(ident.clone())),
            Token::Ident(ident) => Err(self.error(format!(
                "nested function call \"{}\" is not supported",
                ident
            ))),
        }
    }

    fn tokenize(&self, body: &str) -> RunnerResult<Vec<Token>> {
        let mut tokens = Vec::new();
        let mut chars = body.char_indices().peekable();

        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            match c {
                '"' => {
                    chars.next();
                    let mut value = String::new();
                    let mut closed = false;
                    while let Some((_, c)) = chars.next() {
                        match c {
                            '"' => {
                                closed = true;
                                break;
                            }
                            '\\' => match chars.next() {
                                Some((_, 'n')) => value.push('\n'),
                                Some((_, 't')) => value.push('\t'),
                                Some((_, 'r')) => value.push('\r'),
                                Some((_, other)) => value.push(other),
                                None => break,
                            },
                            other => value.push(other),
                        }
                    }
                    if !closed {
                        return Err(self.error("unterminated quoted string"));
                    }
                    tokens.push(Token::Literal(value));
                }
                '`' => {
                    chars.next();
                    let mut value = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '`' {
                            closed = true;
                            break;
                        }
                        value.push(c);
                    }
                    if !closed {
                        return Err(self.error("unterminated raw quoted string"));
                    }
                    tokens.push(Token::Literal(value));
                }
                '|' | '(' | ')' => {
                    return Err(self.error(format!("unsupported character '{}' in action", c)));
                }
                '$' => return Err(self.error("template variables are not supported")),
                _ => {
                    let mut end = body.len();
                    while let Some(&(j, c)) = chars.peek() {
                        if c.is_whitespace() || c == '"' || c == '`' || c == '|' {
                            end = j;
                            break;
                        }
                        chars.next();
                    }
                    let word = &body[i..end];
                    tokens.push(self.classify_word(word)?);
                }
            }
        }

        Ok(tokens)
    }

    fn classify_word(&self, word: &str) -> RunnerResult<Token> {
        if let Some(path) = word.strip_prefix('.') {
            if path.is_empty() {
                return Ok(Token::Field(Vec::new()));
            }
            let parts: Vec<String> = path.split('.').map(str::to_string).collect();
            if parts.iter().any(|p| p.is_empty() || !is_identifier(p)) {
                return Err(self.error(format!("bad field reference \"{}\"", word)));
            }
            return Ok(Token::Field(parts));
        }

        let first = word.chars().next().unwrap_or(' ');
        if first.is_ascii_digit() || ((first == '-' || first == '+') && word.len() > 1) {
            if word[1..].chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
                || word.parse::<f64>().is_ok()
            {
                return Ok(Token::Literal(word.to_string()));
            }
            return Err(self.error(format!("bad number syntax: \"{}\"", word)));
        }

        if is_identifier(word) {
            return Ok(Token::Ident(word.to_string()));
        }

        Err(self.error(format!("unexpected \"{}\" in command", word)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Field(Vec<String>),
    Ident(String),
}

fn has_trim_marker(after_open: &str) -> bool {
    let mut chars = after_open.chars();
    chars.next() == Some('-') && chars.next().map(char::is_whitespace).unwrap_or(false)
}

fn strip_right_trim(body: &str) -> Option<&str> {
    let without = body.strip_suffix('-')?;
    if without.ends_with(char::is_whitespace) {
        Some(without)
    } else {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_literal_ident(s: &str) -> bool {
    matches!(s, "true" | "false" | "nil")
}
