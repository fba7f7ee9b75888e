//! Parsing of `${...}` references and the strings that embed them

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

static EXPRESSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]*)\}").expect("expression regex should compile"));

/// Where a reference starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Root {
    /// `var.NAME`
    Variable(String),
    /// `conn.NAME`
    Connection(String),
    /// `steps['NAME'].output`
    StepOutput(String),
    /// `steps['NAME'].args`
    StepArgs(String),
}

/// One navigation segment after the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// `.NAME`: mapping key, data attribute or method
    Attr(String),
    /// `['KEY']`
    Key(String),
    /// `[N]`
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: Root,
    pub accessors: Vec<Accessor>,
}

impl Reference {
    /// The step this reference reads from, if any
    pub fn step(&self) -> Option<&str> {
        match &self.root {
            Root::StepOutput(name) | Root::StepArgs(name) => Some(name),
            _ => None,
        }
    }

    /// Dotted name of the chain, used to derive step names
    ///
    /// `steps['X'].output.groupby` gives `X.groupby`.
    pub fn chain_name(&self) -> String {
        let mut name = match &self.root {
            Root::Variable(n) => format!("var.{}", n),
            Root::Connection(n) => format!("conn.{}", n),
            Root::StepOutput(n) => n.clone(),
            Root::StepArgs(n) => format!("{}.args", n),
        };
        for accessor in &self.accessors {
            match accessor {
                Accessor::Attr(a) | Accessor::Key(a) => {
                    name.push('.');
                    name.push_str(a);
                }
                Accessor::Index(i) => name.push_str(&format!("[{}]", i)),
            }
        }
        name
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Variable(n) => write!(f, "var.{}", n)?,
            Root::Connection(n) => write!(f, "conn.{}", n)?,
            Root::StepOutput(n) => write!(f, "steps['{}'].output", n)?,
            Root::StepArgs(n) => write!(f, "steps['{}'].args", n)?,
        }
        for accessor in &self.accessors {
            match accessor {
                Accessor::Attr(a) => write!(f, ".{}", a)?,
                Accessor::Key(k) => write!(f, "['{}']", k)?,
                Accessor::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

/// A parsed reference together with its source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    /// Source text including the `${` `}` markers
    pub text: String,
    pub reference: Reference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Expr(Expression),
}

/// A scalar string field, classified by how it resolves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// No expressions at all
    Literal(String),
    /// Exactly one expression and nothing else: resolves to the native value
    Single(Expression),
    /// Text and expressions: resolves to a string
    Interpolated(Vec<Segment>),
}

/// A malformed expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub expression: String,
    pub reason: String,
}

impl Template {
    pub fn parse(input: &str) -> Result<Template, ParseError> {
        if !input.contains("${") {
            return Ok(Template::Literal(input.to_string()));
        }

        let mut segments = Vec::new();
        let mut last = 0;
        for captures in EXPRESSION.captures_iter(input) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Text(input[last..whole.start()].to_string()));
            }
            let reference = parse_reference(inner.as_str()).map_err(|reason| ParseError {
                expression: whole.as_str().to_string(),
                reason,
            })?;
            segments.push(Segment::Expr(Expression {
                text: whole.as_str().to_string(),
                reference,
            }));
            last = whole.end();
        }
        if last < input.len() {
            segments.push(Segment::Text(input[last..].to_string()));
        }

        for segment in &segments {
            if let Segment::Text(text) = segment {
                if let Some(start) = text.find("${") {
                    return Err(ParseError {
                        expression: text[start..].to_string(),
                        reason: "missing closing '}'".to_string(),
                    });
                }
            }
        }

        let exprs: Vec<&Expression> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Expr(e) => Some(e),
                Segment::Text(_) => None,
            })
            .collect();
        let only_whitespace = segments.iter().all(|s| match s {
            Segment::Text(t) => t.trim().is_empty(),
            Segment::Expr(_) => true,
        });

        match exprs.as_slice() {
            [single] if only_whitespace => Ok(Template::Single((*single).clone())),
            _ => Ok(Template::Interpolated(segments)),
        }
    }

    /// Every expression in the template, in order
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Template::Literal(_) => Vec::new(),
            Template::Single(expr) => vec![expr],
            Template::Interpolated(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Expr(e) => Some(e),
                    Segment::Text(_) => None,
                })
                .collect(),
        }
    }
}

/// Parse the inside of `${ }`
pub fn parse_reference(input: &str) -> Result<Reference, String> {
    let mut cursor = Cursor::new(input.trim());

    let head = cursor.identifier()?;
    let root = match head.as_str() {
        "var" => {
            cursor.expect('.')?;
            Root::Variable(cursor.identifier()?)
        }
        "conn" => {
            cursor.expect('.')?;
            Root::Connection(cursor.identifier()?)
        }
        "steps" => {
            cursor.expect('[')?;
            let name = cursor.quoted()?;
            cursor.expect(']')?;
            cursor.expect('.')?;
            match cursor.identifier()?.as_str() {
                "output" => Root::StepOutput(name),
                "args" => Root::StepArgs(name),
                other => {
                    return Err(format!(
                        "expected 'output' or 'args' after steps['{}'], found '{}'",
                        name, other
                    ))
                }
            }
        }
        other => {
            return Err(format!(
                "unknown reference root '{}' (expected var, conn or steps)",
                other
            ))
        }
    };

    let mut accessors = Vec::new();
    while let Some(c) = cursor.peek() {
        match c {
            '.' => {
                cursor.bump();
                accessors.push(Accessor::Attr(cursor.identifier()?));
            }
            '[' => {
                cursor.bump();
                match cursor.peek() {
                    Some('\'') | Some('"') => accessors.push(Accessor::Key(cursor.quoted()?)),
                    _ => accessors.push(Accessor::Index(cursor.index()?)),
                }
                cursor.expect(']')?;
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(Reference { root, accessors })
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected '{}' but found '{}'", expected, c)),
            None => Err(format!("expected '{}' but reached the end", expected)),
        }
    }

    fn identifier(&mut self) -> Result<String, String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                self.bump();
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(match self.peek() {
                Some(c) => format!("expected a name but found '{}'", c),
                None => "expected a name but reached the end".to_string(),
            });
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn quoted(&mut self) -> Result<String, String> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err("expected a quoted name".to_string()),
        };
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == quote {
                return Ok(self.input[start..self.pos - c.len_utf8()].to_string());
            }
        }
        Err("unterminated quoted name".to_string())
    }

    fn index(&mut self) -> Result<usize, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| "expected a quoted key or a list index".to_string())
    }
}
