//! Declarative query language understood by the in-memory store.
//!
//! The language covers single-variable node patterns:
//!
//! - `MATCH (n:Person {name: "Alice"}) WHERE n.age = 33 RETURN n, n.name LIMIT 10`
//! - `START n=node(0, 4) RETURN id(n), labels(n)`
//! - `CREATE (n:Person:Female {name: $name}) RETURN n`
//! - `RETURN 1 AS one, $param`
//!
//! Keywords are case-insensitive. Return items are `n`, `n.key`, `id(n)`,
//! `labels(n)`, a literal or a `$param`, each optionally renamed with `AS`.
//! Column names are the alias, or the item text as written.

use crate::error::StoreError;
use graphrep_protocol::value::{NodeSnapshot, Value};
use std::collections::BTreeMap;

/// Named query parameters.
pub type Params = BTreeMap<String, Value>;

/// A literal or a parameter reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Param(String),
}

impl Expr {
    pub fn resolve(&self, params: &Params) -> Result<Value, StoreError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Param(name) => params
                .get(name)
                .cloned()
                .ok_or_else(|| StoreError::Query(format!("missing parameter ${}", name))),
        }
    }
}

/// What a return item computes.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Variable(String),
    Property(String, String),
    Id(String),
    Labels(String),
    Expr(Expr),
}

impl Projection {
    fn variable(&self) -> Option<&str> {
        match self {
            Projection::Variable(var)
            | Projection::Property(var, _)
            | Projection::Id(var)
            | Projection::Labels(var) => Some(var),
            Projection::Expr(_) => None,
        }
    }
}

/// One column of a RETURN clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub projection: Projection,
    pub column: String,
}

impl ReturnItem {
    /// Computes the item for one bound node.
    pub fn evaluate(&self, node: Option<&NodeSnapshot>, params: &Params) -> Result<Value, StoreError> {
        let bound = || {
            node.ok_or_else(|| StoreError::Query(format!("no node bound for '{}'", self.column)))
        };
        match &self.projection {
            Projection::Variable(_) => Ok(Value::Node(bound()?.clone())),
            Projection::Property(_, key) => Ok(bound()?
                .properties
                .get(key)
                .cloned()
                .unwrap_or(Value::Null)),
            Projection::Id(_) => Ok(Value::Int(bound()?.id as i64)),
            Projection::Labels(_) => Ok(Value::List(
                bound()?.labels.iter().map(|l| Value::from(l.as_str())).collect(),
            )),
            Projection::Expr(expr) => expr.resolve(params),
        }
    }
}

/// A node pattern: `(n:Label {key: value})`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Expr)>,
}

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Match {
        pattern: NodePattern,
        conditions: Vec<(String, Expr)>,
        returns: Vec<ReturnItem>,
        limit: Option<usize>,
    },
    Start {
        variable: String,
        ids: Vec<u64>,
        returns: Vec<ReturnItem>,
        limit: Option<usize>,
    },
    Create {
        pattern: NodePattern,
        returns: Vec<ReturnItem>,
    },
    Return {
        returns: Vec<ReturnItem>,
    },
}

impl Statement {
    /// Parses and validates a statement.
    pub fn parse(query: &str) -> Result<Self, StoreError> {
        let tokens = tokenize(query)?;
        if tokens.is_empty() {
            return Err(StoreError::Query("empty query".to_string()));
        }
        let statement = Parser::new(query, tokens).parse_statement()?;
        statement.check_variables()?;
        Ok(statement)
    }

    /// Column names, in return order.
    pub fn columns(&self) -> Vec<String> {
        self.returns().iter().map(|item| item.column.clone()).collect()
    }

    pub fn returns(&self) -> &[ReturnItem] {
        match self {
            Statement::Match { returns, .. }
            | Statement::Start { returns, .. }
            | Statement::Create { returns, .. }
            | Statement::Return { returns } => returns,
        }
    }

    /// Verifies that every parameter the statement mentions is supplied.
    pub fn check_params(&self, params: &Params) -> Result<(), StoreError> {
        let mut exprs: Vec<&Expr> = Vec::new();
        match self {
            Statement::Match {
                pattern,
                conditions,
                ..
            } => {
                exprs.extend(pattern.properties.iter().map(|(_, e)| e));
                exprs.extend(conditions.iter().map(|(_, e)| e));
            }
            Statement::Create { pattern, .. } => {
                exprs.extend(pattern.properties.iter().map(|(_, e)| e));
            }
            Statement::Start { .. } | Statement::Return { .. } => {}
        }
        exprs.extend(self.returns().iter().filter_map(|item| match &item.projection {
            Projection::Expr(e) => Some(e),
            _ => None,
        }));

        for expr in exprs {
            expr.resolve(params)?;
        }
        Ok(())
    }

    fn bound_variable(&self) -> Option<&str> {
        match self {
            Statement::Match { pattern, .. } | Statement::Create { pattern, .. } => {
                pattern.variable.as_deref()
            }
            Statement::Start { variable, .. } => Some(variable),
            Statement::Return { .. } => None,
        }
    }

    fn check_variables(&self) -> Result<(), StoreError> {
        let bound = self.bound_variable();
        for item in self.returns() {
            if let Some(var) = item.projection.variable() {
                if Some(var) != bound {
                    return Err(StoreError::Query(format!("variable '{}' not defined", var)));
                }
            }
        }
        if let Statement::Match { conditions, .. } = self {
            if !conditions.is_empty() && bound.is_none() {
                return Err(StoreError::Query("WHERE needs a bound variable".to_string()));
            }
        }
        Ok(())
    }
}

/// Equality used by pattern and WHERE matching; integers and floats compare
/// by numeric value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        _ => a == b,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Param(String),
    Str(String),
    Int(i64),
    Float(f64),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    start: usize,
    end: usize,
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            Token::Ident(ident)
        } else if c == '$' {
            chars.next();
            let mut name = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                return Err(StoreError::Query(format!("empty parameter name at {}", start)));
            }
            Token::Param(name)
        } else if c == '"' || c == '\'' {
            chars.next();
            Token::Str(read_string(&mut chars, c, start)?)
        } else if c.is_ascii_digit() || c == '-' {
            let mut text = String::new();
            text.push(c);
            chars.next();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' {
                    text.push(c);
                    chars.next();
                } else if (c == '-' || c == '+') && text.ends_with(['e', 'E']) {
                    text.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if let Ok(i) = text.parse::<i64>() {
                Token::Int(i)
            } else if let Ok(f) = text.parse::<f64>() {
                Token::Float(f)
            } else {
                return Err(StoreError::Query(format!("invalid number '{}'", text)));
            }
        } else if "()[]{}:,.=;".contains(c) {
            chars.next();
            Token::Punct(c)
        } else {
            return Err(StoreError::Query(format!(
                "unexpected character '{}' at {}",
                c, start
            )));
        };

        let end = chars.peek().map_or(input.len(), |&(i, _)| i);
        tokens.push(Spanned { token, start, end });
    }

    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, StoreError> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(out),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(StoreError::Query(format!("unterminated string at {}", start)))
}

/// Recursive descent parser over the token stream.
struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, tokens: Vec<Spanned>) -> Self {
        Self {
            input,
            tokens,
            pos: 0,
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, StoreError> {
        let statement = if self.eat_keyword("MATCH") {
            self.parse_match()?
        } else if self.eat_keyword("START") {
            self.parse_start()?
        } else if self.eat_keyword("CREATE") {
            self.parse_create()?
        } else if self.eat_keyword("RETURN") {
            Statement::Return {
                returns: self.parse_return_items()?,
            }
        } else {
            return Err(self.error("expected MATCH, START, CREATE or RETURN"));
        };

        self.eat_punct(';');
        if self.pos < self.tokens.len() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(statement)
    }

    fn parse_match(&mut self) -> Result<Statement, StoreError> {
        let pattern = self.parse_node_pattern()?;

        let mut conditions = Vec::new();
        if self.eat_keyword("WHERE") {
            loop {
                let var = self.expect_ident()?;
                if pattern.variable.as_deref() != Some(var.as_str()) {
                    return Err(StoreError::Query(format!("variable '{}' not defined", var)));
                }
                self.expect_punct('.')?;
                let key = self.expect_ident()?;
                self.expect_punct('=')?;
                conditions.push((key, self.parse_expr()?));
                if !self.eat_keyword("AND") {
                    break;
                }
            }
        }

        self.expect_keyword("RETURN")?;
        let returns = self.parse_return_items()?;
        let limit = self.parse_limit()?;

        Ok(Statement::Match {
            pattern,
            conditions,
            returns,
            limit,
        })
    }

    fn parse_start(&mut self) -> Result<Statement, StoreError> {
        let variable = self.expect_ident()?;
        self.expect_punct('=')?;
        self.expect_keyword("node")?;
        self.expect_punct('(')?;

        let mut ids = Vec::new();
        loop {
            match self.next_token() {
                Some(Token::Int(i)) if i >= 0 => ids.push(i as u64),
                _ => return Err(self.error("expected a node id")),
            }
            if !self.eat_punct(',') {
                break;
            }
        }
        self.expect_punct(')')?;

        self.expect_keyword("RETURN")?;
        let returns = self.parse_return_items()?;
        let limit = self.parse_limit()?;

        Ok(Statement::Start {
            variable,
            ids,
            returns,
            limit,
        })
    }

    fn parse_create(&mut self) -> Result<Statement, StoreError> {
        let pattern = self.parse_node_pattern()?;
        let returns = if self.eat_keyword("RETURN") {
            self.parse_return_items()?
        } else {
            Vec::new()
        };
        Ok(Statement::Create { pattern, returns })
    }

    fn parse_node_pattern(&mut self) -> Result<NodePattern, StoreError> {
        self.expect_punct('(')?;
        let mut pattern = NodePattern::default();

        if let Some(Token::Ident(name)) = self.peek_token() {
            pattern.variable = Some(name.clone());
            self.pos += 1;
        }

        while self.eat_punct(':') {
            pattern.labels.push(self.expect_ident()?);
        }

        if self.eat_punct('{') {
            if !self.eat_punct('}') {
                loop {
                    let key = self.expect_ident()?;
                    self.expect_punct(':')?;
                    pattern.properties.push((key, self.parse_expr()?));
                    if !self.eat_punct(',') {
                        break;
                    }
                }
                self.expect_punct('}')?;
            }
        }

        self.expect_punct(')')?;
        Ok(pattern)
    }

    fn parse_return_items(&mut self) -> Result<Vec<ReturnItem>, StoreError> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_return_item()?);
            if !self.eat_punct(',') {
                break;
            }
        }
        Ok(items)
    }

    fn parse_return_item(&mut self) -> Result<ReturnItem, StoreError> {
        let start = self
            .tokens
            .get(self.pos)
            .map(|t| t.start)
            .ok_or_else(|| self.error("expected a return item"))?;

        let projection = match self.peek_token().cloned() {
            Some(Token::Ident(name)) if self.peek_punct_at(self.pos + 1, '(') => {
                let func = name.to_ascii_lowercase();
                self.pos += 2;
                let var = self.expect_ident()?;
                self.expect_punct(')')?;
                match func.as_str() {
                    "id" => Projection::Id(var),
                    "labels" => Projection::Labels(var),
                    _ => return Err(StoreError::Query(format!("unknown function '{}'", name))),
                }
            }
            Some(Token::Ident(name)) if !is_literal_keyword(&name) => {
                self.pos += 1;
                if self.eat_punct('.') {
                    Projection::Property(name, self.expect_ident()?)
                } else {
                    Projection::Variable(name)
                }
            }
            _ => Projection::Expr(self.parse_expr()?),
        };

        let end = self.tokens[self.pos - 1].end;
        let column = if self.eat_keyword("AS") {
            self.expect_ident()?
        } else {
            self.input[start..end].trim().to_string()
        };

        Ok(ReturnItem { projection, column })
    }

    fn parse_limit(&mut self) -> Result<Option<usize>, StoreError> {
        if !self.eat_keyword("LIMIT") {
            return Ok(None);
        }
        match self.next_token() {
            Some(Token::Int(i)) if i >= 0 => Ok(Some(i as usize)),
            _ => Err(self.error("LIMIT expects a non-negative integer")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, StoreError> {
        if let Some(Token::Param(name)) = self.peek_token() {
            let name = name.clone();
            self.pos += 1;
            return Ok(Expr::Param(name));
        }
        Ok(Expr::Literal(self.parse_literal()?))
    }

    fn parse_literal(&mut self) -> Result<Value, StoreError> {
        match self.next_token() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Int(i)) => Ok(Value::Int(i)),
            Some(Token::Float(f)) => Ok(Value::Float(f)),
            Some(Token::Ident(word)) => match word.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(StoreError::Query(format!("unexpected identifier '{}'", word))),
            },
            Some(Token::Punct('[')) => {
                let mut items = Vec::new();
                if !self.eat_punct(']') {
                    loop {
                        items.push(self.parse_literal()?);
                        if !self.eat_punct(',') {
                            break;
                        }
                    }
                    self.expect_punct(']')?;
                }
                Ok(Value::List(items))
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.error("expected a literal"))
            }
            None => Err(self.error("expected a literal")),
        }
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_punct_at(&self, pos: usize, c: char) -> bool {
        matches!(self.tokens.get(pos), Some(Spanned { token: Token::Punct(p), .. }) if *p == c)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek_token() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), StoreError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", keyword)))
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek_punct_at(self.pos, c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<(), StoreError> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, StoreError> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn error(&self, message: &str) -> StoreError {
        match self.tokens.get(self.pos) {
            Some(t) => StoreError::Query(format!(
                "{} at position {}, found '{}'",
                message,
                t.start,
                &self.input[t.start..t.end]
            )),
            None => StoreError::Query(format!("{} at end of query", message)),
        }
    }
}

fn is_literal_keyword(word: &str) -> bool {
    ["true", "false", "null"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}
