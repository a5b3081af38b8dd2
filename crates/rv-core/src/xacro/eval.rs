//! `${...}` expression evaluation

use std::f64::consts::PI;
use std::fmt;

use super::XacroError;
use crate::constants::XACRO_MAX_DEPTH;

/// Result of an expression
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    /// Interpret property text: numeric text becomes a number
    pub fn from_text(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(text.to_string()),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }

    fn as_number(&self, context: &str) -> Result<f64, XacroError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            Value::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| XacroError::Expression(format!("{context}: '{s}' is not a number"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
        }
    }
}

/// Name lookup used while evaluating
pub trait Variables {
    fn lookup(&mut self, name: &str) -> Result<Value, XacroError>;
}

/// Evaluate one expression
pub fn evaluate(expr: &str, vars: &mut dyn Variables) -> Result<Value, XacroError> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        vars,
        source: expr,
    };
    let value = parser.conditional()?;
    match parser.peek() {
        None => Ok(value),
        Some(token) => Err(parser.syntax_error(&format!("unexpected {token:?}"))),
    }
}

// ============== Lexer ==============

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

const OPERATORS: [&str; 13] = [
    "**", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!",
];

fn tokenize(expr: &str) -> Result<Vec<Token>, XacroError> {
    let mut tokens = Vec::new();
    let mut rest = expr;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
        } else if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let len = number_len(rest);
            let number = rest[..len]
                .parse()
                .map_err(|_| XacroError::Expression(format!("bad number '{}' in '{expr}'", &rest[..len])))?;
            tokens.push(Token::Number(number));
            rest = &rest[len..];
        } else if c.is_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '.'))
                .unwrap_or(rest.len());
            tokens.push(Token::Ident(rest[..len].to_string()));
            rest = &rest[len..];
        } else if c == '\'' || c == '"' {
            let Some(end) = rest[1..].find(c) else {
                return Err(XacroError::Expression(format!("unterminated string in '{expr}'")));
            };
            tokens.push(Token::Str(rest[1..=end].to_string()));
            rest = &rest[end + 2..];
        } else if c == '(' {
            tokens.push(Token::LParen);
            rest = &rest[1..];
        } else if c == ')' {
            tokens.push(Token::RParen);
            rest = &rest[1..];
        } else if c == ',' {
            tokens.push(Token::Comma);
            rest = &rest[1..];
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Token::Op(*op));
            rest = &rest[op.len()..];
        } else {
            return Err(XacroError::Expression(format!(
                "unexpected character '{c}' in '{expr}'"
            )));
        }
    }

    Ok(tokens)
}

fn number_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut len = 0;
    while len < bytes.len() && (bytes[len].is_ascii_digit() || bytes[len] == b'.') {
        len += 1;
    }
    if len < bytes.len() && matches!(bytes[len], b'e' | b'E') {
        let mut exp = len + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            len = exp;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
    }
    len
}

// ============== Parser ==============

struct Parser<'a, 'v> {
    tokens: Vec<Token>,
    pos: usize,
    /// Current nesting of parenthesized and prefix sub-expressions
    depth: usize,
    vars: &'v mut dyn Variables,
    source: &'a str,
}

impl Parser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, expected: Token) -> Result<(), XacroError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(self.syntax_error(&format!("expected {expected:?}, found {token:?}"))),
            None => Err(self.syntax_error(&format!("expected {expected:?}"))),
        }
    }

    /// Parse a nested sub-expression, bounded by the xacro depth limit
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Value, XacroError>,
    ) -> Result<Value, XacroError> {
        if self.depth >= XACRO_MAX_DEPTH {
            let head: String = self.source.chars().take(32).collect();
            return Err(XacroError::RecursionLimit(format!("${{{head}...}}")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn syntax_error(&self, message: &str) -> XacroError {
        XacroError::Expression(format!("{message} in '{}'", self.source))
    }

    /// `a if cond else b`
    fn conditional(&mut self) -> Result<Value, XacroError> {
        let value = self.or()?;
        if !self.eat_keyword("if") {
            return Ok(value);
        }
        let condition = self.or()?;
        if !self.eat_keyword("else") {
            return Err(self.syntax_error("expected 'else'"));
        }
        let otherwise = self.nested(Self::conditional)?;
        Ok(if condition.is_truthy() { value } else { otherwise })
    }

    fn or(&mut self) -> Result<Value, XacroError> {
        let mut left = self.and()?;
        while self.eat_keyword("or") {
            let right = self.and()?;
            if !left.is_truthy() {
                left = right;
            }
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value, XacroError> {
        let mut left = self.not()?;
        while self.eat_keyword("and") {
            let right = self.not()?;
            if left.is_truthy() {
                left = right;
            }
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Value, XacroError> {
        if self.eat_keyword("not") || self.eat_op("!") {
            let value = self.nested(Self::not)?;
            return Ok(Value::Bool(!value.is_truthy()));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Value, XacroError> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Op(op @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        compare(op, &left, &right).map(Value::Bool)
    }

    fn additive(&mut self) -> Result<Value, XacroError> {
        let mut left = self.term()?;
        loop {
            if self.eat_op("+") {
                let right = self.term()?;
                left = match (left, right) {
                    (Value::Text(a), Value::Text(b)) => Value::Text(a + &b),
                    (a, b) => Value::Number(a.as_number("+")? + b.as_number("+")?),
                };
            } else if self.eat_op("-") {
                let right = self.term()?;
                left = Value::Number(left.as_number("-")? - right.as_number("-")?);
            } else {
                return Ok(left);
            }
        }
    }

    fn term(&mut self) -> Result<Value, XacroError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(op @ ("*" | "/" | "%"))) => *op,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            let (a, b) = (left.as_number(op)?, right.as_number(op)?);
            if op != "*" && b == 0.0 {
                return Err(self.syntax_error("division by zero"));
            }
            left = Value::Number(match op {
                "*" => a * b,
                "/" => a / b,
                _ => a - b * (a / b).floor(),
            });
        }
    }

    fn unary(&mut self) -> Result<Value, XacroError> {
        if self.eat_op("-") {
            return Ok(Value::Number(-self.nested(Self::unary)?.as_number("-")?));
        }
        if self.eat_op("+") {
            return Ok(Value::Number(self.nested(Self::unary)?.as_number("+")?));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Value, XacroError> {
        let base = self.primary()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::unary)?;
            return Ok(Value::Number(
                base.as_number("**")?.powf(exponent.as_number("**")?),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Value, XacroError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::Text(s)),
            Some(Token::LParen) => {
                let value = self.nested(Self::conditional)?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return call(&name, &args).map_err(|e| match e {
                        XacroError::Expression(msg) => self.syntax_error(&msg),
                        other => other,
                    });
                }
                let bare = name.strip_prefix("math.").unwrap_or(&name);
                match bare {
                    "pi" => Ok(Value::Number(PI)),
                    "True" | "true" => Ok(Value::Bool(true)),
                    "False" | "false" => Ok(Value::Bool(false)),
                    _ => self.vars.lookup(&name),
                }
            }
            Some(token) => Err(self.syntax_error(&format!("unexpected {token:?}"))),
            None => Err(self.syntax_error("unexpected end of expression")),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Value>, XacroError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::conditional)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                _ => return Err(self.syntax_error("expected ',' or ')'")),
            }
        }
    }
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, XacroError> {
    let ordering = match (left, right) {
        (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
        (Value::Text(_), _) | (_, Value::Text(_)) => {
            return match op {
                "==" => Ok(false),
                "!=" => Ok(true),
                _ => Err(XacroError::Expression(format!(
                    "cannot order '{left}' and '{right}'"
                ))),
            };
        }
        (a, b) => a.as_number(op)?.partial_cmp(&b.as_number(op)?),
    };
    let Some(ordering) = ordering else {
        return Ok(op == "!=");
    };
    Ok(match op {
        "==" => ordering.is_eq(),
        "!=" => ordering.is_ne(),
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn call(name: &str, args: &[Value]) -> Result<Value, XacroError> {
    let function = name.strip_prefix("math.").unwrap_or(name);

    let numbers = || -> Result<Vec<f64>, XacroError> {
        args.iter().map(|a| a.as_number(function)).collect()
    };
    let unary = |f: fn(f64) -> f64| -> Result<Value, XacroError> {
        match numbers()?.as_slice() {
            [x] => Ok(Value::Number(f(*x))),
            _ => Err(XacroError::Expression(format!(
                "{function}() takes exactly one argument"
            ))),
        }
    };

    match function {
        "radians" => unary(f64::to_radians),
        "degrees" => unary(f64::to_degrees),
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "asin" => unary(f64::asin),
        "acos" => unary(f64::acos),
        "atan" => unary(f64::atan),
        "sqrt" => unary(f64::sqrt),
        "abs" | "fabs" => unary(f64::abs),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "int" => unary(f64::trunc),
        "float" => unary(|x| x),
        "atan2" => match numbers()?.as_slice() {
            [y, x] => Ok(Value::Number(y.atan2(*x))),
            _ => Err(XacroError::Expression(
                "atan2() takes exactly two arguments".to_string(),
            )),
        },
        "min" | "max" => {
            let values = numbers()?;
            let folded = if function == "min" {
                values.iter().copied().reduce(f64::min)
            } else {
                values.iter().copied().reduce(f64::max)
            };
            folded.map(Value::Number).ok_or_else(|| {
                XacroError::Expression(format!("{function}() needs at least one argument"))
            })
        }
        "str" => match args {
            [value] => Ok(Value::Text(value.to_string())),
            _ => Err(XacroError::Expression(
                "str() takes exactly one argument".to_string(),
            )),
        },
        _ => Err(XacroError::Expression(format!("unknown function '{name}'"))),
    }
}
