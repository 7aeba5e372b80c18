//! Recursive-descent parser producing the formula expression tree.
//!
//! Grammar (after normalization):
//!
//! ```text
//! expr     := term (('+' | '-') term)*
//! term     := unary (('*' | '/' | <juxtaposition>) unary)*
//! unary    := ('-' | '+') unary | power
//! power    := primary ('^' exponent)?
//! exponent := ('{' expr '}' | '-'? primary) ('^' exponent)?
//! primary  := number | symbol | command | '{' expr '}' | '(' expr ')'
//! ```
//!
//! Single letters are symbols (LaTeX convention, `ab` is `a*b`). A letter may
//! carry a subscript, `x_1` or `x_{ab}`, which becomes part of its name.

use std::collections::BTreeSet;
use std::fmt;

use super::lexer::{Token, TokenKind};
use crate::error::{Result, SimError};

/// Symbol name bound to the 0-indexed item rank.
pub const RANK_SYMBOL: &str = "m";
/// Symbol name bound to the cumulative popularity mass.
pub const CUMULATIVE_SYMBOL: &str = "v";
/// Symbol name bound to the raw popularity of the item.
pub const RAW_SYMBOL: &str = "r";

/// The three names a formula may read but a caller may never supply.
pub const RESERVED_SYMBOLS: [&str; 3] = [RANK_SYMBOL, CUMULATIVE_SYMBOL, RAW_SYMBOL];

/// Longest formula accepted, in tokens. Bounds the height of the tree that
/// compilation and evaluation recurse over.
pub const MAX_TOKENS: usize = 1024;

/// Deepest nesting of groups, signs and exponents accepted by the parser.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Rank,
    Cumulative,
    Raw,
    Param(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
}

/// Parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Symbol(Symbol),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        func: Function,
        arg: Box<Expr>,
    },
    /// Prefix sum over items of the elementwise body: `\sum_{n=1}^{m}{body}`.
    RunningSum(Box<Expr>),
}

impl Expr {
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Walk the tree and collect every named parameter.
    pub fn parameters(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Symbol(Symbol::Param(name)) = expr {
                out.insert(name.clone());
            }
        });
        out
    }

    /// Whether the tree reads the given symbol anywhere.
    pub fn references(&self, symbol: &Symbol) -> bool {
        let mut found = false;
        self.visit(&mut |expr| {
            if let Expr::Symbol(s) = expr {
                found |= s == symbol;
            }
        });
        found
    }

    pub(crate) fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Literal(_) | Expr::Symbol(_) => {}
            Expr::Neg(inner) | Expr::RunningSum(inner) => inner.visit(f),
            Expr::Call { arg, .. } => arg.visit(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Rank => f.write_str(RANK_SYMBOL),
            Symbol::Cumulative => f.write_str(CUMULATIVE_SYMBOL),
            Symbol::Raw => f.write_str(RAW_SYMBOL),
            Symbol::Param(name) => f.write_str(name),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Function::Exp => "exp",
            Function::Ln => "ln",
            Function::Sqrt => "sqrt",
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{}", value),
            Expr::Symbol(symbol) => write!(f, "{}", symbol),
            Expr::Neg(inner) => write!(f, "-({})", inner),
            Expr::Binary { op, lhs, rhs } => {
                let op = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Pow => "^",
                };
                write!(f, "({}{}{})", lhs, op, rhs)
            }
            Expr::Call { func, arg } => write!(f, "{}({})", func, arg),
            Expr::RunningSum(body) => write!(f, "cumsum({})", body),
        }
    }
}

pub(crate) fn parse(tokens: &[Token], source_len: usize) -> Result<Expr> {
    if let Some(token) = tokens.get(MAX_TOKENS) {
        return Err(SimError::Parse {
            position: token.pos,
            message: format!("formula is longer than {} tokens", MAX_TOKENS),
        });
    }
    let mut parser = Parser {
        tokens,
        index: 0,
        source_len,
        sum_var: None,
        depth: 0,
    };
    if tokens.is_empty() {
        return Err(parser.error("empty formula"));
    }
    let expr = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(SimError::Parse {
            position: token.pos,
            message: format!("unexpected token {:?}", token.kind),
        });
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
    source_len: usize,
    /// Bound variable of the running sum currently being parsed.
    sum_var: Option<char>,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.index)
    }

    fn peek_kind(&self) -> Option<&'a TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn position(&self) -> usize {
        self.peek().map(|t| t.pos).unwrap_or(self.source_len)
    }

    fn error(&self, message: impl Into<String>) -> SimError {
        SimError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    /// Run one level of recursive descent, refusing to go past [`MAX_NESTING`].
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("formula nests deeper than {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.index += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.index += 1;
                    BinaryOp::Mul
                }
                Some(TokenKind::Slash) => {
                    self.index += 1;
                    BinaryOp::Div
                }
                _ if self.starts_primary() => BinaryOp::Mul,
                _ => return Ok(lhs),
            };
            let rhs = self.unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    /// Juxtaposition check: does the next token begin a new factor?
    fn starts_primary(&self) -> bool {
        match self.peek_kind() {
            Some(TokenKind::Number(_))
            | Some(TokenKind::Letter(_))
            | Some(TokenKind::LBrace)
            | Some(TokenKind::LParen) => true,
            Some(TokenKind::Command(name)) => *name != "right",
            _ => false,
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::Minus) {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&TokenKind::Plus) {
            return self.nested(Self::unary);
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if self.eat(&TokenKind::Caret) {
            let exponent = self.exponent()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn exponent(&mut self) -> Result<Expr> {
        let atom = if self.eat(&TokenKind::Minus) {
            Expr::Neg(Box::new(self.primary()?))
        } else {
            self.primary()?
        };
        if self.eat(&TokenKind::Caret) {
            let rest = self.nested(Self::exponent)?;
            return Ok(Expr::binary(BinaryOp::Pow, atom, rest));
        }
        Ok(atom)
    }

    fn group(&mut self, close: TokenKind, what: &str) -> Result<Expr> {
        let inner = self.expr()?;
        self.expect(close, what)?;
        Ok(inner)
    }

    /// Argument of a function command: a braced or parenthesized group, or a
    /// single power-level factor (`\ln x`).
    fn argument(&mut self) -> Result<Expr> {
        if self.eat(&TokenKind::LBrace) {
            self.group(TokenKind::RBrace, "`}`")
        } else if self.eat(&TokenKind::LParen) {
            self.group(TokenKind::RParen, "`)`")
        } else {
            self.power()
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        self.nested(Self::atom)
    }

    fn atom(&mut self) -> Result<Expr> {
        let token = match self.peek() {
            Some(token) => token,
            None => return Err(self.error("unexpected end of formula")),
        };
        self.index += 1;
        match &token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(*value)),
            TokenKind::Letter(letter) => self.symbol(*letter, token.pos),
            TokenKind::LBrace => self.group(TokenKind::RBrace, "`}`"),
            TokenKind::LParen => self.group(TokenKind::RParen, "`)`"),
            TokenKind::Command(name) => self.command(*name, token.pos),
            other => Err(SimError::Parse {
                position: token.pos,
                message: format!("unexpected token {:?}", other),
            }),
        }
    }

    fn subscript(&mut self) -> Result<String> {
        let mut text = String::new();
        if self.eat(&TokenKind::LBrace) {
            while let Some(kind) = self.peek_kind() {
                match kind {
                    TokenKind::Letter(c) => text.push(*c),
                    TokenKind::Number(n) => text.push_str(&n.to_string()),
                    _ => break,
                }
                self.index += 1;
            }
            self.expect(TokenKind::RBrace, "`}` closing subscript")?;
        } else {
            match self.peek_kind() {
                Some(TokenKind::Letter(c)) => text.push(*c),
                Some(TokenKind::Number(n)) => text.push_str(&n.to_string()),
                _ => return Err(self.error("expected subscript")),
            }
            self.index += 1;
        }
        if text.is_empty() {
            return Err(self.error("empty subscript"));
        }
        Ok(text)
    }

    fn symbol(&mut self, letter: char, pos: usize) -> Result<Expr> {
        let name = if self.eat(&TokenKind::Underscore) {
            format!("{}_{}", letter, self.subscript()?)
        } else {
            letter.to_string()
        };

        if name == "p_r" {
            return self.popularity_call(pos);
        }
        if name.len() == 1 && self.sum_var == Some(letter) {
            return Ok(Expr::Symbol(Symbol::Rank));
        }
        Ok(Expr::Symbol(match name.as_str() {
            RANK_SYMBOL => Symbol::Rank,
            CUMULATIVE_SYMBOL => Symbol::Cumulative,
            RAW_SYMBOL => Symbol::Raw,
            _ => Symbol::Param(name),
        }))
    }

    /// `p_r(m)` outside a sum, or `p_r(n)` over the bound variable inside one.
    fn popularity_call(&mut self, pos: usize) -> Result<Expr> {
        self.expect(TokenKind::LParen, "`(` after `p_r`")?;
        let arg = match self.peek_kind() {
            Some(TokenKind::Letter(c)) => *c,
            _ => return Err(self.error("expected an index variable in `p_r(...)`")),
        };
        self.index += 1;
        self.expect(TokenKind::RParen, "`)` closing `p_r(...)`")?;
        if arg == 'm' || self.sum_var == Some(arg) {
            Ok(Expr::Symbol(Symbol::Raw))
        } else {
            Err(SimError::Parse {
                position: pos,
                message: format!(
                    "`p_r({})` must index the rank `m` or the summation variable",
                    arg
                ),
            })
        }
    }

    fn command(&mut self, name: &'static str, pos: usize) -> Result<Expr> {
        let func = match name {
            "exp" => Some(Function::Exp),
            "ln" | "log" => Some(Function::Ln),
            "sqrt" => Some(Function::Sqrt),
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            _ => None,
        };
        if let Some(func) = func {
            let arg = self.argument()?;
            return Ok(Expr::Call {
                func,
                arg: Box::new(arg),
            });
        }

        match name {
            "pi" => Ok(Expr::Literal(std::f64::consts::PI)),
            "frac" => {
                self.expect(TokenKind::LBrace, "`{` after `\\frac`")?;
                let num = self.group(TokenKind::RBrace, "`}` closing numerator")?;
                self.expect(TokenKind::LBrace, "`{` opening denominator")?;
                let den = self.group(TokenKind::RBrace, "`}` closing denominator")?;
                Ok(Expr::binary(BinaryOp::Div, num, den))
            }
            "left" => {
                self.expect(TokenKind::LParen, "`(` after `\\left`")?;
                let inner = self.expr()?;
                if !matches!(self.peek_kind(), Some(TokenKind::Command("right"))) {
                    return Err(self.error("expected `\\right)`"));
                }
                self.index += 1;
                self.expect(TokenKind::RParen, "`)` after `\\right`")?;
                Ok(inner)
            }
            "right" => Err(SimError::Parse {
                position: pos,
                message: "`\\right` without matching `\\left`".to_string(),
            }),
            "sum" => self.running_sum(pos),
            greek => Ok(Expr::Symbol(Symbol::Param(greek.to_string()))),
        }
    }

    /// `\sum_{n=1}^{m}{body}`: only the running sum up to the current rank is
    /// meaningful over an item domain.
    fn running_sum(&mut self, pos: usize) -> Result<Expr> {
        if self.sum_var.is_some() {
            return Err(SimError::Parse {
                position: pos,
                message: "nested sums are not supported".to_string(),
            });
        }
        self.expect(TokenKind::Underscore, "`_` after `\\sum`")?;
        self.expect(TokenKind::LBrace, "`{` opening summation bounds")?;
        let var = match self.peek_kind() {
            Some(TokenKind::Letter(c)) if !RESERVED_SYMBOLS.contains(&c.to_string().as_str()) => *c,
            _ => return Err(self.error("expected a summation variable other than m, v, r")),
        };
        self.index += 1;
        self.expect(TokenKind::Equals, "`=` in summation bounds")?;
        match self.peek_kind() {
            Some(TokenKind::Number(lower)) if *lower == 1.0 => self.index += 1,
            _ => return Err(self.error("running sums must start at 1")),
        }
        self.expect(TokenKind::RBrace, "`}` closing summation bounds")?;
        self.expect(TokenKind::Caret, "`^` upper summation bound")?;
        let braced = self.eat(&TokenKind::LBrace);
        if !self.eat(&TokenKind::Letter('m')) {
            return Err(self.error("running sums must end at the rank `m`"));
        }
        if braced {
            self.expect(TokenKind::RBrace, "`}` closing upper bound")?;
        }

        self.sum_var = Some(var);
        let body = self.argument();
        self.sum_var = None;
        Ok(Expr::RunningSum(Box::new(body?)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(input: &str) -> Result<Expr> {
        parse(&tokenize(input)?, input.len())
    }

    #[test]
    fn test_precedence() {
        let expr = parse_str("1+2*m^2").unwrap();
        assert_eq!(expr.to_string(), "(1+(2*(m^2)))");
    }

    #[test]
    fn test_power_right_associative() {
        let expr = parse_str("2^3^m").unwrap();
        assert_eq!(expr.to_string(), "(2^(3^m))");
    }

    #[test]
    fn test_implicit_multiplication() {
        let expr = parse_str("2\\alpha(m+1)").unwrap();
        assert_eq!(expr.to_string(), "((2*alpha)*(m+1))");
        let expr = parse_str("ab").unwrap();
        assert_eq!(expr.parameters().into_iter().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[test]
    fn test_braced_exponent_and_division() {
        let expr = parse_str("{r^{1/\\alpha}}/{v}").unwrap();
        assert_eq!(expr.to_string(), "((r^(1/alpha))/v)");
    }

    #[test]
    fn test_frac_and_functions() {
        let expr = parse_str("\\frac{1}{m+1}\\exp{-r}").unwrap();
        assert_eq!(expr.to_string(), "((1/(m+1))*exp(-(r)))");
        let expr = parse_str("\\lnx").unwrap();
        assert_eq!(expr.to_string(), "ln(x)");
    }

    #[test]
    fn test_subscripted_names() {
        let expr = parse_str("k_1+k_{ab}").unwrap();
        let params: Vec<_> = expr.parameters().into_iter().collect();
        assert_eq!(params, ["k_1", "k_ab"]);
    }

    #[test]
    fn test_running_sum() {
        let expr = parse_str("\\sum_{n=1}^{m}{p_r(n)^2}").unwrap();
        assert_eq!(expr.to_string(), "cumsum((r^2))");
        let expr = parse_str("\\sum_{k=1}^m{k}").unwrap();
        assert_eq!(expr.to_string(), "cumsum(m)");
    }

    #[test]
    fn test_running_sum_bounds_rejected() {
        assert!(parse_str("\\sum_{n=0}^{m}{p_r(n)}").is_err());
        assert!(parse_str("\\sum_{n=1}^{k}{p_r(n)}").is_err());
        assert!(parse_str("\\sum_{m=1}^{m}{m}").is_err());
        assert!(parse_str("\\sum_{n=1}^{m}{\\sum_{k=1}^{m}{k}}").is_err());
    }

    #[test]
    fn test_popularity_index_outside_sum() {
        assert_eq!(parse_str("p_r(m)").unwrap(), Expr::Symbol(Symbol::Raw));
        assert!(matches!(
            parse_str("p_r(n)"),
            Err(SimError::Parse { position: 0, .. })
        ));
    }

    #[test]
    fn test_left_right() {
        let expr = parse_str("\\left(m+1\\right)^2").unwrap();
        assert_eq!(expr.to_string(), "((m+1)^2)");
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(parse_str(""), Err(SimError::Parse { .. })));
        assert!(matches!(parse_str("(m+1"), Err(SimError::Parse { .. })));
        assert!(matches!(parse_str("m+"), Err(SimError::Parse { .. })));
        assert!(matches!(parse_str("m)"), Err(SimError::Parse { .. })));
        assert!(matches!(parse_str("*m"), Err(SimError::Parse { .. })));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}r{}", "{".repeat(200), "}".repeat(200));
        assert!(matches!(
            parse_str(&deep),
            Err(SimError::Parse { ref message, .. }) if message.contains("nests deeper")
        ));
        let signs = format!("{}r", "-".repeat(200));
        assert!(matches!(parse_str(&signs), Err(SimError::Parse { .. })));
        let tower = vec!["2"; 200].join("^");
        assert!(matches!(parse_str(&tower), Err(SimError::Parse { .. })));

        let shallow = format!("{}r{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse_str(&shallow).unwrap(), Expr::Symbol(Symbol::Raw));
    }

    #[test]
    fn test_length_limit() {
        let long = vec!["r"; 20_000].join("+");
        match parse_str(&long) {
            Err(SimError::Parse { position, message }) => {
                assert_eq!(position, MAX_TOKENS);
                assert!(message.contains("longer than"));
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
        let juxtaposed = "r".repeat(MAX_TOKENS + 1);
        assert!(matches!(parse_str(&juxtaposed), Err(SimError::Parse { .. })));
        assert!(parse_str(&"r".repeat(MAX_TOKENS)).is_ok());
    }

    #[test]
    fn test_references() {
        let expr = parse_str("r/v").unwrap();
        assert!(expr.references(&Symbol::Raw));
        assert!(expr.references(&Symbol::Cumulative));
        assert!(!expr.references(&Symbol::Rank));
    }
}
