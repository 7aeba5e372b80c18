//! Tokenizer for the LaTeX-like formula grammar.
//!
//! Whitespace is stripped by normalization, so a command may run straight into
//! the letters that follow it (`\lnx`). Command names are therefore resolved by
//! the longest known prefix; any leftover letters become ordinary symbols.

use crate::error::{Result, SimError};

/// Commands the parser understands. Longest-prefix matching picks from these.
pub(crate) const KNOWN_COMMANDS: &[&str] = &[
    // functions and structure
    "frac", "sqrt", "exp", "ln", "log", "sin", "cos", "tan", "sum", "left", "right", "pi",
    // greek letters (named parameters)
    "alpha", "beta", "gamma", "delta", "epsilon", "varepsilon", "zeta", "eta", "theta",
    "vartheta", "iota", "kappa", "lambda", "mu", "nu", "xi", "rho", "sigma", "tau",
    "upsilon", "phi", "varphi", "chi", "psi", "omega",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Letter(char),
    Command(&'static str),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Underscore,
    Equals,
    LBrace,
    RBrace,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset into the normalized formula.
    pub pos: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let pos = i;
        let simple = match c {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '^' => Some(TokenKind::Caret),
            '_' => Some(TokenKind::Underscore),
            '=' => Some(TokenKind::Equals),
            '{' => Some(TokenKind::LBrace),
            '}' => Some(TokenKind::RBrace),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            _ => None,
        };
        if let Some(kind) = simple {
            tokens.push(Token { kind, pos });
            i += 1;
            continue;
        }

        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            let text = &input[start..i];
            let value: f64 = text.parse().map_err(|_| SimError::Parse {
                position: start,
                message: format!("invalid number `{}`", text),
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                pos: start,
            });
        } else if c.is_ascii_alphabetic() {
            tokens.push(Token {
                kind: TokenKind::Letter(c),
                pos,
            });
            i += 1;
        } else if c == '\\' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_alphabetic() {
                end += 1;
            }
            let word = &input[start..end];
            let command = KNOWN_COMMANDS
                .iter()
                .filter(|name| word.starts_with(**name))
                .max_by_key(|name| name.len())
                .ok_or_else(|| SimError::Parse {
                    position: pos,
                    message: if word.is_empty() {
                        "expected a command name after `\\`".to_string()
                    } else {
                        format!("unknown command `\\{}`", word)
                    },
                })?;
            tokens.push(Token {
                kind: TokenKind::Command(command),
                pos,
            });
            // leftover letters of a run-together word are plain symbols
            for (offset, letter) in word[command.len()..].char_indices() {
                tokens.push(Token {
                    kind: TokenKind::Letter(letter),
                    pos: start + command.len() + offset,
                });
            }
            i = end;
        } else {
            return Err(SimError::Parse {
                position: pos,
                message: format!("unexpected character `{}`", c),
            });
        }
    }

    Ok(tokens)
}
