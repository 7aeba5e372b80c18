//! Caching-probability formulas.
//!
//! A formula is written in a small LaTeX-like language over three reserved
//! per-item symbols and any number of named scalar parameters:
//!
//! | Written as | Normalized | Meaning |
//! |------------|------------|---------|
//! | `m` | `m` | 0-based rank index of the item |
//! | `\sum_{n=1}^{m}{p_r(n)}` | `v` | cumulative popularity up to the item |
//! | `p_r(m)` | `r` | raw popularity of the item |
//!
//! Every other identifier (`\alpha`, `k`, `x_1`, ...) is a parameter that must
//! be supplied at evaluation time.
//!
//! # Example
//!
//! ```
//! use cachesweep::formula::{compile, normalize, FormulaInputs, Parameters};
//!
//! let formula = compile(&normalize(r"{p_r(m)^{1\over\alpha}}")).unwrap();
//! assert_eq!(formula.parameters(), ["alpha"]);
//!
//! let raw = [0.5, 0.3, 0.2];
//! let params = Parameters::from([("alpha".to_string(), 1.0)]);
//! let out = formula
//!     .evaluate(
//!         FormulaInputs { rank: &[0.0, 1.0, 2.0], cumulative: &[0.5, 0.8, 1.0], raw: &raw },
//!         &params,
//!     )
//!     .unwrap();
//! assert_eq!(out, raw);
//! ```

mod compile;
mod lexer;
mod parser;

pub use compile::{CompiledFormula, FormulaInputs, Parameters};
pub use parser::{
    BinaryOp, Expr, Function, Symbol, CUMULATIVE_SYMBOL, RANK_SYMBOL, RAW_SYMBOL,
    RESERVED_SYMBOLS,
};

use crate::error::Result;

/// Textual operator synonyms substituted before parsing.
const SYNONYMS: [(&str, &str); 3] = [("\\over", "/"), ("\\cdot", "*"), ("\\times", "*")];

/// The formula used when none is configured.
pub const DEFAULT_FORMULA: &str =
    r"{{p_r(m)^{1\over\alpha}}\over{\sum_{n=1}^{m}{p_r(n)^{1\over\alpha}}}}";

/// Canonicalize a raw formula string.
///
/// Strips whitespace, rewrites operator synonyms and the reserved popularity
/// constructs, and drops surplus closing braces at the very end of the input.
pub fn normalize(raw: &str) -> String {
    let mut formula: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\r'))
        .collect();
    for (from, to) in SYNONYMS {
        formula = formula.replace(from, to);
    }
    formula = formula
        .replace("\\sum_{n=1}^{m}{p_r(n)}", CUMULATIVE_SYMBOL)
        .replace("p_r(m)", RAW_SYMBOL);
    trim_surplus_braces(&mut formula);
    formula
}

fn trim_surplus_braces(formula: &mut String) {
    let mut depth = 0usize;
    for (index, c) in formula.char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth > 0 => depth -= 1,
            '}' => {
                if formula[index..].chars().all(|c| c == '}') {
                    formula.truncate(index);
                }
                return;
            }
            _ => {}
        }
    }
}

/// Parse a normalized formula and compile it into an elementwise evaluator.
///
/// # Errors
///
/// Returns `SimError::Parse` with the byte position of the first problem.
pub fn compile(normalized: &str) -> Result<CompiledFormula> {
    let tokens = lexer::tokenize(normalized)?;
    let expr = parser::parse(&tokens, normalized.len())?;
    Ok(CompiledFormula::from_expr(normalized, expr))
}

/// Normalize and compile in one step.
pub fn compile_raw(raw: &str) -> Result<CompiledFormula> {
    compile(&normalize(raw))
}
