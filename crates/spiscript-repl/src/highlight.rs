//! Line editing support for the REPL
//!
//! Completion of known names, colouring, and multi-line input while
//! parentheses are unbalanced.

use colored::Colorize;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Arc;
use steel_parser::lexer::TokenStream;
use steel_parser::parser::SourceId;
use steel_parser::tokens::TokenType;

/// rustyline helper for the spiscript REPL
#[derive(Helper)]
pub struct ReplHelper {
    /// Names offered for completion and drawn in blue
    globals: Arc<BTreeSet<String>>,
}

impl ReplHelper {
    /// Create a helper that knows the given names
    pub fn new(globals: Arc<BTreeSet<String>>) -> Self {
        Self { globals }
    }

    fn candidates(&self, prefix: &str) -> Vec<String> {
        let mut starting = Vec::new();
        let mut containing = Vec::new();
        for name in self.globals.iter() {
            if name.starts_with(prefix) {
                starting.push(name.clone());
            } else if name.contains(prefix) {
                containing.push(name.clone());
            }
        }
        starting.extend(containing);
        starting
    }
}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Self::Candidate>)> {
        for token in TokenStream::new(line, true, SourceId::none()) {
            if let TokenType::Identifier(ref symbol) = token.ty {
                let span = token.span();
                if (span.start()..=span.end()).contains(&pos) {
                    let completions = self
                        .candidates(symbol.as_ref())
                        .into_iter()
                        .map(|ident| Pair {
                            display: format!("{}", ident.white()),
                            replacement: ident,
                        })
                        .collect();
                    return Ok((span.start(), completions));
                }
            }
        }

        Ok((0, Vec::new()))
    }
}

impl Validator for ReplHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        if needs_more_input(ctx.input()) {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _context: &Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for ReplHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let mut ranges: Vec<(std::ops::Range<usize>, String)> = Vec::new();

        for token in TokenStream::new(line, true, SourceId::none()) {
            let colored = match &token.ty {
                TokenType::Lambda
                | TokenType::If
                | TokenType::Define
                | TokenType::Let
                | TokenType::Require => token.source().bright_purple(),
                TokenType::BooleanLiteral(_) => token.source().bright_magenta(),
                TokenType::Identifier(ident) if self.globals.contains(ident.as_ref()) => {
                    token.source().bright_blue()
                }
                TokenType::Number(_) => token.source().bright_yellow(),
                TokenType::StringLiteral(_) => token.source().bright_green(),
                _ => continue,
            };
            ranges.push((token.span().range(), colored.to_string()));
        }

        if ranges.is_empty() {
            return Cow::Borrowed(line);
        }

        let mut highlighted = line.to_owned();
        for (range, replacement) in ranges.into_iter().rev() {
            highlighted.replace_range(range, &replacement);
        }
        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, line: &str, _pos: usize, _forced: bool) -> bool {
        !line.is_empty()
    }
}

/// True while the input has unclosed parentheses or an unterminated token
fn needs_more_input(input: &str) -> bool {
    let mut balance = 0i32;
    let mut has_error = false;

    for token in TokenStream::new(input, true, SourceId::none()) {
        match &token.ty {
            TokenType::OpenParen(..) => balance += 1,
            TokenType::CloseParen(_) => balance -= 1,
            TokenType::Error => has_error = true,
            _ => {}
        }
    }

    balance > 0 || (has_error && balance >= 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper() -> ReplHelper {
        let names = ["spi-open", "spi-transfer", "spi-close", "bytes->hex"];
        ReplHelper::new(Arc::new(names.iter().map(|s| s.to_string()).collect()))
    }

    #[test]
    fn test_needs_more_input() {
        assert!(needs_more_input("(spi-open '()"));
        assert!(needs_more_input("(define dev\n  (spi-open"));
        assert!(!needs_more_input("(spi-open '())"));
        assert!(!needs_more_input("42"));
    }

    #[test]
    fn test_candidates_prefer_prefix() {
        let found = helper().candidates("spi-");
        assert_eq!(found, vec!["spi-close", "spi-open", "spi-transfer"]);

        let found = helper().candidates("hex");
        assert_eq!(found, vec!["bytes->hex"]);
    }

    #[test]
    fn test_highlight_plain_text_is_borrowed() {
        let h = helper();
        assert!(matches!(h.highlight("", 0), Cow::Borrowed(_)));
    }
}
