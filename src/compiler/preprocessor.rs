//! Preprocessor stage.
//!
//! `#`-prefixed lines are lexed into preprocessor tokens and carried through
//! untouched; no directives are expanded yet. The stage exists so the
//! pipeline shape does not change when directives gain meaning.

use crate::error::Diagnostics;
use crate::lexer::token::{Token, TokenKind};

pub struct Preprocessor;

impl Preprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Pass-through over the token stream. Returns the number of directive
    /// lines seen.
    pub fn run(&self, tokens: &[Token], _diags: &mut Diagnostics) -> usize {
        tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Preprocessor)
            .count()
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::scanner::Scanner;

    #[test]
    fn counts_directives_and_changes_nothing() {
        let mut diags = Diagnostics::new();
        let tokens = Scanner::new("#define X 1\nint x;\n#pragma host\n").scan_tokens(&mut diags);
        let before = tokens.clone();
        let count = Preprocessor::new().run(&tokens, &mut diags);
        assert_eq!(count, 2);
        assert_eq!(tokens, before);
    }
}
