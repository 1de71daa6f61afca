//! Token definitions for the kitelang lexer.

use crate::span::Span;
use lazy_static::lazy_static;
use std::collections::HashMap;

/// All token kinds produced by the scanner.
///
/// Comments, preprocessor lines and end-of-line markers are real tokens; the
/// compiler's skippability filter strips them while walking the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    None,

    // Trivia
    Comment,
    Preprocessor,
    EndLine,

    // Identifiers and literals
    Identifier,
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    True,
    False,
    Null,

    // Type keywords
    Void,
    Bool,
    Char,
    Byte,
    Short,
    UShort,
    Int,
    UInt,
    Float,
    String,

    // Qualifiers
    Const,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Exclamation,
    Equals,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    And,
    Or,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseNot,
    ShiftLeft,
    ShiftRight,
    PlusPlus,
    MinusMinus,
    PlusEquals,
    MinusEquals,
    TimesEquals,
    DivideEquals,
    BitwiseAndEquals,
    BitwiseOrEquals,
    BitwiseXorEquals,
    QuestionMark,
    Colon,

    // Braces and punctuation
    LeftParen,
    RightParen,
    LeftCurly,
    RightCurly,
    LeftSquareBracket,
    RightSquareBracket,
    Dot,
    Comma,
    SemiColon,

    // Keywords
    Class,
    This,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Switch,
    Case,
    Default,
    Return,

    EndOfFile,
}

lazy_static! {
    /// Fixed keyword table consulted after an identifier has been scanned.
    static ref KEYWORDS: HashMap<&'static str, TokenKind> = {
        let mut map = HashMap::new();
        // Types
        map.insert("void", TokenKind::Void);
        map.insert("bool", TokenKind::Bool);
        map.insert("char", TokenKind::Char);
        map.insert("byte", TokenKind::Byte);
        map.insert("short", TokenKind::Short);
        map.insert("ushort", TokenKind::UShort);
        map.insert("int", TokenKind::Int);
        map.insert("uint", TokenKind::UInt);
        map.insert("float", TokenKind::Float);
        map.insert("string", TokenKind::String);
        // Keywords
        map.insert("const", TokenKind::Const);
        map.insert("null", TokenKind::Null);
        map.insert("NULL", TokenKind::Null);
        map.insert("nil", TokenKind::Null);
        map.insert("true", TokenKind::True);
        map.insert("false", TokenKind::False);
        map.insert("class", TokenKind::Class);
        map.insert("this", TokenKind::This);
        map.insert("if", TokenKind::If);
        map.insert("else", TokenKind::Else);
        map.insert("while", TokenKind::While);
        map.insert("for", TokenKind::For);
        map.insert("break", TokenKind::Break);
        map.insert("continue", TokenKind::Continue);
        map.insert("switch", TokenKind::Switch);
        map.insert("case", TokenKind::Case);
        map.insert("default", TokenKind::Default);
        map.insert("return", TokenKind::Return);
        map
    };
}

impl TokenKind {
    /// Look up the keyword kind for an identifier spelling.
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        KEYWORDS.get(ident).copied()
    }

    /// Printable spelling for expectation diagnostics.
    pub fn spelling(self) -> &'static str {
        match self {
            TokenKind::LeftParen => "(",
            TokenKind::RightParen => ")",
            TokenKind::LeftCurly => "{",
            TokenKind::RightCurly => "}",
            TokenKind::LeftSquareBracket => "[",
            TokenKind::RightSquareBracket => "]",
            TokenKind::Comma => ",",
            TokenKind::Dot => ".",
            TokenKind::SemiColon => ";",
            TokenKind::Colon => ":",
            TokenKind::Assign => "=",
            TokenKind::Identifier => "identifier",
            TokenKind::IntegerLiteral => "integer literal",
            TokenKind::EndOfFile => "end of file",
            _ => "token",
        }
    }

    /// Trivia stripped by the compiler while walking the stream.
    pub fn is_skippable(self) -> bool {
        matches!(
            self,
            TokenKind::Comment | TokenKind::Preprocessor | TokenKind::EndLine
        )
    }
}

/// A token with its kind, original text and source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }

    pub fn eof(span: Span) -> Self {
        Self::new(TokenKind::EndOfFile, "END_FILE", span)
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new(TokenKind::None, "", Span::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve() {
        assert_eq!(TokenKind::keyword("while"), Some(TokenKind::While));
        assert_eq!(TokenKind::keyword("ushort"), Some(TokenKind::UShort));
        assert_eq!(TokenKind::keyword("nil"), Some(TokenKind::Null));
        assert_eq!(TokenKind::keyword("whale"), None);
    }

    #[test]
    fn trivia_is_skippable() {
        assert!(TokenKind::Comment.is_skippable());
        assert!(TokenKind::EndLine.is_skippable());
        assert!(!TokenKind::Identifier.is_skippable());
    }
}
