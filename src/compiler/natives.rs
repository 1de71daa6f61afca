//! Native (host) function registry and the declarations-file parser.
//!
//! The compiler only ever sees a native function as a name, a small integer
//! id, a return type and a parameter list; the host resolves the id to real
//! code at VM init. A fixed set of built-ins is always registered; a
//! declarations file (`-n`) can add host-specific entries of the form:
//!
//! ```text
//! [native 9] int readAdc(int channel);
//! ```

use crate::error::{DiagCode, Diagnostics, Stage};
use crate::lexer::scanner::{parse_integer, Scanner};
use crate::lexer::token::{Token, TokenKind};
use crate::value::DataType;
use indexmap::IndexMap;

/// Ids of the built-in natives every host is expected to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NativeId {
    Null = 0,
    Print,
    PrintLine,
    PrintInt,
    PrintFloat,
    PrintFormat,
    Clock,
    YieldFor,
    YieldUntil,
}

/// A registered native function.
#[derive(Debug, Clone)]
pub struct NativeFuncInfo {
    pub id: u32,
    pub name: String,
    pub return_type: DataType,
    pub args: Vec<DataType>,
}

impl NativeFuncInfo {
    pub fn new(id: u32, name: impl Into<String>, return_type: DataType, args: Vec<DataType>) -> Self {
        Self {
            id,
            name: name.into(),
            return_type,
            args,
        }
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Name-keyed registry, insertion-ordered so listings are stable.
#[derive(Debug, Clone)]
pub struct NativeRegistry {
    functions: IndexMap<String, NativeFuncInfo>,
}

impl NativeRegistry {
    /// Registry holding only the built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            functions: IndexMap::new(),
        };

        let builtins = [
            NativeFuncInfo::new(
                NativeId::Print as u32,
                "print",
                DataType::Void,
                vec![DataType::String],
            ),
            NativeFuncInfo::new(
                NativeId::PrintLine as u32,
                "println",
                DataType::Void,
                vec![DataType::String],
            ),
            NativeFuncInfo::new(
                NativeId::PrintInt as u32,
                "printi",
                DataType::Void,
                vec![DataType::Int32],
            ),
            NativeFuncInfo::new(
                NativeId::PrintFloat as u32,
                "printf",
                DataType::Void,
                vec![DataType::Float],
            ),
            NativeFuncInfo::new(NativeId::Clock as u32, "clock", DataType::Int32, vec![]),
            NativeFuncInfo::new(
                NativeId::YieldFor as u32,
                "yieldFor",
                DataType::Void,
                vec![DataType::Int32],
            ),
            NativeFuncInfo::new(
                NativeId::YieldUntil as u32,
                "yieldUntil",
                DataType::Void,
                vec![DataType::Int32, DataType::Int32],
            ),
        ];

        for func in builtins {
            registry.insert(func);
        }
        registry
    }

    pub fn insert(&mut self, func: NativeFuncInfo) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn resolve(&self, name: &str) -> Option<&NativeFuncInfo> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeFuncInfo> {
        self.functions.values()
    }
}

/// Parses a native-function declarations file into registry entries.
pub struct NativeFunctionParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl NativeFunctionParser {
    /// Parse `source` and merge the declarations into `registry`. Errors go
    /// to the diagnostics buffer; parsing continues at the next entry.
    pub fn parse(source: &str, registry: &mut NativeRegistry, diags: &mut Diagnostics) {
        if source.trim().is_empty() {
            return;
        }

        let tokens = Scanner::new(source).scan_tokens(diags);
        let mut parser = Self { tokens, pos: 0 };
        parser.skip_trivia();

        while !parser.at_end() {
            if let Some(func) = parser.parse_declaration(diags) {
                registry.insert(func);
            } else {
                // Recover at the next ';'.
                while !parser.at_end() && parser.current().kind != TokenKind::SemiColon {
                    parser.advance();
                }
                parser.advance();
            }
        }
    }

    fn parse_declaration(&mut self, diags: &mut Diagnostics) -> Option<NativeFuncInfo> {
        // [native <id>]
        self.expect(TokenKind::LeftSquareBracket, diags, "Expected \"[native]\" annotation.")?;
        let tag = self.expect(TokenKind::Identifier, diags, "Expected \"[native]\" annotation.")?;
        if tag.text != "native" {
            diags.error(
                Stage::Parser,
                DiagCode::SyntaxError,
                tag.span,
                "Expected \"[native]\" annotation.",
            );
            return None;
        }
        let id_token = self.expect(
            TokenKind::IntegerLiteral,
            diags,
            "Expected function ID after \"[native]\" annotation.",
        )?;
        let Some(id) = parse_integer(&id_token.text).filter(|v| *v >= 0) else {
            diags.error(
                Stage::Parser,
                DiagCode::SyntaxError,
                id_token.span,
                "Invalid function ID after \"[native]\" annotation.",
            );
            return None;
        };
        self.expect(
            TokenKind::RightSquareBracket,
            diags,
            "Expected \"]\" after \"[native]\" annotation.",
        )?;

        // <return-type> <name>(<params>);
        let Some(return_type) = self.match_type() else {
            diags.error(
                Stage::Parser,
                DiagCode::SyntaxError,
                self.current().span,
                "Expected return type for native function.",
            );
            return None;
        };
        let name = self.expect(TokenKind::Identifier, diags, "Expected function name.")?;
        self.expect(TokenKind::LeftParen, diags, "Expected \"(\" after function name.")?;

        let mut args = Vec::new();
        while !self.at_end() && self.current().kind != TokenKind::RightParen {
            let Some(param_type) = self.match_type() else {
                diags.error(
                    Stage::Parser,
                    DiagCode::SyntaxError,
                    self.current().span,
                    "Expected parameter type.",
                );
                return None;
            };
            // Parameter names are allowed and ignored.
            if self.current().kind == TokenKind::Identifier {
                self.advance();
            }
            args.push(param_type);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, diags, "Expected \")\" after parameters.")?;
        self.expect(
            TokenKind::SemiColon,
            diags,
            "Expected \";\" to end native function declaration.",
        )?;

        Some(NativeFuncInfo::new(id as u32, name.text, return_type, args))
    }

    fn match_type(&mut self) -> Option<DataType> {
        let data_type = match self.current().kind {
            TokenKind::Void => DataType::Void,
            TokenKind::Bool => DataType::Bool,
            TokenKind::Char => DataType::Int8,
            TokenKind::Byte => DataType::Uint8,
            TokenKind::Short => DataType::Int16,
            TokenKind::UShort => DataType::Uint16,
            TokenKind::Int => DataType::Int32,
            TokenKind::UInt => DataType::Uint32,
            TokenKind::Float => DataType::Float,
            TokenKind::String => DataType::String,
            _ => return None,
        };
        self.advance();
        Some(data_type)
    }

    // ===== Cursor =====

    fn current(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| self.tokens.last().expect("token stream has EOF"))
    }

    fn at_end(&self) -> bool {
        self.current().kind == TokenKind::EndOfFile || self.pos >= self.tokens.len()
    }

    fn advance(&mut self) {
        self.pos += 1;
        self.skip_trivia();
    }

    fn skip_trivia(&mut self) {
        while self.pos < self.tokens.len() && self.tokens[self.pos].kind.is_skippable() {
            self.pos += 1;
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.current().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, diags: &mut Diagnostics, message: &str) -> Option<Token> {
        let token = self.current().clone();
        if token.kind != kind {
            diags.error(Stage::Parser, DiagCode::SyntaxError, token.span, message);
            return None;
        }
        self.advance();
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = NativeRegistry::with_builtins();
        assert_eq!(registry.resolve("printi").unwrap().id, NativeId::PrintInt as u32);
        assert_eq!(registry.resolve("clock").unwrap().args.len(), 0);
        assert_eq!(registry.resolve("yieldUntil").unwrap().args.len(), 2);
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn parses_declaration_file() {
        let mut registry = NativeRegistry::with_builtins();
        let mut diags = Diagnostics::new();
        let source = "\
// Host IO
[native 9] int readAdc(int channel);
[native 10] void writeDac(int channel, float value);
[native 11] float readTemp();
";
        NativeFunctionParser::parse(source, &mut registry, &mut diags);
        assert!(!diags.has_errors());

        let read_adc = registry.resolve("readAdc").unwrap();
        assert_eq!(read_adc.id, 9);
        assert_eq!(read_adc.return_type, DataType::Int32);
        assert_eq!(read_adc.args, vec![DataType::Int32]);

        let write_dac = registry.resolve("writeDac").unwrap();
        assert_eq!(write_dac.args, vec![DataType::Int32, DataType::Float]);
        assert_eq!(registry.resolve("readTemp").unwrap().args.len(), 0);
    }

    #[test]
    fn bad_annotation_is_an_error() {
        let mut registry = NativeRegistry::with_builtins();
        let mut diags = Diagnostics::new();
        NativeFunctionParser::parse("[host 9] int x();", &mut registry, &mut diags);
        assert!(diags.has_errors());
        assert!(registry.resolve("x").is_none());
    }

    #[test]
    fn recovers_after_bad_entry() {
        let mut registry = NativeRegistry::with_builtins();
        let mut diags = Diagnostics::new();
        let source = "[native] int broken();\n[native 12] int ok();";
        NativeFunctionParser::parse(source, &mut registry, &mut diags);
        assert!(diags.has_errors());
        assert_eq!(registry.resolve("ok").unwrap().id, 12);
    }
}
