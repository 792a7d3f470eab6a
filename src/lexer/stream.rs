//! Cursor over a scanned token list, shared by every nested function compiler.

use crate::error::CompileError;

use super::token::{Token, TokenKind};

/// A forward-only cursor over tokens. The list always ends with `Eof`.
pub struct TokenStream {
    tokens: Vec<Token>,
    current: usize,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (line, pos) = tokens
                .last()
                .map(|t| (t.span.line, t.span.end))
                .unwrap_or((1, 0));
            tokens.push(Token::eof(pos, line, 0));
        }
        Self { tokens, current: 0 }
    }

    pub fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    pub fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    pub fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    pub fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    pub fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    /// Consume the next token if it has the given kind.
    pub fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Consume a token of the given kind or fail with `message` at the current token.
    pub fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, CompileError> {
        if self.check(kind) {
            Ok(self.advance().clone())
        } else {
            Err(self.error_at_current(message))
        }
    }

    pub fn error_at_current(&self, message: impl Into<String>) -> CompileError {
        let token = self.peek();
        CompileError::new(message, lexeme_of(token), token.span)
    }

    pub fn error_at_previous(&self, message: impl Into<String>) -> CompileError {
        let token = self.previous();
        CompileError::new(message, lexeme_of(token), token.span)
    }

    /// Discard tokens up to the next statement boundary: just past a semicolon,
    /// or in front of a statement-starting keyword.
    pub fn synchronize(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semicolon {
                return;
            }
            if self.peek().kind.starts_statement() {
                return;
            }
            self.advance();
        }
    }
}

fn lexeme_of(token: &Token) -> String {
    if token.kind == TokenKind::Eof {
        "end".to_string()
    } else {
        token.lexeme.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Scanner;

    fn stream(source: &str) -> TokenStream {
        TokenStream::new(Scanner::new(source).scan_tokens().unwrap())
    }

    #[test]
    fn test_consume_reports_current_token() {
        let mut tokens = stream("var 1");
        assert!(tokens.matches(TokenKind::Var));
        let err = tokens
            .consume(TokenKind::Identifier, "Expect variable name.")
            .unwrap_err();
        assert_eq!(err.message, "Expect variable name.");
        assert_eq!(err.lexeme, "1");
    }

    #[test]
    fn test_synchronize_stops_after_semicolon() {
        let mut tokens = stream("1 2 3; print 4;");
        tokens.synchronize();
        assert_eq!(tokens.peek().kind, TokenKind::Print);
    }

    #[test]
    fn test_synchronize_stops_before_keyword() {
        let mut tokens = stream("a b var c;");
        tokens.synchronize();
        assert_eq!(tokens.peek().kind, TokenKind::Var);
    }

    #[test]
    fn test_empty_stream_has_eof() {
        let tokens = TokenStream::new(Vec::new());
        assert!(tokens.is_at_end());
    }
}
