//! Lexer module: source text to tokens, and the cursor the compiler reads them through.

pub mod scanner;
pub mod stream;
pub mod token;

pub use scanner::Scanner;
pub use stream::TokenStream;
pub use token::{Token, TokenKind};
