//! JPQL text front end: lexer, parser and the parse tree handed to the
//! compiler.

pub mod ast;
mod lexer;
mod parser;

#[cfg(test)]
mod tests;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::parse;
