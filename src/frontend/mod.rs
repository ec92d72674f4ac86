//! Frontend module - Lexer, Parser, AST

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

use crate::utils::Result;

/// Tokenize and parse a whole module
pub fn parse_source(source: &str, file: &str) -> Result<ast::Module> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(tokens).parse_module(file)
}
