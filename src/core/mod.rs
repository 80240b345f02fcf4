//! Core resolution logic: references, documents, types, loading, linking, ordering, generation.

pub mod codegen;
pub mod document;
pub mod error;
pub mod linker;
pub mod parser;
pub mod reference;
pub mod resolver;
pub mod types;
pub mod visitor;
