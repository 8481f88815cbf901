//! # Cypher Language
//!
//! The native statement language tiergraph speaks to graph stores.
//! Statements are built as an AST ([`ast`]) and turned into text by
//! [`render`]; values always travel separately as bound parameters.

pub mod ast;
pub mod render;

pub use render::render;
