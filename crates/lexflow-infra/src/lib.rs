//! Infrastructure layer for Lexflow: SQLite persistence, config loading,
//! and the OpenAI-compatible language model client.

pub mod config;
pub mod llm;
pub mod sqlite;
