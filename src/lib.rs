//! Taskmailer: subject-matched AI tasks over email or the command line.

pub mod channels;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
