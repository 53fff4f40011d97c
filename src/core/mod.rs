pub mod bi;
pub mod cache;
pub mod config;
pub mod context_docs;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod llm;
pub mod orchestrator;
pub mod prompts;
pub mod terminal;
