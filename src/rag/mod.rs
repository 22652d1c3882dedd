//! RAG module - query expansion, prompt and the travel answer service

mod expansion;
mod prompt;
mod service;

pub use expansion::{expansion_prompt, QueryExpander};
pub use prompt::{build_answer_prompt, format_context, preview};
pub use service::{RagAnswer, RagError, TravelRagService};
