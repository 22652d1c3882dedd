//! Multi-query expansion
//!
//! The LLM rewrites the user question into a few alternative phrasings so
//! that retrieval is less sensitive to wording. Each non-empty line of the
//! reply is one query; list markers are stripped.

use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;

use crate::llm::LanguageModel;

/// Strips "1.", "2)", "3、", "-", "*", "•" list markers
const LIST_MARKER: &str = r"^\s*(?:\d+\s*[.)、:：]|[-*•])\s*";

pub fn expansion_prompt(question: &str, num_queries: usize) -> String {
    format!(
        "You are an AI language model assistant. Your task is to generate {n} \
         different versions of the given user question to retrieve relevant \
         documents from a vector database. By generating multiple perspectives \
         on the user question, your goal is to help the user overcome some of \
         the limitations of the distance-based similarity search. Provide these \
         alternative questions separated by newlines.\nOriginal question: {question}",
        n = num_queries,
        question = question
    )
}

pub struct QueryExpander {
    llm: Arc<dyn LanguageModel>,
    num_queries: usize,
    marker: Regex,
}

impl QueryExpander {
    /// `num_queries = 0` disables expansion
    pub fn new(llm: Arc<dyn LanguageModel>, num_queries: usize) -> Result<Self> {
        let marker = Regex::new(LIST_MARKER).context("Invalid list marker pattern")?;
        Ok(Self {
            llm,
            num_queries,
            marker,
        })
    }

    /// Original question first, then the unique alternatives.
    ///
    /// Never fails: an LLM error leaves only the original question.
    pub async fn expand(&self, question: &str) -> Vec<String> {
        let mut queries = vec![question.to_string()];
        if self.num_queries == 0 {
            return queries;
        }

        let reply = match self
            .llm
            .generate(&expansion_prompt(question, self.num_queries))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Query expansion failed, using original question: {:#}", e);
                return queries;
            }
        };

        for alternative in self.parse_queries(&reply) {
            if queries.len() > self.num_queries {
                break;
            }
            if !queries.contains(&alternative) {
                queries.push(alternative);
            }
        }

        tracing::info!("Generated queries: {:?}", queries);
        queries
    }

    pub fn parse_queries(&self, reply: &str) -> Vec<String> {
        reply
            .lines()
            .map(|line| self.marker.replace(line, "").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::tests::FakeLlm;

    #[test]
    fn test_parse_strips_numbering() {
        let expander = QueryExpander::new(Arc::new(FakeLlm::answering("")), 3).unwrap();
        let queries = expander.parse_queries("1. 九份有什麼好吃的?\n\n2) 九份美食推薦\n- 九份小吃\n  3、九份老街餐廳 ");
        assert_eq!(
            queries,
            vec!["九份有什麼好吃的?", "九份美食推薦", "九份小吃", "九份老街餐廳"]
        );
    }

    #[test]
    fn test_parse_keeps_leading_digits_in_text() {
        let expander = QueryExpander::new(Arc::new(FakeLlm::answering("")), 3).unwrap();
        assert_eq!(expander.parse_queries("101大樓怎麼去"), vec!["101大樓怎麼去"]);
    }

    #[tokio::test]
    async fn test_expand_keeps_original_first() {
        let llm = FakeLlm::answering("台北夜市推薦\n台北哪個夜市好逛\n台北夜市推薦\n士林夜市\n饒河夜市");
        let expander = QueryExpander::new(Arc::new(llm), 3).unwrap();

        let queries = expander.expand("台北夜市").await;
        assert_eq!(
            queries,
            vec!["台北夜市", "台北夜市推薦", "台北哪個夜市好逛", "士林夜市"]
        );
    }

    #[tokio::test]
    async fn test_expand_falls_back_on_error() {
        let expander = QueryExpander::new(Arc::new(FakeLlm::failing()), 3).unwrap();
        assert_eq!(expander.expand("花蓮景點").await, vec!["花蓮景點"]);
    }

    #[tokio::test]
    async fn test_expand_disabled() {
        let llm = Arc::new(FakeLlm::answering("unused"));
        let expander = QueryExpander::new(llm.clone(), 0).unwrap();
        assert_eq!(expander.expand("墾丁").await, vec!["墾丁"]);
        assert!(llm.prompts().is_empty());
    }
}
