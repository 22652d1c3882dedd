//! Answer prompt ("stuff" strategy: every retrieved page in one prompt)

use crate::knowledge::RetrievedDocument;

const ANSWER_TEMPLATE: &str = "你是一位臺灣旅遊專家，請基於以下資訊回答用戶的旅遊相關問題。
如果你不知道答案，請直接說你不知道，不要編造資訊。

資訊:
{context}

用戶問題: {question}

請提供詳細、有幫助且符合臺灣當地文化的回答，並盡可能給予具體的建議。
如果有多個選擇，請根據場景、用戶喜好和地點的受歡迎程度進行推薦。
";

/// Retrieved page contents separated by blank lines
pub fn format_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Placeholders are substituted in one pass over the template, so braces in
/// retrieved text or in the question are never expanded.
pub fn build_answer_prompt(documents: &[RetrievedDocument], question: &str) -> String {
    let context = format_context(documents);
    let mut prompt = String::with_capacity(ANSWER_TEMPLATE.len() + context.len() + question.len());
    let mut rest = ANSWER_TEMPLATE;

    while let Some(start) = rest.find('{') {
        prompt.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            prompt.push_str(&context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            prompt.push_str(question);
            rest = after;
        } else {
            prompt.push('{');
            rest = &tail[1..];
        }
    }
    prompt.push_str(rest);
    prompt
}

/// First `max_chars` characters, for log lines
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{DocumentMetadata, SearchMethod};

    fn retrieved(content: &str) -> RetrievedDocument {
        RetrievedDocument {
            content: content.to_string(),
            metadata: DocumentMetadata::default(),
            score: 0.0,
            method: SearchMethod::Vector,
        }
    }

    #[test]
    fn test_build_answer_prompt() {
        let prompt = build_answer_prompt(
            &[retrieved("名稱: 九份老街"), retrieved("名稱: 金瓜石")],
            "九份附近有什麼景點?",
        );
        assert!(prompt.contains("名稱: 九份老街\n\n名稱: 金瓜石"));
        assert!(prompt.contains("用戶問題: 九份附近有什麼景點?"));
        assert!(!prompt.contains("{context}"));
        assert!(!prompt.contains("{question}"));
    }

    #[test]
    fn test_placeholders_in_inputs_kept_literal() {
        let prompt = build_answer_prompt(&[retrieved("模板 {question} 範例")], "問 {context} 題");
        assert!(prompt.contains("模板 {question} 範例"));
        assert!(prompt.contains("用戶問題: 問 {context} 題"));
        assert_eq!(prompt.matches("問 {context} 題").count(), 1);
    }

    #[test]
    fn test_empty_context() {
        let prompt = build_answer_prompt(&[], "test");
        assert!(prompt.contains("資訊:\n\n"));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("阿里山", 10), "阿里山");
        assert_eq!(preview("阿里山日出", 3), "阿里山...");
    }
}
