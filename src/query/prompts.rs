use super::retrieval::Candidate;
use super::session::Turn;
use crate::types::{estimate_tokens, truncate_chars, truncate_to_token_limit};

/// Prior questions and answers are clipped in the history block
const HISTORY_QUESTION_CHARS: usize = 300;
const HISTORY_ANSWER_CHARS: usize = 600;

/// Fractions of the context budget the question and the history may take
const QUESTION_SHARE: usize = 8;
const HISTORY_SHARE: usize = 4;

/// Question and history fitted to the context budget, plus what is left for
/// retrieved candidates
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PromptFrame {
    pub question: String,
    pub history: String,
    pub remaining: usize,
}

impl PromptFrame {
    pub(crate) fn fit(question: &str, history: &[Turn], max_tokens: usize) -> Self {
        let question = truncate_to_token_limit(question.trim(), (max_tokens / QUESTION_SHARE).max(1));
        let history = render_history(history, max_tokens / HISTORY_SHARE);
        let used = estimate_tokens(&question) + estimate_tokens(&history);
        Self {
            question,
            history,
            remaining: max_tokens.saturating_sub(used),
        }
    }
}

/// Newest turns are kept first; the block lists the survivors oldest first
fn render_history(history: &[Turn], max_tokens: usize) -> String {
    let mut kept = Vec::new();
    let mut used = 0;
    for turn in history.iter().rev() {
        let line = format!(
            "Q: {}\nA: {}\n",
            truncate_chars(&turn.question, HISTORY_QUESTION_CHARS),
            truncate_chars(&turn.answer, HISTORY_ANSWER_CHARS)
        );
        let tokens = estimate_tokens(&line);
        if used + tokens > max_tokens {
            break;
        }
        used += tokens;
        kept.push(line);
    }
    kept.reverse();
    kept.concat()
}

pub(crate) fn build_query_prompt(frame: &PromptFrame, candidates: &[Candidate], note: Option<&str>) -> String {
    let mut prompt = String::from(
        "<ROLE>\nYou answer questions about a software repository using only the context provided.\n\
         If the context does not cover the question, say so plainly.\n\
         Refer to files by the bracketed ids shown in the context, e.g. [file:src/main.rs].\n</ROLE>\n\n",
    );

    prompt.push_str("<CONTEXT>\n");
    if let Some(note) = note {
        prompt.push_str(note);
        prompt.push('\n');
    }
    for candidate in candidates {
        prompt.push_str(candidate.context.trim_end());
        prompt.push_str("\n\n");
    }
    prompt.push_str("</CONTEXT>\n\n");

    if !frame.history.is_empty() {
        prompt.push_str("<HISTORY>\n");
        prompt.push_str(&frame.history);
        prompt.push_str("</HISTORY>\n\n");
    }

    prompt.push_str(&format!("<QUESTION>\n{}\n</QUESTION>\n", frame.question));
    prompt
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::constants::query::NO_CONTEXT_NOTE;
    use crate::types::NodeId;

    fn turn(question: &str, answer: &str) -> Turn {
        Turn {
            question: question.into(),
            answer: answer.into(),
            cited: vec![],
            grounded: true,
            asked_at: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_sections() {
        let candidate = Candidate {
            id: NodeId::file("a.py"),
            path: "a.py".into(),
            score: 1.0,
            context: "[file:a.py]\nSummary: things\n".into(),
            tokens: 5,
        };
        let frame = PromptFrame::fit("what is a?", &[], 1000);
        let prompt = build_query_prompt(&frame, &[candidate], None);
        assert!(prompt.contains("<CONTEXT>\n[file:a.py]"));
        assert!(!prompt.contains("<HISTORY>"));
        assert!(prompt.ends_with("<QUESTION>\nwhat is a?\n</QUESTION>\n"));

        let empty = build_query_prompt(&frame, &[], Some(NO_CONTEXT_NOTE));
        assert!(empty.contains(NO_CONTEXT_NOTE));
    }

    #[test]
    fn test_question_and_history_count_against_budget() {
        let long = "why ".repeat(2_000);
        let history: Vec<Turn> = (0..20).map(|i| turn(&format!("{} {}", i, long), &long)).collect();
        let frame = PromptFrame::fit(&long, &history, 800);

        assert!(estimate_tokens(&frame.question) <= 800 / QUESTION_SHARE + 8);
        assert!(estimate_tokens(&frame.history) <= 800 / HISTORY_SHARE);
        assert!(frame.remaining >= 800 / 2);
        assert!(frame.question.ends_with("[truncated]"));
    }

    #[test]
    fn test_history_drops_oldest_turns_first() {
        let history = vec![turn("first", &"a".repeat(590)), turn("second", "b"), turn("third", "c")];
        let frame = PromptFrame::fit("q", &history, 80);

        assert!(!frame.history.contains("first"));
        assert!(frame.history.starts_with("Q: second"));
        assert!(frame.history.contains("Q: third"));
    }
}
