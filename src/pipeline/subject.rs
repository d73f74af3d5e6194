//! Subject-line parser.
//!
//! Grammar (whitespace around the whole subject is ignored):
//!
//! ```text
//! [RE: | FW:] <task> [ "(" [api] [":" model] ")" ]
//! ```
//!
//! `task` and `api` are word tokens (letters, digits, underscore). `model`
//! runs to the closing parenthesis. Anything that does not fit is taken
//! verbatim as the task name with no overrides.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::pipeline::types::ParsedSubject;

static SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?i:RE:|FW:)\s*)?(\w+)(?:\s*\((\w*)(?::(.*))?\))?$")
        .expect("subject grammar is a valid regex")
});

/// Parse a raw subject line into task name and optional overrides.
///
/// Never fails: an unparseable subject comes back as the task name.
pub fn parse_subject(subject: &str) -> ParsedSubject {
    let trimmed = subject.trim();

    let Some(caps) = SUBJECT_RE.captures(trimmed) else {
        debug!(subject = %trimmed, "Subject does not match task grammar");
        return ParsedSubject::task(trimmed);
    };

    let non_empty = |idx: usize| {
        caps.get(idx)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let parsed = ParsedSubject {
        task_name: caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        api: non_empty(2),
        model: non_empty(3),
    };
    debug!(
        task = %parsed.task_name,
        api = ?parsed.api,
        model = ?parsed.model,
        "Parsed subject"
    );
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: &str) -> (String, Option<String>, Option<String>) {
        let p = parse_subject(s);
        (p.task_name, p.api, p.model)
    }

    #[test]
    fn api_and_model_override() {
        assert_eq!(
            triple("Summary (openai:gpt-4o-mini)"),
            (
                "Summary".into(),
                Some("openai".into()),
                Some("gpt-4o-mini".into())
            )
        );
    }

    #[test]
    fn reply_marker_is_stripped() {
        assert_eq!(triple("RE: Summary"), ("Summary".into(), None, None));
        assert_eq!(triple("re:Summary"), ("Summary".into(), None, None));
        assert_eq!(triple("Fw:   Summary"), ("Summary".into(), None, None));
    }

    #[test]
    fn task_with_space_falls_back_verbatim() {
        assert_eq!(triple("Hello World"), ("Hello World".into(), None, None));
    }

    #[test]
    fn punctuation_falls_back_verbatim() {
        assert_eq!(triple("Summary!"), ("Summary!".into(), None, None));
        assert_eq!(
            triple("RE: quick question?"),
            ("RE: quick question?".into(), None, None)
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(
            triple("   Translate (ollama)  "),
            ("Translate".into(), Some("ollama".into()), None)
        );
    }

    #[test]
    fn api_only_suffix() {
        assert_eq!(
            triple("Summary(openrouter)"),
            ("Summary".into(), Some("openrouter".into()), None)
        );
    }

    #[test]
    fn empty_parentheses_give_no_overrides() {
        assert_eq!(triple("Summary ()"), ("Summary".into(), None, None));
        assert_eq!(triple("Summary (openai:)"), ("Summary".into(), Some("openai".into()), None));
    }

    #[test]
    fn model_may_contain_punctuation() {
        assert_eq!(
            triple("Code (ollama:deepseek-coder:8b)"),
            (
                "Code".into(),
                Some("ollama".into()),
                Some("deepseek-coder:8b".into())
            )
        );
        assert_eq!(
            triple("Code (openrouter:openai/gpt-4o)"),
            (
                "Code".into(),
                Some("openrouter".into()),
                Some("openai/gpt-4o".into())
            )
        );
    }

    #[test]
    fn case_is_preserved() {
        assert_eq!(
            triple("RE: SUMMARY (OpenAI:GPT-4o)"),
            ("SUMMARY".into(), Some("OpenAI".into()), Some("GPT-4o".into()))
        );
    }

    #[test]
    fn empty_subject() {
        assert_eq!(triple(""), ("".into(), None, None));
        assert_eq!(triple("RE:"), ("RE:".into(), None, None));
    }

    #[test]
    fn reparse_of_rendered_subject_is_stable() {
        let subjects = [
            "Summary (openai:gpt-4o-mini)",
            "RE: Summary",
            "FW: Translate (ollama)",
            "Code (ollama:deepseek-coder:8b)",
            "Summary (:gpt-4o)",
            "Hello World",
            "Summary ()",
        ];
        for s in subjects {
            let first = parse_subject(s);
            let second = parse_subject(&first.to_subject());
            assert_eq!(first, second, "unstable parse for {s:?}");
        }
    }
}
