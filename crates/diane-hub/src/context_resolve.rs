//! Context-selection precedence shared by every transport (spec.md §4.3):
//! query parameter → header → environment variable (stdio only) → persisted
//! default. Each transport extracts its own candidates and this module just
//! picks the first present one; the actual existence check happens in
//! `Dispatch::resolve_context`.

use diane_core::model::ContextSource;

pub const HEADER_NAME: &str = "X-Diane-Context";
pub const QUERY_PARAM: &str = "context";
pub const ENV_VAR: &str = "DIANE_CONTEXT";

#[derive(Debug, Clone)]
pub struct ContextCandidate {
    pub name: String,
    pub source: ContextSource,
}

/// Pick the highest-precedence candidate among the ones a transport was
/// able to extract. `None` means "fall back to the persisted default."
pub fn pick(
    query: Option<String>,
    header: Option<String>,
    env: Option<String>,
) -> Option<ContextCandidate> {
    if let Some(name) = non_empty(query) {
        return Some(ContextCandidate {
            name,
            source: ContextSource::Query,
        });
    }
    if let Some(name) = non_empty(header) {
        return Some(ContextCandidate {
            name,
            source: ContextSource::Header,
        });
    }
    if let Some(name) = non_empty(env) {
        return Some(ContextCandidate {
            name,
            source: ContextSource::Env,
        });
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_beats_header_beats_env() {
        let candidate = pick(
            Some("work".to_string()),
            Some("personal".to_string()),
            Some("other".to_string()),
        )
        .unwrap();
        assert_eq!(candidate.name, "work");
        assert!(matches!(candidate.source, ContextSource::Query));
    }

    #[test]
    fn header_used_when_no_query() {
        let candidate = pick(None, Some("personal".to_string()), Some("other".to_string())).unwrap();
        assert_eq!(candidate.name, "personal");
        assert!(matches!(candidate.source, ContextSource::Header));
    }

    #[test]
    fn none_present_falls_back_to_default() {
        assert!(pick(None, None, None).is_none());
    }

    #[test]
    fn empty_string_candidates_are_treated_as_absent() {
        assert!(pick(Some(String::new()), None, None).is_none());
    }
}
