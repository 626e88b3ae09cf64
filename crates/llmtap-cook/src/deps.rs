//! Dependency forest reconstruction over normalized requests.
//!
//! Conversations grow by appending: a follow-up request resends everything
//! the previous exchange contained plus a new tail. The analyzer exploits
//! that to recover the implicit parent-of forest:
//!
//! 1. Prefix pass — a candidate whose `request_messages + response_messages`
//!    is an exact prefix of the child's `request_messages` is the parent
//!    (most recent candidate wins).
//! 2. Similarity pass — when nothing matches exactly (rewinds, edited
//!    history), fall back to Levenshtein distance over the id sequences,
//!    with a penalty for tool-set differences. Weak best matches below the
//!    root threshold become new roots instead of forced links.
//!
//! Model equality is a hard filter throughout: two conversations on
//! different models are never linked.

use std::collections::HashSet;

use crate::bundle::RequestNode;

/// Score penalty per tool id present in only one of the two requests.
const TOOL_PENALTY: f64 = 0.5;

/// Slack above half the shorter sequence before a fallback match is
/// rejected as a root.
const ROOT_THRESHOLD_SLACK: usize = 2;

/// Sort requests by timestamp and assign every `parent_id`.
///
/// The result is a forest: each node gains at most one parent, and a parent
/// always has a strictly earlier timestamp and the same model.
pub fn link_requests(requests: &mut Vec<RequestNode>) {
    requests.sort_by_key(|r| r.timestamp);

    for child_idx in 0..requests.len() {
        let (earlier, rest) = requests.split_at_mut(child_idx);
        let child = &mut rest[0];
        child.parent_id = find_parent(earlier, child);
    }
}

fn find_parent(earlier: &[RequestNode], child: &RequestNode) -> Option<String> {
    let eligible = |p: &RequestNode| p.model == child.model && p.timestamp < child.timestamp;

    // Prefix pass: most recent candidate first. An empty expected
    // continuation would trivially prefix everything, so it never matches.
    for parent in earlier.iter().rev().filter(|p| eligible(p)) {
        let prefix = expected_continuation(parent);
        if !prefix.is_empty() && is_prefix(&prefix, &child.request_messages) {
            return Some(parent.id.clone());
        }
    }

    // Similarity pass: Levenshtein over id sequences plus a tool-set
    // penalty. Iterating most recent first with a strict comparison keeps
    // ties resolved in favor of the closest timestamp.
    let mut best: Option<(f64, usize, usize, &RequestNode)> = None;
    for parent in earlier.iter().rev().filter(|p| eligible(p)) {
        let prefix = expected_continuation(parent);
        let edit = levenshtein(&prefix, &child.request_messages);
        let penalty = TOOL_PENALTY * tool_set_difference(parent, child) as f64;
        let score = -(edit as f64 + penalty);
        if best.is_none_or(|(best_score, ..)| score > best_score) {
            best = Some((score, edit, prefix.len(), parent));
        }
    }

    let (_, edit, prefix_len, parent) = best?;
    let floor = prefix_len.min(child.request_messages.len()) / 2 + ROOT_THRESHOLD_SLACK;
    if edit > floor {
        return None;
    }
    Some(parent.id.clone())
}

/// What a direct continuation of `parent` would start with.
fn expected_continuation(parent: &RequestNode) -> Vec<String> {
    let mut ids = parent.request_messages.clone();
    ids.extend(parent.response_messages.iter().cloned());
    ids
}

fn is_prefix(prefix: &[String], sequence: &[String]) -> bool {
    sequence.len() >= prefix.len() && sequence[..prefix.len()] == *prefix
}

fn tool_set_difference(a: &RequestNode, b: &RequestNode) -> usize {
    let a_tools: HashSet<&String> = a.tools.iter().collect();
    let b_tools: HashSet<&String> = b.tools.iter().collect();
    a_tools.symmetric_difference(&b_tools).count()
}

/// Levenshtein distance over id sequences: unit-cost insert, delete, and
/// substitute, with whole ids as the comparison unit.
fn levenshtein(a: &[String], b: &[String]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, a_id) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_id) in b.iter().enumerate() {
            let substitute = previous[j] + usize::from(a_id != b_id);
            current[j + 1] = substitute.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn node(
        id: &str,
        timestamp: u64,
        request: &[&str],
        response: &[&str],
        model: &str,
    ) -> RequestNode {
        RequestNode {
            id: id.into(),
            parent_id: None,
            timestamp,
            request_messages: ids(request),
            response_messages: ids(response),
            model: model.into(),
            tools: Vec::new(),
            duration_ms: 0,
        }
    }

    fn parent_of<'a>(requests: &'a [RequestNode], id: &str) -> Option<&'a str> {
        requests
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.parent_id.as_deref())
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein(&ids(&[]), &ids(&[])), 0);
        assert_eq!(levenshtein(&ids(&["a"]), &ids(&[])), 1);
        assert_eq!(levenshtein(&ids(&["a", "b"]), &ids(&["a", "b"])), 0);
        assert_eq!(levenshtein(&ids(&["a", "b", "c"]), &ids(&["a", "x", "c"])), 1);
        assert_eq!(levenshtein(&ids(&["a", "b"]), &ids(&["b", "a", "b"])), 1);
    }

    #[test]
    fn test_linear_conversation() {
        let mut requests = vec![
            node("r1", 1, &["u1"], &["a1"], "gpt-4"),
            node("r2", 2, &["u1", "a1", "u2"], &["a2"], "gpt-4"),
            node("r3", 3, &["u1", "a1", "u2", "a2", "u3"], &["a3"], "gpt-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r1"), None);
        assert_eq!(parent_of(&requests, "r2"), Some("r1"));
        assert_eq!(parent_of(&requests, "r3"), Some("r2"));
    }

    #[test]
    fn test_rewind_branches_from_earlier_request() {
        // r3 continues r1, not r2: the user rewound past r2's exchange.
        let mut requests = vec![
            node("r1", 1, &["u1"], &["a1"], "gpt-4"),
            node("r2", 2, &["u1", "a1", "u2"], &["a2"], "gpt-4"),
            node("r3", 3, &["u1", "a1", "u2b"], &["a3"], "gpt-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r3"), Some("r1"));
    }

    #[test]
    fn test_cross_model_split() {
        let mut requests = vec![
            node("r1", 1, &["u1"], &["a1"], "gpt-4"),
            node("r2", 2, &["u1", "a1", "u2"], &["a2"], "claude-sonnet-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r2"), None, "model mismatch must force a root");
    }

    #[test]
    fn test_prefix_pass_prefers_most_recent() {
        // Both r1 and r2 are exact prefixes of r3; r2 is closer in time.
        let mut requests = vec![
            node("r1", 1, &["u1"], &[], "gpt-4"),
            node("r2", 2, &["u1", "u2"], &[], "gpt-4"),
            node("r3", 3, &["u1", "u2", "u3"], &[], "gpt-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r3"), Some("r2"));
    }

    #[test]
    fn test_similarity_fallback_links_edited_history() {
        // r2 resends r1's conversation with one message swapped out, so the
        // prefix pass misses but the edit distance is small.
        let mut requests = vec![
            node("r1", 1, &["u1", "a1", "u2", "a2"], &["a3"], "gpt-4"),
            node(
                "r2",
                2,
                &["u1", "a1", "u2-edited", "a2", "a3", "u3"],
                &[],
                "gpt-4",
            ),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r2"), Some("r1"));
    }

    #[test]
    fn test_unrelated_conversation_becomes_root() {
        let mut requests = vec![
            node("r1", 1, &["u1", "a1", "u2"], &["a2"], "gpt-4"),
            node("r2", 2, &["x1", "x2", "x3"], &[], "gpt-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r2"), None, "weak match must not be forced");
    }

    #[test]
    fn test_tool_penalty_disambiguates_similar_candidates() {
        // Two equally distant candidates; the older one shares the child's
        // tools, so the tool penalty must override the recency tie-break.
        let mut r1 = node("r1", 1, &["u1", "a1"], &[], "gpt-4");
        r1.tools = ids(&["t-bash"]);
        let mut r2 = node("r2", 2, &["u2", "a2"], &[], "gpt-4");
        r2.tools = ids(&["t-search", "t-browse"]);
        let mut child = node("r3", 3, &["u3", "a3", "u4"], &[], "gpt-4");
        child.tools = ids(&["t-bash"]);

        let mut requests = vec![r1, r2, child];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r3"), Some("r1"));
    }

    #[test]
    fn test_parent_timestamp_strictly_earlier() {
        let mut requests = vec![
            node("r1", 5, &["u1"], &["a1"], "gpt-4"),
            node("r2", 5, &["u1", "a1", "u2"], &[], "gpt-4"),
        ];
        link_requests(&mut requests);
        assert_eq!(parent_of(&requests, "r2"), None, "equal timestamps cannot link");
    }

    #[test]
    fn test_result_is_a_forest() {
        let mut requests = vec![
            node("r1", 1, &["u1"], &["a1"], "gpt-4"),
            node("r2", 2, &["u1", "a1", "u2"], &["a2"], "gpt-4"),
            node("r3", 3, &["u1", "a1", "u2b"], &["a3"], "gpt-4"),
            node("r4", 4, &["u1", "a1", "u2", "a2", "u3"], &[], "gpt-4"),
        ];
        link_requests(&mut requests);

        let by_id: std::collections::HashMap<&str, &RequestNode> =
            requests.iter().map(|r| (r.id.as_str(), r)).collect();
        for request in &requests {
            // Walk to the root; a cycle would never terminate within n hops.
            let mut hops = 0;
            let mut cursor = request;
            while let Some(parent_id) = cursor.parent_id.as_deref() {
                let parent = by_id[parent_id];
                assert!(parent.timestamp < cursor.timestamp);
                assert_eq!(parent.model, cursor.model);
                cursor = parent;
                hops += 1;
                assert!(hops <= requests.len(), "cycle detected");
            }
        }
    }
}
