//! Prompt construction for the two analysis phases, and the tolerant parser
//! that turns a phase-1 reply into a traversal order.

use std::collections::HashSet;
use std::sync::OnceLock;
use regex::Regex;

use super::super::model::{CallSite, Position};

/// Header the phase-1 prompt asks the model to put before its call ranking
pub const KEY_CALLS_MARKER: &str = "KEY CALLS:";

/// Phase 1: analyze a function from its text alone
pub fn preliminary_prompt(name: &str, source: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("Analyze the function `{}` shown below.\n\n", name));
    prompt.push_str("```\n");
    prompt.push_str(source);
    if !source.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n\n");

    prompt.push_str("Describe:\n");
    prompt.push_str("- What the function does and what it returns\n");
    prompt.push_str("- Its inputs, side effects and error conditions\n");
    prompt.push_str("- Which of the functions it calls are essential to understanding it\n\n");

    prompt.push_str(&format!(
        "End your answer with a line `{}` followed by the names of the called functions that matter most, \
one per line, most important first. Use bare function names without arguments.\n",
        KEY_CALLS_MARKER
    ));

    prompt
}

/// Phase 2: synthesize a function's own analysis with its callees' analyses
pub fn synthesis_prompt(name: &str, preliminary: &str, children: &[(String, String)]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "You previously analyzed the function `{}` on its own:\n\n",
        name
    ));
    prompt.push_str("=== FUNCTION ANALYSIS ===\n");
    prompt.push_str(preliminary.trim());
    prompt.push_str("\n=== END FUNCTION ANALYSIS ===\n\n");

    prompt.push_str("These are analyses of the functions it calls:\n\n");
    for (child_name, analysis) in children {
        prompt.push_str(&format!("=== CALLEE: {} ===\n", child_name));
        prompt.push_str(analysis.trim());
        prompt.push_str(&format!("\n=== END CALLEE: {} ===\n\n", child_name));
    }

    prompt.push_str(&format!(
        "Write a comprehensive summary of what `{}` accomplishes end to end, including the work \
delegated to its callees. Focus on behavior, data flow and failure modes. Do not repeat the \
callee analyses verbatim.\n",
        name
    ));

    prompt
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*(?:(?:::|\.|->)[A-Za-z_$][A-Za-z0-9_$]*)*")
            .expect("identifier regex is valid")
    })
}

fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[-*+•]|\d+[.)])\s*").expect("list marker regex is valid"))
}

fn is_section_header(line: &str) -> Option<&str> {
    let cleaned = line.trim().trim_start_matches('#').trim().trim_matches('*').trim();
    let lower = cleaned.to_lowercase();
    for header in ["key calls", "important calls"] {
        if lower.starts_with(header) {
            // Whatever follows "Key calls:" on the same line is itself a list
            let rest = cleaned.get(header.len()..).unwrap_or("");
            return Some(rest.trim_start_matches(|c: char| c == ':' || c == '*').trim());
        }
    }
    None
}

/// Pull a bare callee name out of one list item such as "2. `config::load()` - reads it"
fn item_name(item: &str) -> Option<String> {
    let item = list_marker_regex().replace(item.trim(), "");
    let item = item.trim().trim_start_matches(['`', '*', '"', '\'']);
    let found = identifier_regex().find(item)?;
    if found.start() != 0 {
        return None;
    }

    let last = found
        .as_str()
        .rsplit(|c| c == ':' || c == '.' || c == '>' || c == '-')
        .find(|s| !s.is_empty())?;
    if last.eq_ignore_ascii_case("none") {
        return None;
    }
    Some(last.to_string())
}

/// Parse the ranked call list out of a phase-1 reply.
///
/// A missing or malformed section yields an empty list; it only ever affects
/// traversal order.
pub fn parse_ranked_calls(analysis: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut in_section = false;

    for line in analysis.lines() {
        if let Some(inline) = is_section_header(line) {
            in_section = true;
            for part in inline.split(',') {
                if let Some(name) = item_name(part) {
                    names.push(name);
                }
            }
            continue;
        }
        if !in_section {
            continue;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            if names.is_empty() {
                continue;
            }
            break;
        }
        match item_name(trimmed) {
            Some(name) => names.push(name),
            None if list_marker_regex().is_match(trimmed) => {}
            None => break,
        }
    }

    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(n.clone()));
    names
}

/// Order call sites for traversal and keep at most `max_breadth` of them.
///
/// Duplicate targets collapse onto their first call site. For each ranked
/// name in order, matching sites are taken by exact name, then by
/// case-insensitive name; the unranked rest follow in source order.
pub fn order_call_sites(sites: Vec<CallSite>, ranked: &[String], max_breadth: usize) -> Vec<CallSite> {
    let mut sites = sites;
    sites.sort_by(|a, b| (a.site.line, a.site.column).cmp(&(b.site.line, b.site.column)));

    let mut seen_targets = HashSet::new();
    let mut remaining: Vec<CallSite> = sites
        .into_iter()
        .filter(|s| seen_targets.insert(s.target.clone()))
        .collect();

    let mut ordered = Vec::with_capacity(remaining.len());
    for name in ranked {
        let exact: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, s)| &s.callee == name)
            .map(|(i, _)| i)
            .collect();
        let indices = if exact.is_empty() {
            remaining
                .iter()
                .enumerate()
                .filter(|(_, s)| s.callee.eq_ignore_ascii_case(name))
                .map(|(i, _)| i)
                .collect()
        } else {
            exact
        };

        for i in indices {
            ordered.push(remaining[i].clone());
        }
        let taken: HashSet<Position> = ordered.iter().map(|s| s.target.clone()).collect();
        remaining.retain(|s| !taken.contains(&s.target));
    }
    ordered.extend(remaining);

    ordered.truncate(max_breadth);
    ordered
}
