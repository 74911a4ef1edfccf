//! Filter rule expansion.
//!
//! Sources carry rsync-style filter rules. Most rules are passed through to
//! the agent unchanged, but `merge <name>` and `. <name>` refer to a named
//! filter set kept by the broker and are expanded in place.

use std::collections::{HashMap, HashSet};

/// Verbs forwarded to rsync as-is.
const PASSTHROUGH_VERBS: &[&str] = &[
    "dir-merge", ":", "clear", "!", "exclude", "-", "include", "+", "hide", "H", "show", "S",
    "protect", "P", "risk", "R",
];

/// Verbs that pull in a named filter set.
const MERGE_VERBS: &[&str] = &["merge", "."];

/// Lookup of active filter sets by name.
pub trait FilterSetLookup {
    /// Rules of the active set named `name`, if any.
    fn filter_set(&self, name: &str) -> Option<Vec<String>>;
}

impl FilterSetLookup for HashMap<String, Vec<String>> {
    fn filter_set(&self, name: &str) -> Option<Vec<String>> {
        self.get(name).cloned()
    }
}

/// Expand `rules`, substituting named filter sets for merge rules.
///
/// Each set is expanded at most once per call, so reference cycles end.
/// Merge rules naming an unknown set and rules with unknown verbs are
/// dropped.
pub fn resolve_filters(rules: &[String], sets: &impl FilterSetLookup) -> Vec<String> {
    resolve_filters_with_seen(rules, sets, &mut HashSet::new())
}

/// Like [`resolve_filters`], sharing the set of already-expanded names.
pub fn resolve_filters_with_seen(
    rules: &[String],
    sets: &impl FilterSetLookup,
    seen: &mut HashSet<String>,
) -> Vec<String> {
    let mut out = Vec::new();
    for rule in rules {
        let rule = rule.trim();
        if rule.is_empty() {
            continue;
        }
        let (verb, arg) = match rule.split_once(char::is_whitespace) {
            Some((verb, arg)) => (verb, arg.trim()),
            None => (rule, ""),
        };

        if PASSTHROUGH_VERBS.contains(&verb) {
            out.push(rule.to_string());
        } else if MERGE_VERBS.contains(&verb) {
            if arg.is_empty() || !seen.insert(arg.to_string()) {
                continue;
            }
            match sets.filter_set(arg) {
                Some(nested) => out.extend(resolve_filters_with_seen(&nested, sets, seen)),
                None => tracing::debug!(filter_set = arg, "Dropping merge of unknown filter set"),
            }
        } else {
            tracing::debug!(rule, "Dropping filter rule with unknown verb");
        }
    }
    out
}
