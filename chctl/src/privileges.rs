//! Privilege canonicalization.
//!
//! ClickHouse reports grants in a normalized form that rarely matches what a
//! declaration writes down: privilege types differ in case, column lists in
//! order and spacing, and `ALL` is expanded server-side into the concrete
//! privilege list of that release. To diff declared against observed state at
//! all, both sides are first folded into a canonical representation: an
//! order-independent, deduplicated, sorted list of `TYPE` / `TYPE(col, ...)`
//! strings. Equality between two canonical sets is then a plain set
//! comparison.

use std::collections::{BTreeMap, BTreeSet};

/// Privileges ClickHouse substitutes for `ALL`, by server version range.
///
/// This is a hand-maintained snapshot of backend behavior: if a release adds
/// new privileges under `ALL`, an outdated table silently under-grants until
/// updated. Deployments tracking a newer server can override the list via the
/// `all_privileges` configuration key instead of waiting for a new build.
const ALL_PRIVILEGES_20: &[&str] = &[
    "SHOW TABLES",
    "SHOW COLUMNS",
    "SHOW DICTIONARIES",
    "SELECT",
    "INSERT",
    "ALTER",
    "CREATE TABLE",
    "CREATE VIEW",
    "CREATE DICTIONARY",
    "DROP TABLE",
    "DROP VIEW",
    "DROP DICTIONARY",
    "TRUNCATE",
    "OPTIMIZE",
    "SYSTEM MERGES",
    "SYSTEM TTL MERGES",
    "SYSTEM FETCHES",
    "SYSTEM MOVES",
    "SYSTEM SENDS",
    "SYSTEM REPLICATION QUEUES",
    "SYSTEM DROP REPLICA",
    "SYSTEM SYNC REPLICA",
    "SYSTEM RESTART REPLICA",
    "SYSTEM FLUSH DISTRIBUTED",
    "dictGet",
];

/// The expansion list for the `ALL` sentinel.
///
/// Immutable once constructed; selected explicitly per server version (or
/// taken from configuration) rather than read from ambient global state.
#[derive(Debug, Clone)]
pub struct AllPrivileges {
    entries: Vec<String>,
}

impl AllPrivileges {
    /// Select the built-in expansion list for a server version.
    ///
    /// A single range is currently maintained; new entries are added here
    /// when the snapshot is refreshed against a newer release.
    pub fn for_version(_version: Option<&str>) -> Self {
        Self {
            entries: ALL_PRIVILEGES_20.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Use an operator-supplied expansion list from configuration.
    pub fn from_list(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

/// Normalize one privilege type token: uppercase, with the `dictGet`
/// case-sensitive exception.
fn normalize_type(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    if upper == "DICTGET" {
        "dictGet".to_string()
    } else {
        upper
    }
}

/// Split a raw privilege token into its type and optional column segment.
///
/// `INSERT(a, b)` -> (`INSERT`, Some(`a, b`)). Tokens are assumed
/// pre-validated: a column segment, when present, is parenthesized and
/// non-empty (enforced at the declaration boundary, not here).
fn split_token(token: &str) -> (String, Option<Vec<String>>) {
    match token.find('(') {
        Some(idx) => {
            let ty = normalize_type(&token[..idx]);
            let cols = token[idx..]
                .chars()
                .filter(|c| !matches!(c, '(' | ')') && !c.is_whitespace())
                .collect::<String>()
                .split(',')
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            (ty, Some(cols))
        }
        None => (normalize_type(token), None),
    }
}

/// Fold a raw privilege list into canonical form.
///
/// Rules, in order:
/// 1. tokens are trimmed;
/// 2. if any token is `ALL` (case-insensitive) the whole set is replaced by
///    the fixed expansion list;
/// 3. types are uppercased (`dictGet` keeps its backend spelling), column
///    segments are stripped of parens/whitespace and split on commas;
/// 4. a bare grant of a type discards any column-scoped entries of the same
///    type (a global grant subsumes column grants; mixing the two would
///    diff forever against the server's normalized report);
/// 5. columns are deduplicated and sorted within a type, and the final
///    entries are sorted lexicographically.
///
/// The result is order-independent and idempotent under re-canonicalization.
pub fn canonicalize_privileges(raw: &[String], all: &AllPrivileges) -> Vec<String> {
    if raw.iter().any(|p| p.trim().eq_ignore_ascii_case("ALL")) {
        let mut expanded: Vec<String> = all.entries().to_vec();
        expanded.sort();
        return expanded;
    }

    // First pass: types granted bare anywhere in the list win over columns.
    let mut bare: BTreeSet<String> = BTreeSet::new();
    for token in raw {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if !token.contains('(') {
            bare.insert(normalize_type(token));
        }
    }

    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for token in raw {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (ty, cols) = split_token(token);
        let entry = grouped.entry(ty.clone()).or_default();
        if let Some(cols) = cols {
            if !bare.contains(&ty) {
                entry.extend(cols);
            }
        }
    }

    grouped
        .into_iter()
        .map(|(ty, cols)| {
            if cols.is_empty() {
                ty
            } else {
                format!("{}({})", ty, cols.into_iter().collect::<Vec<_>>().join(", "))
            }
        })
        .collect()
}
