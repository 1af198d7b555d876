//! Rule derivation for SQL generation prompts.
//!
//! Every prompt carries a base rule set; extra rules are appended when
//! the user's question mentions date, aggregation, or ordering
//! vocabulary. Matching is case-insensitive substring matching, so
//! "Yearly" triggers the date rule via "year".

/// Rules included in every generation prompt, in order.
pub const BASE_RULES: [&str; 5] = [
    "Use ONLY tables and columns from the schema",
    "Follow the exact schema for names",
    "Incorporate insights from additional context when available",
    "Ensure proper JOIN conditions",
    "Handle NULL values appropriately",
];

const DATE_KEYWORDS: &[&str] = &[
    "date", "year", "month", "day", "between", "since", "before", "after",
];
const GROUP_KEYWORDS: &[&str] = &["group", "average", "sum", "count", "total", "aggregate"];
const SORT_KEYWORDS: &[&str] = &[
    "sort", "order", "rank", "top", "bottom", "highest", "lowest",
];

const DATE_RULE: &str =
    "Use appropriate date functions for filtering (e.g., EXTRACT, DATE_TRUNC)";
const GROUP_RULE: &str =
    "Use GROUP BY with appropriate aggregate functions (COUNT, SUM, AVG)";
const SORT_RULE: &str = "Use ORDER BY with appropriate sorting direction (ASC/DESC)";

/// Conditional rules checked in date, group, sort order.
const CONDITIONAL_RULES: &[(&[&str], &str)] = &[
    (DATE_KEYWORDS, DATE_RULE),
    (GROUP_KEYWORDS, GROUP_RULE),
    (SORT_KEYWORDS, SORT_RULE),
];

/// Derive the rule list for one question. Base rules always come
/// first; each conditional rule is appended at most once.
pub fn derive_rules(question: &str) -> Vec<&'static str> {
    let lowered = question.to_lowercase();
    let mut rules: Vec<&'static str> = BASE_RULES.to_vec();
    for (keywords, rule) in CONDITIONAL_RULES {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            rules.push(rule);
        }
    }
    rules
}
