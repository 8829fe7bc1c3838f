//! Query preprocessing for better search recall.
//!
//! Cleans a free-text query into FTS5-safe terms, tokenises identifier
//! spellings (camelCase, snake_case), expands common code abbreviations,
//! and builds the prefix-match OR expression handed to the full-text index.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::collections::HashSet;

/// A processed query with its term variations.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedQuery {
    /// Original query text
    pub original: String,
    /// Cleaned terms, lowercased, length-filtered
    pub terms: Vec<String>,
    /// Terms plus identifier tokens and abbreviation expansions, deduplicated
    /// preserving first occurrence
    pub expanded_terms: Vec<String>,
    /// FTS expression: `t1* OR t2* OR … OR tn*`; empty for an empty query
    pub fts_query: String,
}

/// Common code abbreviations and their expansions.
static ABBREVIATIONS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let entries: &[(&str, &[&str])] = &[
        ("alloc", &["allocate", "allocation", "allocator"]),
        ("kalloc", &["kernel_allocate", "kernel_allocation"]),
        ("kfree", &["kernel_free", "free"]),
        ("mem", &["memory"]),
        ("ptr", &["pointer"]),
        ("fn", &["function"]),
        ("func", &["function"]),
        ("proc", &["process", "procedure"]),
        ("buf", &["buffer"]),
        ("cfg", &["config", "configuration"]),
        ("ctx", &["context"]),
        ("init", &["initialize", "initialization"]),
        ("sync", &["synchronize", "synchronization"]),
        ("async", &["asynchronous"]),
        ("impl", &["implementation", "implement"]),
        ("msg", &["message"]),
        ("err", &["error"]),
        ("val", &["value"]),
        ("idx", &["index"]),
        ("len", &["length"]),
        ("num", &["number"]),
        ("str", &["string"]),
        ("char", &["character"]),
        ("tmp", &["temporary"]),
        ("temp", &["temporary"]),
        ("info", &["information"]),
        ("desc", &["description", "descriptor"]),
        ("def", &["definition", "default"]),
        ("ref", &["reference"]),
        ("src", &["source"]),
        ("dst", &["destination"]),
        ("prev", &["previous"]),
        ("cur", &["current"]),
        ("max", &["maximum"]),
        ("min", &["minimum"]),
        ("avg", &["average"]),
        ("dev", &["device", "development"]),
        ("env", &["environment"]),
        ("arg", &["argument"]),
        ("param", &["parameter"]),
        ("ret", &["return"]),
        ("res", &["result", "response", "resource"]),
        ("req", &["request", "requirement"]),
        ("resp", &["response"]),
        ("ack", &["acknowledge"]),
        ("nack", &["not_acknowledge"]),
        ("irq", &["interrupt", "interrupt_request"]),
        ("pid", &["process_id", "process_identifier"]),
        ("tid", &["thread_id", "thread_identifier"]),
        ("fd", &["file_descriptor"]),
        ("io", &["input_output"]),
        ("cpu", &["processor", "central_processing_unit"]),
        ("gpu", &["graphics_processing_unit"]),
        ("ram", &["random_access_memory", "memory"]),
        ("rom", &["read_only_memory"]),
        ("tlb", &["translation_lookaside_buffer"]),
        ("mmu", &["memory_management_unit"]),
        ("pfn", &["page_frame_number"]),
        ("va", &["virtual_address"]),
        ("pa", &["physical_address"]),
    ];
    entries.iter().copied().collect()
});

/// Split camelCase and PascalCase identifiers into lowercased words.
///
/// An all-uppercase token is treated as a single word.
fn split_camel_case(text: &str) -> Vec<String> {
    let has_cased = text.chars().any(|c| c.is_alphabetic());
    if has_cased
        && text
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(|c| c.is_uppercase())
    {
        return vec![text.to_lowercase()];
    }

    let mut words = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words.into_iter().map(|w| w.to_lowercase()).collect()
}

/// Split snake_case identifiers into lowercased words.
fn split_snake_case(text: &str) -> Vec<String> {
    text.split('_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Tokenise a code identifier into constituent words.
///
/// Handles camelCase, PascalCase, snake_case and SCREAMING_SNAKE_CASE;
/// single all-lowercase words pass through unchanged.
pub fn tokenize_identifier(identifier: &str) -> Vec<String> {
    if identifier.contains('_') {
        return split_snake_case(identifier);
    }

    if identifier.chars().skip(1).any(|c| c.is_uppercase()) || {
        // PascalCase: leading uppercase followed by lowercase
        let mut chars = identifier.chars();
        matches!(
            (chars.next(), chars.next()),
            (Some(first), Some(second)) if first.is_uppercase() && second.is_lowercase()
        )
    } {
        return split_camel_case(identifier);
    }

    vec![identifier.to_lowercase()]
}

/// Processes search queries for better recall in code search.
#[derive(Debug, Clone)]
pub struct QueryProcessor {
    use_expansion: bool,
    use_code_tokenization: bool,
    min_term_length: usize,
}

impl Default for QueryProcessor {
    fn default() -> Self {
        Self {
            use_expansion: true,
            use_code_tokenization: true,
            min_term_length: 2,
        }
    }
}

impl QueryProcessor {
    pub fn new(use_expansion: bool, use_code_tokenization: bool, min_term_length: usize) -> Self {
        Self {
            use_expansion,
            use_code_tokenization,
            min_term_length,
        }
    }

    /// Process a raw query.
    ///
    /// Steps:
    /// 1. Strip FTS syntax characters and non-word punctuation to spaces
    /// 2. Split on whitespace, drop terms below `min_term_length`
    /// 3. Tokenise identifier spellings (if enabled)
    /// 4. Expand abbreviations (if enabled)
    /// 5. Deduplicate preserving order
    /// 6. Build the `t* OR …` FTS expression
    pub fn process(&self, query: &str) -> ProcessedQuery {
        if query.trim().is_empty() {
            return ProcessedQuery {
                original: query.to_string(),
                terms: Vec::new(),
                expanded_terms: Vec::new(),
                fts_query: String::new(),
            };
        }

        let cleaned = clean_query(query);

        let mut terms = Vec::new();
        let mut expanded_terms = Vec::new();

        for raw_term in cleaned.split_whitespace() {
            let term_lower = raw_term.to_lowercase();
            if term_lower.chars().count() < self.min_term_length {
                continue;
            }

            terms.push(term_lower.clone());
            expanded_terms.push(term_lower.clone());

            // Identifier tokenisation runs on the original spelling so case
            // boundaries are still visible.
            if self.use_code_tokenization {
                let tokens = tokenize_identifier(raw_term);
                if tokens.len() > 1 {
                    expanded_terms.extend(tokens);
                }
            }

            if self.use_expansion {
                if let Some(expansions) = ABBREVIATIONS.get(term_lower.as_str()) {
                    expanded_terms.extend(expansions.iter().map(|s| s.to_string()));
                }
            }
        }

        let mut seen = HashSet::new();
        expanded_terms.retain(|t| seen.insert(t.clone()));

        let fts_query = build_fts_query(&expanded_terms);

        ProcessedQuery {
            original: query.to_string(),
            terms,
            expanded_terms,
            fts_query,
        }
    }
}

/// Replace FTS5 syntax characters and non-word punctuation with spaces.
///
/// Alphanumerics and underscores survive; everything else (including
/// `* ^ " ( ) - |`, which would alter FTS parsing) becomes whitespace, so
/// the store never sees a malformed match expression.
fn clean_query(query: &str) -> String {
    let replaced: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the FTS expression: each term prefix-matched, OR-disjuncted.
fn build_fts_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("{t}*"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn camel_case_splits_at_uppercase_boundaries() {
        assert_eq!(split_camel_case("pageTableWalk"), vec!["page", "table", "walk"]);
        assert_eq!(split_camel_case("KallocMemory"), vec!["kalloc", "memory"]);
    }

    #[test]
    fn screaming_snake_is_treated_as_snake() {
        assert_eq!(
            tokenize_identifier("PAGE_TABLE_WALK"),
            vec!["page", "table", "walk"]
        );
    }

    #[test]
    fn snake_case_splits_on_underscores() {
        assert_eq!(
            tokenize_identifier("page_table_walk"),
            vec!["page", "table", "walk"]
        );
    }

    #[test]
    fn plain_lowercase_passes_through() {
        assert_eq!(tokenize_identifier("kalloc"), vec!["kalloc"]);
    }

    #[test]
    fn all_uppercase_single_word_lowers() {
        assert_eq!(tokenize_identifier("TLB"), vec!["tlb"]);
    }

    #[test]
    fn plain_query_builds_wildcard_or_expression() {
        let processed = QueryProcessor::default().process("page table walk");
        assert_eq!(processed.fts_query, "page* OR table* OR walk*");
        assert_eq!(processed.terms, vec!["page", "table", "walk"]);
    }

    #[test]
    fn camel_case_query_expands_terms() {
        let processed = QueryProcessor::default().process("pageTableWalk");
        for term in ["page", "table", "walk"] {
            assert!(
                processed.expanded_terms.contains(&term.to_string()),
                "missing {term} in {:?}",
                processed.expanded_terms
            );
            assert!(processed.fts_query.contains(&format!("{term}*")));
        }
    }

    #[test]
    fn abbreviations_expand() {
        let processed = QueryProcessor::default().process("ctx alloc");
        assert!(processed.expanded_terms.contains(&"context".to_string()));
        assert!(processed.expanded_terms.contains(&"allocator".to_string()));
    }

    #[test]
    fn expansion_can_be_disabled() {
        let processed = QueryProcessor::new(false, true, 2).process("ctx");
        assert_eq!(processed.expanded_terms, vec!["ctx"]);
    }

    #[test]
    fn fts_special_characters_are_stripped() {
        let processed = QueryProcessor::default().process("\"weird\" (query) -with | stars*^");
        assert!(!processed.fts_query.contains('"'));
        assert!(!processed.fts_query.contains('('));
        assert!(!processed.fts_query.contains('|'));
        // Only the term-suffix wildcards remain.
        for part in processed.fts_query.split(" OR ") {
            assert!(part.ends_with('*'));
            assert_eq!(part.matches('*').count(), 1);
        }
    }

    #[test]
    fn short_terms_are_dropped() {
        let processed = QueryProcessor::default().process("a page");
        assert_eq!(processed.terms, vec!["page"]);
    }

    #[test]
    fn empty_query_yields_empty_expression() {
        let processed = QueryProcessor::default().process("   ");
        assert!(processed.terms.is_empty());
        assert!(processed.fts_query.is_empty());
    }

    #[test]
    fn duplicates_are_removed_preserving_order() {
        let processed = QueryProcessor::default().process("walk walk page");
        assert_eq!(processed.expanded_terms, vec!["walk", "page"]);
        assert_eq!(processed.fts_query, "walk* OR page*");
    }

    #[test]
    fn reprocessing_own_output_preserves_terms() {
        // Feeding the expression back through the processor keeps every
        // original term intact (already cleaned and lowercased); only the
        // wildcard markers are stripped away.
        let first = QueryProcessor::new(false, true, 2).process("page table walk");
        let second = QueryProcessor::new(false, true, 2).process(&first.fts_query);
        for term in &first.terms {
            assert!(second.terms.contains(term), "lost term {term}");
            assert!(second.fts_query.contains(&format!("{term}*")));
        }
    }
}
