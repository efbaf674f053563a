// SPDX-License-Identifier: Apache-2.0

/// Decides whether a log line matches one of a set of keywords.
pub trait KeywordFilter: Send + Sync {
    /// Return the first keyword found in `line`, if any.
    fn find<'k>(&self, line: &str, keywords: &'k [String]) -> Option<&'k str>;
}

/// Plain substring search. Empty keywords never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringFilter;

impl KeywordFilter for SubstringFilter {
    fn find<'k>(&self, line: &str, keywords: &'k [String]) -> Option<&'k str> {
        keywords
            .iter()
            .find(|k| !k.is_empty() && line.contains(k.as_str()))
            .map(String::as_str)
    }
}
