use nucleo_matcher::pattern::{Atom, AtomKind, CaseMatching, Normalization};
use nucleo_matcher::{Matcher, Utf32Str};

/// Queries shorter than this (in characters) produce no results.
pub const MIN_QUERY_LEN: usize = 2;
pub const MAX_RESULTS: usize = 10;

pub struct FuzzyMatcher {
    matcher: Matcher,
    buf: Vec<char>,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzyMatcher {
    pub fn new() -> Self {
        Self {
            matcher: Matcher::new(nucleo_matcher::Config::DEFAULT),
            buf: Vec::new(),
        }
    }

    /// Case-insensitive match of `query` against a candidate name: substring,
    /// prefix of a whitespace/hyphen token, or in-order subsequence.
    pub fn matches(&mut self, query: &str, name: &str) -> bool {
        let query = query.to_lowercase();
        if query.is_empty() {
            return false;
        }
        let lower = name.to_lowercase();
        if lower.contains(&query) {
            return true;
        }
        if lower
            .split(|c: char| c.is_whitespace() || c == '-')
            .any(|token| token.starts_with(&query))
        {
            return true;
        }

        let atom = Atom::new(
            &query,
            CaseMatching::Ignore,
            Normalization::Never,
            AtomKind::Fuzzy,
            false,
        );
        let haystack = Utf32Str::new(&lower, &mut self.buf);
        atom.score(haystack, &mut self.matcher).is_some()
    }

    /// Filters `candidates` down to matches and orders them: exact name first,
    /// then names starting with the query, then shorter names. Remaining ties
    /// keep input order. At most `MAX_RESULTS` are returned.
    pub fn rank<'a, T, F>(&mut self, query: &str, candidates: &'a [T], name_of: F) -> Vec<&'a T>
    where
        F: Fn(&T) -> &str,
    {
        if query.chars().count() < MIN_QUERY_LEN {
            return Vec::new();
        }
        let lower_query = query.to_lowercase();

        let mut scored: Vec<((u8, usize), &'a T)> = candidates
            .iter()
            .filter(|c| self.matches(query, name_of(*c)))
            .map(|c| {
                let name = name_of(c).to_lowercase();
                let class = if name == lower_query {
                    0
                } else if name.starts_with(&lower_query) {
                    1
                } else {
                    2
                };
                ((class, name.chars().count()), c)
            })
            .collect();

        // sort_by_key is stable, so equal keys keep input order
        scored.sort_by_key(|(key, _)| *key);
        scored.truncate(MAX_RESULTS);

        log::debug!("FuzzyMatcher: query='{}', matched={}", query, scored.len());
        scored.into_iter().map(|(_, c)| c).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(ranked: Vec<&'a &'a str>) -> Vec<&'a str> {
        ranked.into_iter().copied().collect()
    }

    #[test]
    fn subsequence_matches() {
        let mut m = FuzzyMatcher::new();
        assert!(m.matches("fx", "Firefox"));
        assert!(!m.matches("fx", "Chromium"));
        assert!(m.matches("FFX", "firefox"));
    }

    #[test]
    fn token_and_substring_matches() {
        let mut m = FuzzyMatcher::new();
        assert!(m.matches("term", "GNOME-Terminal"));
        assert!(m.matches("code", "Visual Studio Code"));
        assert!(m.matches("dio", "Visual Studio Code"));
        assert!(!m.matches("xyz", "Visual Studio Code"));
        assert!(!m.matches("", "anything"));
    }

    #[test]
    fn ranks_exact_then_prefix_then_length() {
        let mut m = FuzzyMatcher::new();
        let candidates = ["Campfire App", "Firefox", "fire"];
        let ranked = names(m.rank("fire", &candidates, |c| *c));
        assert_eq!(ranked, vec!["fire", "Firefox", "Campfire App"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let mut m = FuzzyMatcher::new();
        let candidates = ["Abcx", "Abcy", "Abcz"];
        let ranked = names(m.rank("ab", &candidates, |c| *c));
        assert_eq!(ranked, vec!["Abcx", "Abcy", "Abcz"]);
    }

    #[test]
    fn short_query_yields_nothing() {
        let mut m = FuzzyMatcher::new();
        let candidates = ["Firefox"];
        assert!(m.rank("f", &candidates, |c| *c).is_empty());
        assert!(m.rank("", &candidates, |c| *c).is_empty());
    }

    #[test]
    fn results_are_capped() {
        let mut m = FuzzyMatcher::new();
        let owned: Vec<String> = (0..25).map(|i| format!("Editor {i}")).collect();
        let ranked = m.rank("editor", &owned, |c| c.as_str());
        assert_eq!(ranked.len(), MAX_RESULTS);
        assert_eq!(ranked[0], "Editor 0");
    }
}
