use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Include/exclude selection over double-star globs: `*` matches within one
/// path segment, `**` crosses segments, `?` one character, `[...]` a class.
/// An empty include list selects nothing (fail-closed).
pub struct Matcher {
    include: GlobSet,
    exclude: GlobSet,
    include_empty: bool,
}

impl Matcher {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Matcher {
            include: build_set(include),
            exclude: build_set(exclude),
            include_empty: include.is_empty(),
        }
    }

    pub fn matches(&self, s: &str) -> bool {
        if self.include_empty {
            return false;
        }
        self.include.is_match(s) && !self.exclude.is_match(s)
    }
}

/// Single-pattern match with the same glob dialect; invalid patterns match nothing.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(glob) => glob.compile_matcher().is_match(s),
        Err(_) => false,
    }
}

fn build_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        // invalid patterns are skipped rather than failing the whole selector
        if let Ok(glob) = GlobBuilder::new(p).literal_separator(true).build() {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_include_rejects_everything() {
        let m = Matcher::new(&[], &[]);
        assert!(!m.matches("anything"));
        assert!(!m.matches(""));
    }

    #[test]
    fn test_include_prefix_glob() {
        let m = Matcher::new(&pats(&["app-*"]), &[]);
        assert!(m.matches("app-a"));
        assert!(m.matches("app-backend"));
        assert!(!m.matches("kube-system"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let m = Matcher::new(&pats(&["**"]), &pats(&["kube-*"]));
        assert!(m.matches("prod"));
        assert!(!m.matches("kube-system"));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let m = Matcher::new(&pats(&["**"]), &[]);
        assert!(m.matches("a"));
        assert!(m.matches("a/b/c"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let m = Matcher::new(&pats(&["a/*"]), &[]);
        assert!(m.matches("a/b"));
        assert!(!m.matches("a/b/c"));
    }

    #[test]
    fn test_question_mark_and_class() {
        let m = Matcher::new(&pats(&["data-?", "scratch-[0-9]"]), &[]);
        assert!(m.matches("data-a"));
        assert!(!m.matches("data-ab"));
        assert!(m.matches("scratch-7"));
        assert!(!m.matches("scratch-x"));
    }

    #[test]
    fn test_exact_name() {
        let m = Matcher::new(&pats(&["gp3"]), &[]);
        assert!(m.matches("gp3"));
        assert!(!m.matches("gp2"));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let m = Matcher::new(&pats(&["[unclosed", "ok-*"]), &[]);
        assert!(m.matches("ok-1"));
        assert!(!m.matches("[unclosed"));
    }

    #[test]
    fn test_glob_match_single() {
        assert!(glob_match("gp*", "gp3"));
        assert!(!glob_match("gp*", "ebs"));
        assert!(!glob_match("[bad", "anything"));
    }
}
