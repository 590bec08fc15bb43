//! Path relevance predicates and the collected result set.

use std::collections::HashSet;

/// Accept C and C++ sources and headers.
///
/// This is the default relevance predicate for watching C/C++ builds. Any
/// caller-supplied predicate must be pure: it may be invoked many times for
/// the same path during one trace.
pub fn c_and_cpp(path: &str) -> bool {
    const SUFFIXES: &[&str] = &[
        ".c", ".cpp", ".cc", ".cxx", ".h", ".hpp", ".hh", ".hxx",
    ];

    SUFFIXES.iter().any(|suffix| path.ends_with(suffix))
}

/// Distinct accepted paths, in first-seen order.
#[derive(Clone, Debug, Default)]
pub struct PathSet {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `path` if it has not been seen before. Returns `true` if added.
    pub fn insert(&mut self, path: String) -> bool {
        if self.seen.contains(&path) {
            return false;
        }

        self.seen.insert(path.clone());
        self.paths.push(path);

        true
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_source_suffixes() {
        let valid = [
            "/my/path/to/example.c",
            "/my/path/to/example.cpp",
            "/my/path/to/example.cc",
            "/my/path/to/example.cxx",
            "/my/path/to/example.h",
            "/my/path/to/example.hpp",
            "/my/path/to/example.hh",
            "/my/path/to/example.hxx",
        ];

        for path in &valid {
            assert!(c_and_cpp(path), "expected {} to be accepted", path);
        }
    }

    #[test]
    fn rejects_other_suffixes() {
        let invalid = [
            "/my/path/to/example.txt",
            "/my/path/to/example",
            "/my/path/to/example.o",
            "/my/path/to/example.rs",
            "",
        ];

        for path in &invalid {
            assert!(!c_and_cpp(path), "expected {} to be rejected", path);
        }
    }

    #[test]
    fn predicate_is_idempotent() {
        for path in &["/a/b.cpp", "/a/b.txt"] {
            assert_eq!(c_and_cpp(path), c_and_cpp(path));
        }
    }

    #[test]
    fn path_set_dedups() {
        let mut set = PathSet::new();

        assert!(set.insert("/src/main.cpp".into()));
        assert!(!set.insert("/src/main.cpp".into()));

        assert_eq!(set.len(), 1);
        assert_eq!(set.into_vec(), vec!["/src/main.cpp".to_string()]);
    }

    #[test]
    fn path_set_preserves_first_seen_order() {
        let mut set = PathSet::new();

        set.insert("/src/a.cpp".into());
        set.insert("/src/b.h".into());
        set.insert("/src/a.cpp".into());
        set.insert("/src/c.cc".into());

        let paths: Vec<_> = set.iter().collect();
        assert_eq!(paths, vec!["/src/a.cpp", "/src/b.h", "/src/c.cc"]);
    }
}
