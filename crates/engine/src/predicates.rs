//! String tests usable in template conditionals, e.g.
//! `{% if scene_info is ends_with ".tif" %}`.

pub(crate) fn starts_with(string: String, prefix: String) -> bool {
    string.starts_with(&prefix)
}

pub(crate) fn ends_with(string: String, suffix: String) -> bool {
    string.ends_with(&suffix)
}

pub(crate) fn contains(string: String, substring: String) -> bool {
    string.contains(&substring)
}

#[cfg(test)]
mod tests {
    use super::{contains, ends_with, starts_with};

    #[test]
    fn string_predicates() {
        assert!(starts_with("Hello, World!".into(), "Hello".into()));
        assert!(!starts_with("Hello, World!".into(), "World".into()));
        assert!(ends_with("Hello, World!".into(), "World!".into()));
        assert!(!ends_with("Hello, World!".into(), "Hello".into()));
        assert!(contains("Hello, World!".into(), "Hello".into()));
        assert!(!contains("Hello, World!".into(), "Goodbye".into()));
    }
}
