use std::collections::HashSet;

/// Truncate a string to `max` characters, appending "..." when cut (Unicode-safe).
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// A set that remembers insertion order.
///
/// Pattern tags, search terms and file-path caps all need deduplication
/// with a deterministic, input-driven emission order, so a plain `HashSet`
/// (arbitrary iteration order) is not enough.
#[derive(Debug, Default)]
pub struct OrderedSet {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an item, returning true if it was not already present.
    pub fn insert(&mut self, item: impl Into<String>) -> bool {
        let item = item.into();
        if self.seen.insert(item.clone()) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.seen.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.items
    }
}

impl Extend<String> for OrderedSet {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        for item in iter {
            self.insert(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_unicode_safe() {
        let input = "ééééé";
        assert_eq!(truncate(input, 4), "é...");
    }

    #[test]
    fn test_truncate_small_max() {
        let input = "こんにちは";
        assert_eq!(truncate(input, 3), "こんに");
        assert_eq!(truncate(input, 0), "");
    }

    #[test]
    fn test_truncate_no_op_when_short() {
        assert_eq!(truncate("short", 80), "short");
    }

    #[test]
    fn test_ordered_set_preserves_first_occurrence_order() {
        let mut set = OrderedSet::new();
        assert!(set.insert("timeout"));
        assert!(set.insert("connection"));
        assert!(!set.insert("timeout"));
        assert!(set.insert("dns"));
        assert_eq!(set.into_vec(), vec!["timeout", "connection", "dns"]);
    }

    #[test]
    fn test_ordered_set_contains_and_len() {
        let mut set = OrderedSet::new();
        set.extend(vec!["a".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("a"));
        assert!(!set.contains("c"));
    }
}
