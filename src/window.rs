//! Sliding-window attribute statistics.
//!
//! The window holds the most recent spans and, per span name, how many
//! distinct serialized values each attribute key currently has in the
//! window. Those distinct-value counts drive the stable-order selection: a
//! key is a candidate for the compressed prefix while its cardinality stays
//! at or below the configured limit.

use std::collections::{HashMap, VecDeque};

/// A span reduced to what the statistics need: its name and its attributes
/// as `(key, serialized value)` pairs.
#[derive(Debug)]
pub(crate) struct ObservedSpan {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct NameStats {
    /// occurrences of each serialized value, per key
    value_count: HashMap<String, HashMap<String, usize>>,
    /// number of distinct serialized values currently in the window, per key
    option_count: HashMap<String, usize>,
}

/// What a single `observe` call changed.
#[derive(Debug, Default)]
pub(crate) struct Observation {
    /// The span's name had never been seen before.
    pub new_name: bool,
    /// `(span name, key)` pairs whose distinct-value count fell below the
    /// limit while evicting. The caller re-runs order selection for these
    /// unless the key is already part of the stable order.
    pub dropped_below: Vec<(String, String)>,
}

#[derive(Debug)]
pub(crate) struct SpanWindow {
    capacity: usize,
    buffer: VecDeque<ObservedSpan>,
    stats: HashMap<String, NameStats>,
}

impl SpanWindow {
    pub(crate) fn new(capacity: usize) -> SpanWindow {
        SpanWindow {
            capacity: capacity.max(1),
            buffer: VecDeque::new(),
            stats: HashMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Distinct-value counts for the keys of `name`, if the name has been
    /// observed.
    pub(crate) fn option_counts(&self, name: &str) -> Option<&HashMap<String, usize>> {
        self.stats.get(name).map(|s| &s.option_count)
    }

    /// Every span name the window has ever seen. Names are retained after
    /// their spans age out so order selection stays possible on reset.
    pub(crate) fn known_names(&self) -> impl Iterator<Item = &String> {
        self.stats.keys()
    }

    /// Records `span`, evicting the oldest entries first so the window never
    /// exceeds its capacity.
    pub(crate) fn observe(&mut self, span: ObservedSpan, attr_limit: usize) -> Observation {
        let mut observation = Observation::default();
        while self.buffer.len() >= self.capacity {
            self.evict_oldest(attr_limit, &mut observation.dropped_below);
        }

        observation.new_name = !self.stats.contains_key(&span.name);
        let stats = self.stats.entry(span.name.clone()).or_default();
        for (key, value) in &span.attrs {
            let per_key = stats.value_count.entry(key.clone()).or_default();
            let count = per_key.entry(value.clone()).or_insert(0);
            if *count == 0 {
                *stats.option_count.entry(key.clone()).or_insert(0) += 1;
            }
            *count += 1;
        }
        self.buffer.push_back(span);
        observation
    }

    fn evict_oldest(&mut self, attr_limit: usize, dropped_below: &mut Vec<(String, String)>) {
        let Some(expired) = self.buffer.pop_front() else {
            return;
        };
        let Some(stats) = self.stats.get_mut(&expired.name) else {
            return;
        };
        for (key, value) in &expired.attrs {
            let Some(per_key) = stats.value_count.get_mut(key) else {
                continue;
            };
            let Some(count) = per_key.get_mut(value) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                per_key.remove(value);
                let options = stats.option_count.entry(key.clone()).or_insert(0);
                *options = options.saturating_sub(1);
                if *options < attr_limit {
                    dropped_below.push((expired.name.clone(), key.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(name: &str, attrs: &[(&str, &str)]) -> ObservedSpan {
        ObservedSpan {
            name: name.to_string(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = SpanWindow::new(3);
        for i in 0..10 {
            let value = format!("v{i}");
            window.observe(span("op", &[("k", value.as_str())]), 2);
            assert!(window.len() <= 3);
        }
    }

    #[test]
    fn test_option_counts_track_distinct_values() {
        let mut window = SpanWindow::new(10);
        window.observe(span("op", &[("k", "a")]), 5);
        window.observe(span("op", &[("k", "a")]), 5);
        window.observe(span("op", &[("k", "b")]), 5);
        assert_eq!(window.option_counts("op").unwrap()["k"], 2);
    }

    #[test]
    fn test_eviction_decrements_once_and_reports_drop() {
        let mut window = SpanWindow::new(2);
        window.observe(span("op", &[("k", "a")]), 1);
        window.observe(span("op", &[("k", "b")]), 1);
        // Evicting the last "a" drops the distinct count from 2 to 1, below
        // the limit of 2, so the key is reported exactly once.
        let observation = window.observe(span("op", &[("k", "c")]), 2);
        assert_eq!(window.option_counts("op").unwrap()["k"], 2);
        assert_eq!(
            observation.dropped_below,
            vec![("op".to_string(), "k".to_string())]
        );
    }

    #[test]
    fn test_new_name_flag() {
        let mut window = SpanWindow::new(4);
        assert!(window.observe(span("a", &[]), 2).new_name);
        assert!(!window.observe(span("a", &[]), 2).new_name);
        assert!(window.observe(span("b", &[]), 2).new_name);
    }

    #[test]
    fn test_names_survive_full_turnover() {
        let mut window = SpanWindow::new(1);
        window.observe(span("first", &[("k", "a")]), 2);
        window.observe(span("second", &[("k", "b")]), 2);
        let mut names: Vec<_> = window.known_names().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["first".to_string(), "second".to_string()]);
    }
}
