use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_CONTEXT_LINES: usize = 20;

/// A matched error line with the surrounding context captured for the event
/// payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub source: String,
    pub error_line: String,
    pub context_before: Vec<String>,
    pub context_after: Vec<String>,
}

struct Capture {
    pending: Match,
    after_seen: usize,
}

struct MatcherInner {
    patterns: Vec<String>,
    context_lines: usize,
    ring: VecDeque<String>,
    capture: Option<Capture>,
}

/// Case-insensitive substring matcher with a ring buffer of recent lines for
/// context-before and a counted capture window for context-after.
pub struct Matcher {
    inner: Mutex<MatcherInner>,
}

impl Matcher {
    pub fn new(patterns: Vec<String>, context_lines: usize) -> Self {
        let context_lines = if context_lines == 0 {
            DEFAULT_CONTEXT_LINES
        } else {
            context_lines
        };
        Self {
            inner: Mutex::new(MatcherInner {
                patterns: lowercase_all(patterns),
                context_lines,
                ring: VecDeque::with_capacity(context_lines),
                capture: None,
            }),
        }
    }

    /// Feeds one line through the matcher. Returns a completed match when one
    /// finishes on this line: either an in-flight capture reached its
    /// context-after quota, or a new match displaced it.
    pub fn process_line(&self, source: &str, line: &str) -> Option<Match> {
        let mut guard = self.inner.lock().expect("matcher lock poisoned");
        let inner = &mut *guard;
        let mut completed = None;

        if let Some(capture) = inner.capture.as_mut() {
            capture.pending.context_after.push(line.to_string());
            capture.after_seen += 1;
            if capture.after_seen >= inner.context_lines {
                completed = inner.capture.take().map(|capture| capture.pending);
            }
        }

        if inner.matches(line) {
            if let Some(displaced) = inner.capture.take() {
                completed = Some(displaced.pending);
            }
            let context_before = inner.ring.iter().cloned().collect();
            inner.capture = Some(Capture {
                pending: Match {
                    source: source.to_string(),
                    error_line: line.to_string(),
                    context_before,
                    context_after: Vec::new(),
                },
                after_seen: 0,
            });
        }

        inner.ring.push_back(line.to_string());
        if inner.ring.len() > inner.context_lines {
            inner.ring.pop_front();
        }

        completed
    }

    /// Emits a capture that has not yet filled its context-after quota.
    pub fn flush(&self) -> Option<Match> {
        let mut inner = self.inner.lock().expect("matcher lock poisoned");
        inner.capture.take().map(|capture| capture.pending)
    }

    pub fn update_patterns(&self, patterns: Vec<String>) {
        let mut inner = self.inner.lock().expect("matcher lock poisoned");
        inner.patterns = lowercase_all(patterns);
    }

    /// Changing the context width resets the ring buffer.
    pub fn update_context_lines(&self, context_lines: usize) {
        let context_lines = if context_lines == 0 {
            DEFAULT_CONTEXT_LINES
        } else {
            context_lines
        };
        let mut inner = self.inner.lock().expect("matcher lock poisoned");
        if context_lines != inner.context_lines {
            inner.context_lines = context_lines;
            inner.ring = VecDeque::with_capacity(context_lines);
        }
    }
}

impl MatcherInner {
    fn matches(&self, line: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        let lowered = line.to_lowercase();
        self.patterns.iter().any(|pattern| lowered.contains(pattern))
    }
}

fn lowercase_all(patterns: Vec<String>) -> Vec<String> {
    patterns
        .into_iter()
        .map(|pattern| pattern.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(matcher: &Matcher, lines: &[&str]) -> Vec<Match> {
        lines
            .iter()
            .filter_map(|line| matcher.process_line("app.log", line))
            .collect()
    }

    #[test]
    fn emits_after_context_quota() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 2);
        let matches = feed(
            &matcher,
            &["before-1", "before-2", "ERROR boom", "after-1", "after-2"],
        );

        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.error_line, "ERROR boom");
        assert_eq!(m.context_before, vec!["before-1", "before-2"]);
        assert_eq!(m.context_after, vec!["after-1", "after-2"]);
        assert_eq!(m.source, "app.log");
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let matcher = Matcher::new(vec!["Error".to_string()], 1);
        let matches = feed(&matcher, &["prefix critical error: db down", "after"]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].error_line, "prefix critical error: db down");
    }

    #[test]
    fn ring_buffer_keeps_only_most_recent_lines() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 3);
        let mut lines: Vec<String> = (0..10).map(|i| format!("line-{i}")).collect();
        lines.push("ERROR".to_string());
        for line in &lines {
            matcher.process_line("app.log", line);
        }
        let m = matcher.flush().expect("pending capture");
        assert_eq!(m.context_before, vec!["line-7", "line-8", "line-9"]);
    }

    #[test]
    fn new_match_displaces_inflight_capture() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 5);
        let mut matches = Vec::new();
        for line in ["ERROR first", "mid", "ERROR second"] {
            matches.extend(matcher.process_line("app.log", line));
        }

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].error_line, "ERROR first");
        assert_eq!(matches[0].context_after, vec!["mid", "ERROR second"]);

        let second = matcher.flush().expect("second capture pending");
        assert_eq!(second.error_line, "ERROR second");
        // The first error and the mid line precede the second match.
        assert_eq!(second.context_before, vec!["ERROR first", "mid"]);
    }

    #[test]
    fn flush_emits_partial_capture_once() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 20);
        matcher.process_line("app.log", "ERROR tail");
        matcher.process_line("app.log", "after");

        let m = matcher.flush().expect("partial capture");
        assert_eq!(m.context_after, vec!["after"]);
        assert!(matcher.flush().is_none());
    }

    #[test]
    fn context_resize_resets_the_ring() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 4);
        for line in ["a", "b", "c"] {
            matcher.process_line("app.log", line);
        }
        matcher.update_context_lines(2);
        matcher.process_line("app.log", "d");
        matcher.process_line("app.log", "ERROR");
        let m = matcher.flush().expect("capture");
        assert_eq!(m.context_before, vec!["d"]);
    }

    #[test]
    fn pattern_updates_apply_to_subsequent_lines() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 1);
        assert!(matcher.process_line("app.log", "WARN only").is_none());
        matcher.update_patterns(vec!["WARN".to_string()]);
        matcher.process_line("app.log", "WARN again");
        assert_eq!(matcher.flush().expect("capture").error_line, "WARN again");
    }

    #[test]
    fn zero_context_falls_back_to_default() {
        let matcher = Matcher::new(vec!["ERROR".to_string()], 0);
        matcher.process_line("app.log", "ERROR");
        let m = matcher.flush().expect("capture");
        assert!(m.context_after.is_empty());
        let inner = matcher.inner.lock().expect("lock");
        assert_eq!(inner.context_lines, DEFAULT_CONTEXT_LINES);
    }
}
