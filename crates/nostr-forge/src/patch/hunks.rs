// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Hunk alignment and application.
//!
//! Pure text transforms shared by the analyzer and the applier: the same
//! alignment decides both "would this conflict" and "write the new file".
//! Hunks are aligned by context within a configurable search window around
//! their declared position, so application tolerates small drifts of the
//! target file.

use std::fmt;

use super::{Hunk, LinePrefix};

/// A hunk that could not be aligned against the target content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HunkApplyError {
    /// Index of the failing hunk within the file change
    pub hunk_index: usize,
}

impl fmt::Display for HunkApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hunk {} does not align with the target content", self.hunk_index)
    }
}

impl std::error::Error for HunkApplyError {}

/// Apply `hunks` to `old`, aligning each hunk by its context lines within
/// `window` lines of its declared position.
pub fn apply_hunks(old: &str, hunks: &[Hunk], window: u32) -> Result<String, HunkApplyError> {
    let had_trailing_newline = old.is_empty() || old.ends_with('\n');
    let old_lines: Vec<&str> = old.lines().collect();

    let mut out: Vec<String> = Vec::with_capacity(old_lines.len());
    let mut cursor: usize = 0;
    let mut offset: i64 = 0;
    let mut no_newline_after_last = false;

    for (hunk_index, hunk) in hunks.iter().enumerate() {
        let expected: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|l| matches!(l.prefix, LinePrefix::Context | LinePrefix::Remove))
            .map(|l| l.text.as_str())
            .collect();

        // For a pure insertion old_start names the line after which to
        // insert; otherwise it names the first replaced line (1-based).
        let declared: i64 = if expected.is_empty() {
            hunk.old_start as i64
        } else {
            hunk.old_start as i64 - 1
        };

        let position = align(&old_lines, &expected, declared + offset, window, cursor)
            .ok_or(HunkApplyError { hunk_index })?;

        // Copy untouched lines up to the hunk
        for line in &old_lines[cursor..position] {
            out.push((*line).to_string());
        }
        cursor = position;

        let mut last_was_add_or_context = false;
        no_newline_after_last = false;
        for line in &hunk.lines {
            match line.prefix {
                LinePrefix::Context => {
                    out.push(line.text.clone());
                    cursor += 1;
                    last_was_add_or_context = true;
                }
                LinePrefix::Add => {
                    out.push(line.text.clone());
                    last_was_add_or_context = true;
                }
                LinePrefix::Remove => {
                    cursor += 1;
                    last_was_add_or_context = false;
                }
                LinePrefix::NoNewline => {
                    if last_was_add_or_context {
                        no_newline_after_last = true;
                    }
                }
            }
        }

        offset = position as i64 - declared;
    }

    // Remainder of the file
    let at_end = cursor >= old_lines.len();
    for line in &old_lines[cursor.min(old_lines.len())..] {
        out.push((*line).to_string());
    }

    let mut result = out.join("\n");
    let trailing = if at_end {
        !no_newline_after_last
    } else {
        had_trailing_newline
    };
    if trailing && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

fn align(
    old_lines: &[&str],
    expected: &[&str],
    declared: i64,
    window: u32,
    min_position: usize,
) -> Option<usize> {
    let fits = |position: usize| -> bool {
        position >= min_position
            && position + expected.len() <= old_lines.len()
            && old_lines[position..position + expected.len()] == *expected
    };

    if expected.is_empty() {
        // Insertions have no context to align on; clamp into range
        let position = declared.max(min_position as i64) as usize;
        return (position <= old_lines.len()).then_some(position);
    }

    for delta in 0..=window as i64 {
        for candidate in [declared + delta, declared - delta] {
            if candidate < 0 {
                continue;
            }
            let candidate = candidate as usize;
            if fits(candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Reconstruct the content of a newly added file from its `+` lines.
pub fn new_file_content(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    let mut no_newline = false;
    for hunk in hunks {
        for line in &hunk.lines {
            match line.prefix {
                LinePrefix::Add => {
                    out.push_str(&line.text);
                    out.push('\n');
                }
                LinePrefix::NoNewline => no_newline = true,
                _ => {}
            }
        }
    }
    if no_newline && out.ends_with('\n') {
        out.pop();
    }
    out
}

/// The minimum old content a deletion expects, from its `-` and context
/// lines.
pub fn delete_content(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    let mut no_newline = false;
    for hunk in hunks {
        for line in &hunk.lines {
            match line.prefix {
                LinePrefix::Remove | LinePrefix::Context => {
                    out.push_str(&line.text);
                    out.push('\n');
                }
                LinePrefix::NoNewline => no_newline = true,
                _ => {}
            }
        }
    }
    if no_newline && out.ends_with('\n') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::parse_diff;

    fn hunks_of(diff: &str) -> Vec<Hunk> {
        parse_diff(diff).remove(0).hunks
    }

    const BASE: &str = "alpha\nbeta\ngamma\ndelta\n";

    const INSERT_DIFF: &str = "\
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1,3 +1,4 @@
 alpha
+inserted
 beta
 gamma
";

    #[test]
    fn applies_at_declared_position() {
        let result = apply_hunks(BASE, &hunks_of(INSERT_DIFF), 5).unwrap();
        assert_eq!(result, "alpha\ninserted\nbeta\ngamma\ndelta\n");
    }

    #[test]
    fn applies_with_drift_inside_window() {
        // Two new lines on top shift everything down by two
        let drifted = format!("zero\none\n{BASE}");
        let result = apply_hunks(&drifted, &hunks_of(INSERT_DIFF), 5).unwrap();
        assert_eq!(result, "zero\none\nalpha\ninserted\nbeta\ngamma\ndelta\n");
    }

    #[test]
    fn drift_beyond_window_conflicts() {
        let padding = "x\n".repeat(10);
        let drifted = format!("{padding}{BASE}");
        let err = apply_hunks(&drifted, &hunks_of(INSERT_DIFF), 5).unwrap_err();
        assert_eq!(err.hunk_index, 0);
    }

    #[test]
    fn changed_context_conflicts() {
        let mutated = "alpha\nBETA\ngamma\ndelta\n";
        assert!(apply_hunks(mutated, &hunks_of(INSERT_DIFF), 5).is_err());
    }

    #[test]
    fn removal_drops_lines() {
        let diff = "\
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1,3 +1,2 @@
 alpha
-beta
 gamma
";
        let result = apply_hunks(BASE, &hunks_of(diff), 5).unwrap();
        assert_eq!(result, "alpha\ngamma\ndelta\n");
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        let base = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let diff = "\
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1,2 +1,3 @@
 a
+one
 b
@@ -7,2 +8,3 @@
 g
+two
 h
";
        let result = apply_hunks(base, &hunks_of(diff), 5).unwrap();
        assert_eq!(result, "a\none\nb\nc\nd\ne\nf\ng\ntwo\nh\n");
    }

    #[test]
    fn new_file_reconstruction() {
        let diff = "\
diff --git a/new.txt b/new.txt
new file mode 100644
--- /dev/null
+++ b/new.txt
@@ -0,0 +1,2 @@
+hello
+world
";
        assert_eq!(new_file_content(&hunks_of(diff)), "hello\nworld\n");
    }

    #[test]
    fn delete_expectation() {
        let diff = "\
diff --git a/old.txt b/old.txt
deleted file mode 100644
--- a/old.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-gone
-away
";
        assert_eq!(delete_content(&hunks_of(diff)), "gone\naway\n");
    }

    #[test]
    fn no_newline_marker_strips_trailing_newline() {
        let diff = "\
diff --git a/f b/f
--- a/f
+++ b/f
@@ -1 +1 @@
-old
+new
\\ No newline at end of file
";
        let result = apply_hunks("old\n", &hunks_of(diff), 5).unwrap();
        assert_eq!(result, "new");
    }
}
