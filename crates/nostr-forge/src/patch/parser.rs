// Copyright (c) 2025 Nostr Forge Developers
// Distributed under the MIT software license

//! Unified diff parser.
//!
//! Splits a diff into per-file changes with classified kinds and ordered
//! hunks. Classification precedence per `diff --git` block: binary, rename,
//! add, delete, modify. Binary patches and renames are surfaced as
//! [`ChangeKind::Unsupported`]; callers decide whether to map renames to
//! delete plus add.

use super::{ChangeKind, FileChange, Hunk, HunkLine, LinePrefix};

/// Parse a unified diff (optionally with a leading commit message) into
/// ordered file changes.
pub fn parse_diff(diff: &str) -> Vec<FileChange> {
    let mut changes: Vec<FileChange> = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    let mut in_diff = false;

    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            if in_diff && !block.is_empty() {
                if let Some(change) = parse_block(&block) {
                    changes.push(change);
                }
            }
            block = vec![line];
            in_diff = true;
        } else if in_diff {
            block.push(line);
        }
    }
    if in_diff && !block.is_empty() {
        if let Some(change) = parse_block(&block) {
            changes.push(change);
        }
    }

    changes
}

fn parse_block(block: &[&str]) -> Option<FileChange> {
    let header = block.first()?;

    let mut kind = ChangeKind::Modify;
    let mut old_path: Option<String> = None;
    let mut new_path: Option<String> = None;
    let mut binary = false;
    let mut rename = false;

    for line in block {
        if line.starts_with("GIT binary patch") || line.starts_with("Binary files") {
            binary = true;
        } else if line.starts_with("rename from ") || line.starts_with("rename to ") {
            rename = true;
        } else if line.starts_with("new file mode") {
            kind = ChangeKind::Add;
        } else if line.starts_with("deleted file mode") {
            kind = ChangeKind::Delete;
        } else if let Some(path) = line.strip_prefix("--- ") {
            old_path = strip_prefix_path(path);
        } else if let Some(path) = line.strip_prefix("+++ ") {
            new_path = strip_prefix_path(path);
        }
    }

    // Precedence: binary and renames trump everything else
    if binary || rename {
        kind = ChangeKind::Unsupported;
    }

    let path = match kind {
        ChangeKind::Delete => old_path.or(new_path),
        _ => new_path.or(old_path),
    }
    .or_else(|| path_from_header(header))?;

    let hunks = match kind {
        ChangeKind::Unsupported => Vec::new(),
        _ => parse_hunks(block),
    };

    Some(FileChange { path, kind, hunks })
}

// "a/src/lib.rs" -> "src/lib.rs"; "/dev/null" -> None
fn strip_prefix_path(path: &str) -> Option<String> {
    let path = path.split('\t').next().unwrap_or(path).trim();
    if path == "/dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    (!path.is_empty()).then(|| path.to_string())
}

// "diff --git a/x b/x" -> "x"
fn path_from_header(header: &str) -> Option<String> {
    let rest = header.strip_prefix("diff --git ")?;
    let b_side = rest.split(" b/").nth(1)?;
    (!b_side.is_empty()).then(|| b_side.to_string())
}

fn parse_hunks(block: &[&str]) -> Vec<Hunk> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in block {
        if line.starts_with("@@") {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            current = parse_hunk_header(line);
        } else if let Some(hunk) = current.as_mut() {
            let Some(prefix) = line.chars().next().and_then(LinePrefix::from_char) else {
                // Reached trailing material (e.g. the next file header line
                // was already handled by the caller); close the hunk.
                if let Some(hunk) = current.take() {
                    hunks.push(hunk);
                }
                continue;
            };
            hunk.lines.push(HunkLine {
                prefix,
                text: line[1..].to_string(),
            });
        }
    }
    if let Some(hunk) = current.take() {
        hunks.push(hunk);
    }

    hunks
}

// "@@ -a,b +c,d @@ context" with counts defaulting to 1 when omitted
fn parse_hunk_header(line: &str) -> Option<Hunk> {
    let rest = line.strip_prefix("@@ -")?;
    let (old, rest) = rest.split_once(" +")?;
    let (new, _) = rest.split_once(" @@")?;

    let (old_start, old_count) = parse_range(old)?;
    let (new_start, new_count) = parse_range(new)?;

    Some(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFY: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
+    println!(\"hi\");
     run();
 }
";

    const ADD: &str = "\
diff --git a/greet.txt b/greet.txt
new file mode 100644
index 0000000..3333333
--- /dev/null
+++ b/greet.txt
@@ -0,0 +1,2 @@
+hello
+world
";

    const DELETE: &str = "\
diff --git a/old.txt b/old.txt
deleted file mode 100644
index 4444444..0000000
--- a/old.txt
+++ /dev/null
@@ -1,2 +0,0 @@
-gone
-away
";

    const RENAME: &str = "\
diff --git a/before.txt b/after.txt
similarity index 100%
rename from before.txt
rename to after.txt
";

    const BINARY: &str = "\
diff --git a/logo.png b/logo.png
index 5555555..6666666 100644
Binary files a/logo.png and b/logo.png differ
";

    #[test]
    fn classifies_modify() {
        let changes = parse_diff(MODIFY);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modify);
        assert_eq!(changes[0].path, "src/lib.rs");
        assert_eq!(changes[0].hunks.len(), 1);
        let hunk = &changes[0].hunks[0];
        assert_eq!((hunk.old_start, hunk.old_count), (1, 3));
        assert_eq!((hunk.new_start, hunk.new_count), (1, 4));
        assert_eq!(hunk.lines.len(), 4);
        assert_eq!(hunk.lines[1].prefix, LinePrefix::Add);
        assert_eq!(hunk.lines[1].text, "    println!(\"hi\");");
    }

    #[test]
    fn classifies_add_and_reconstructs_path() {
        let changes = parse_diff(ADD);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Add);
        assert_eq!(changes[0].path, "greet.txt");
        assert_eq!(changes[0].hunks[0].lines.len(), 2);
    }

    #[test]
    fn classifies_delete_with_old_path() {
        let changes = parse_diff(DELETE);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Delete);
        assert_eq!(changes[0].path, "old.txt");
    }

    #[test]
    fn rename_and_binary_are_unsupported() {
        assert_eq!(parse_diff(RENAME)[0].kind, ChangeKind::Unsupported);
        assert_eq!(parse_diff(BINARY)[0].kind, ChangeKind::Unsupported);
    }

    #[test]
    fn leading_commit_message_is_ignored() {
        let diff = format!("Subject: add greeting\n\nBody text\n\n{MODIFY}");
        let changes = parse_diff(&diff);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "src/lib.rs");
    }

    #[test]
    fn multiple_files_keep_order() {
        let diff = format!("{MODIFY}{ADD}");
        let changes = parse_diff(&diff);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "src/lib.rs");
        assert_eq!(changes[1].path, "greet.txt");
    }

    #[test]
    fn count_defaults_to_one() {
        let hunk = parse_hunk_header("@@ -5 +6 @@").unwrap();
        assert_eq!((hunk.old_start, hunk.old_count), (5, 1));
        assert_eq!((hunk.new_start, hunk.new_count), (6, 1));
    }

    #[test]
    fn no_newline_marker_is_kept() {
        let diff = "\
diff --git a/x b/x
--- a/x
+++ b/x
@@ -1 +1 @@
-old
+new
\\ No newline at end of file
";
        let changes = parse_diff(diff);
        let lines = &changes[0].hunks[0].lines;
        assert_eq!(lines[2].prefix, LinePrefix::NoNewline);
    }
}
