//! Unified diff parser.

use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Added/removed line counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

impl Add for DiffStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            additions: self.additions + rhs.additions,
            deletions: self.deletions + rhs.deletions,
        }
    }
}

/// Classification of a hunk body line by its leading character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LineKind {
    Added,
    Removed,
    /// `\ No newline at end of file`
    NoNewline,
    Context,
}

impl LineKind {
    #[must_use]
    pub fn of(line: &str) -> Self {
        match line.as_bytes().first() {
            Some(b'+') => Self::Added,
            Some(b'-') => Self::Removed,
            Some(b'\\') => Self::NoNewline,
            _ => Self::Context,
        }
    }
}

/// A hunk body line with its position on each side.
///
/// Added lines only have a new-side number, removed lines only an old-side
/// number. The no-newline marker has neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine<'a> {
    pub kind: LineKind,
    pub old_line: Option<u32>,
    pub new_line: Option<u32>,
    pub text: &'a str,
}

/// One `@@` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    pub header: String,
    pub old_start: u32,
    pub new_start: u32,
    /// Body lines, verbatim including their prefix character.
    pub lines: Vec<String>,
}

impl Hunk {
    /// Walk the body assigning old/new line numbers.
    #[must_use]
    pub fn numbered_lines(&self) -> Vec<DiffLine<'_>> {
        let mut old = self.old_start;
        let mut new = self.new_start;
        self.lines
            .iter()
            .map(|line| {
                let kind = LineKind::of(line);
                let (old_line, new_line) = match kind {
                    LineKind::Added => {
                        new += 1;
                        (None, Some(new - 1))
                    }
                    LineKind::Removed => {
                        old += 1;
                        (Some(old - 1), None)
                    }
                    LineKind::NoNewline => (None, None),
                    LineKind::Context => {
                        old += 1;
                        new += 1;
                        (Some(old - 1), Some(new - 1))
                    }
                };
                DiffLine {
                    kind,
                    old_line,
                    new_line,
                    text: line.as_str(),
                }
            })
            .collect()
    }
}

/// Structured form of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDiff {
    pub hunks: Vec<Hunk>,
    pub stats: DiffStats,
    /// New-file line to place the cursor on for "jump to change".
    ///
    /// Without additions this is the new-side line at the first removal
    /// (at least 1), not the hunk's `newStart`.
    pub first_changed_line: Option<u32>,
}

/// Parse unified diff text. Returns `None` for empty input.
///
/// Lines before the first `@@` header and file metadata lines
/// (`diff --git`, `index `, `---`, `+++`) are dropped wherever they occur.
#[must_use]
pub fn parse(diff_text: &str) -> Option<ParsedDiff> {
    if diff_text.is_empty() {
        return None;
    }

    let mut hunks: Vec<Hunk> = Vec::new();
    for line in diff_text.lines() {
        if line.starts_with("@@") {
            if let Some((old_start, new_start)) = parse_hunk_header(line) {
                hunks.push(Hunk {
                    header: line.to_string(),
                    old_start,
                    new_start,
                    lines: Vec::new(),
                });
            }
            continue;
        }
        if is_metadata(line) {
            continue;
        }
        if let Some(hunk) = hunks.last_mut() {
            hunk.lines.push(line.to_string());
        }
    }

    let stats = count_changes(&hunks);
    let first_changed_line = first_changed_line(&hunks);

    Some(ParsedDiff {
        hunks,
        stats,
        first_changed_line,
    })
}

fn is_metadata(line: &str) -> bool {
    line.starts_with("diff --git")
        || line.starts_with("index ")
        || line.starts_with("---")
        || line.starts_with("+++")
}

/// Parse `@@ -<old>[,<n>] +<new>[,<n>] @@` into the two start lines.
fn parse_hunk_header(line: &str) -> Option<(u32, u32)> {
    let rest = line.strip_prefix("@@ ")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(' ')?;
    let old_start = parse_range_start(old.strip_prefix('-')?)?;
    let new_start = parse_range_start(new.strip_prefix('+')?)?;
    Some((old_start, new_start))
}

fn parse_range_start(range: &str) -> Option<u32> {
    match range.split_once(',') {
        Some((start, count)) => {
            count.parse::<u32>().ok()?;
            start.parse().ok()
        }
        None => range.parse().ok(),
    }
}

fn count_changes(hunks: &[Hunk]) -> DiffStats {
    let mut stats = DiffStats::default();
    for line in hunks.iter().flat_map(|h| &h.lines) {
        match LineKind::of(line) {
            LineKind::Added => stats.additions += 1,
            LineKind::Removed => stats.deletions += 1,
            LineKind::NoNewline | LineKind::Context => {}
        }
    }
    stats
}

/// First added line's new-side number, else the new-side cursor at the
/// first removed line.
///
/// For a removal-only hunk this is the line after its leading context,
/// not the hunk's `newStart`: `@@ -10,3 +10,2 @@` with one context line
/// before the removal gives 11. A whole-file deletion (`+0,0`) gives 1
/// rather than 0.
fn first_changed_line(hunks: &[Hunk]) -> Option<u32> {
    let mut first_removal = None;
    for hunk in hunks {
        let mut cursor = hunk.new_start;
        for line in &hunk.lines {
            match LineKind::of(line) {
                LineKind::Added => return Some(cursor),
                LineKind::Removed => {
                    if first_removal.is_none() {
                        first_removal = Some(cursor.max(1));
                    }
                }
                LineKind::Context => cursor += 1,
                LineKind::NoNewline => {}
            }
        }
    }
    first_removal
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODIFIED: &str = "diff --git a/src/app.rs b/src/app.rs
index 3b18e51..a9c2f3d 100644
--- a/src/app.rs
+++ b/src/app.rs
@@ -1,2 +1,3 @@
 keep
-old
+new1
+new2
";

    #[test]
    fn test_parse_empty_is_none() {
        assert!(parse("").is_none());
    }

    #[test]
    fn test_parse_basic_hunk() {
        let parsed = parse(MODIFIED).unwrap();
        assert_eq!(parsed.hunks.len(), 1);
        let hunk = &parsed.hunks[0];
        assert_eq!(hunk.header, "@@ -1,2 +1,3 @@");
        assert_eq!(hunk.old_start, 1);
        assert_eq!(hunk.new_start, 1);
        assert_eq!(hunk.lines, vec![" keep", "-old", "+new1", "+new2"]);
        assert_eq!(
            parsed.stats,
            DiffStats {
                additions: 2,
                deletions: 1
            }
        );
    }

    #[test]
    fn test_first_changed_line_is_first_addition() {
        let parsed = parse(MODIFIED).unwrap();
        // " keep" is new line 1, "+new1" lands on new line 2.
        assert_eq!(parsed.first_changed_line, Some(2));
    }

    #[test]
    fn test_first_changed_line_pure_deletion() {
        let text = "@@ -10,3 +10,2 @@\n ctx\n-gone\n ctx2\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.stats.additions, 0);
        assert_eq!(parsed.stats.deletions, 1);
        assert_eq!(parsed.first_changed_line, Some(11));
    }

    #[test]
    fn test_first_changed_line_deleted_file() {
        let text = "--- a/x\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.stats.deletions, 2);
        assert_eq!(parsed.first_changed_line, Some(1));
    }

    #[test]
    fn test_addition_in_later_hunk_beats_earlier_removal() {
        let text = "@@ -1,2 +1,1 @@\n a\n-b\n@@ -20,1 +19,2 @@\n c\n+d\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.first_changed_line, Some(20));
    }

    #[test]
    fn test_header_without_counts() {
        let parsed = parse("@@ -3 +4 @@ fn main() {\n-x\n+y\n").unwrap();
        assert_eq!(parsed.hunks[0].old_start, 3);
        assert_eq!(parsed.hunks[0].new_start, 4);
        assert_eq!(parsed.first_changed_line, Some(4));
    }

    #[test]
    fn test_no_newline_marker_not_counted() {
        let text = "@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+b\n\\ No newline at end of file\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.stats.additions, 1);
        assert_eq!(parsed.stats.deletions, 1);
        assert_eq!(parsed.hunks[0].lines.len(), 4);
    }

    #[test]
    fn test_metadata_inside_hunk_region_is_dropped() {
        let text = "@@ -1 +1 @@\n-a\n+b\ndiff --git a/y b/y\nindex 1..2 100644\n--- a/y\n+++ b/y\n@@ -5 +5 @@\n-c\n+d\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.hunks.len(), 2);
        assert_eq!(parsed.hunks[0].lines, vec!["-a", "+b"]);
        assert_eq!(parsed.stats.additions, 2);
    }

    #[test]
    fn test_text_without_hunks() {
        let parsed = parse("Binary files a/logo.png and b/logo.png differ\n").unwrap();
        assert!(parsed.hunks.is_empty());
        assert_eq!(parsed.stats, DiffStats::default());
        assert_eq!(parsed.first_changed_line, None);
    }

    #[test]
    fn test_malformed_header_is_ignored() {
        let parsed = parse("@@ garbage @@\n+x\n").unwrap();
        assert!(parsed.hunks.is_empty());
        assert_eq!(parsed.stats.additions, 0);
    }

    #[test]
    fn test_numbered_lines() {
        let parsed = parse(MODIFIED).unwrap();
        let lines = parsed.hunks[0].numbered_lines();
        let positions: Vec<_> = lines.iter().map(|l| (l.kind, l.old_line, l.new_line)).collect();
        assert_eq!(
            positions,
            vec![
                (LineKind::Context, Some(1), Some(1)),
                (LineKind::Removed, Some(2), None),
                (LineKind::Added, None, Some(2)),
                (LineKind::Added, None, Some(3)),
            ]
        );
    }
}
