//! Synthesized diff text.
//!
//! New files get a full "everything added" diff built from disk content.
//! Files whose real diff cannot be produced get a one-line, diff-shaped
//! placeholder so renderers and the diff parser still accept them.

/// Diff presenting every line of a new file as an addition.
#[must_use]
pub fn new_file(file: &str, content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut diff = format!(
        "diff --git a/{file} b/{file}\nnew file mode 100644\nindex 0000000..0000000\n--- /dev/null\n+++ b/{file}\n"
    );
    if lines.is_empty() {
        return diff;
    }
    diff.push_str(&format!("@@ -0,0 +1,{} @@\n", lines.len()));
    for line in lines {
        diff.push('+');
        diff.push_str(line);
        diff.push('\n');
    }
    diff
}

/// Placeholder for an added path that is not a readable text file.
#[must_use]
pub fn added(file: &str, label: &str) -> String {
    format!(
        "diff --git a/{file} b/{file}\nnew file mode 100644\nindex 0000000..0000000\n--- /dev/null\n+++ b/{file}\n@@ -0,0 +1,1 @@\n+<{label}: {file}>\n"
    )
}

/// Placeholder for a deleted file whose old content is unavailable.
#[must_use]
pub fn deleted(file: &str) -> String {
    format!(
        "diff --git a/{file} b/{file}\ndeleted file mode 100644\nindex 0000000..0000000\n--- a/{file}\n+++ /dev/null\n@@ -1 +0,0 @@\n-<File deleted: {file}>\n"
    )
}

/// Placeholder for a modified file whose diff could not be produced.
#[must_use]
pub fn modified(file: &str, before: &str, after: &str) -> String {
    format!(
        "diff --git a/{file} b/{file}\nindex 0000000..0000000\n--- a/{file}\n+++ b/{file}\n@@ -1 +1 @@\n-<{before}>\n+<{after}>\n"
    )
}
