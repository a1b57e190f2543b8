//! Unified diff generation for the revision system's `diff/{commit}` endpoint.

use diffs::Diff;

const CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineTag {
    Equal,
    Delete,
    Insert,
}

/// One line of the diff, tagged by origin: `old_idx`/`new_idx` index into the
/// original line slices (whichever side applies; `None` for the side that
/// doesn't have this line).
struct TaggedLine {
    tag: LineTag,
    old_idx: Option<usize>,
    new_idx: Option<usize>,
}

/// Flattens `diffs::patience::diff`'s spans into one `TaggedLine` per source line,
/// in old/new order, so hunk grouping can work line-by-line instead of span-by-span.
struct LineDiff {
    lines: Vec<TaggedLine>,
}

impl Diff for LineDiff {
    type Error = ();

    fn equal(&mut self, old: usize, new: usize, len: usize) -> Result<(), Self::Error> {
        for i in 0..len {
            self.lines.push(TaggedLine {
                tag: LineTag::Equal,
                old_idx: Some(old + i),
                new_idx: Some(new + i),
            });
        }
        Ok(())
    }

    fn delete(&mut self, old: usize, old_len: usize, _new: usize) -> Result<(), Self::Error> {
        for i in 0..old_len {
            self.lines.push(TaggedLine {
                tag: LineTag::Delete,
                old_idx: Some(old + i),
                new_idx: None,
            });
        }
        Ok(())
    }

    fn insert(&mut self, _old: usize, new: usize, new_len: usize) -> Result<(), Self::Error> {
        for i in 0..new_len {
            self.lines.push(TaggedLine {
                tag: LineTag::Insert,
                old_idx: None,
                new_idx: Some(new + i),
            });
        }
        Ok(())
    }
}

/// Splits text into lines, dropping the trailing newline from each.
fn split_lines(content: &str) -> Vec<&str> {
    if content.is_empty() {
        return vec![];
    }
    content.lines().collect()
}

/// Renders a standard `a/path`/`b/path` unified diff between `old_content` and
/// `new_content`. Returns an empty string if the two are identical.
pub fn unified_diff(old_label: &str, new_label: &str, old_content: &str, new_content: &str) -> String {
    let old_lines = split_lines(old_content);
    let new_lines = split_lines(new_content);

    let mut differ = LineDiff { lines: vec![] };
    diffs::patience::diff(
        &mut differ,
        &old_lines,
        0,
        old_lines.len(),
        &new_lines,
        0,
        new_lines.len(),
    )
    .unwrap();

    if differ.lines.iter().all(|l| l.tag == LineTag::Equal) {
        return String::new();
    }

    let mut out = String::new();
    out.push_str(&format!("--- a/{old_label}\n"));
    out.push_str(&format!("+++ b/{new_label}\n"));
    for hunk_range in group_hunks(&differ.lines) {
        render_hunk(&mut out, &differ.lines[hunk_range], &old_lines, &new_lines);
    }
    out
}

/// Groups line indices into hunk ranges, each padded with up to `CONTEXT_LINES`
/// of surrounding equal lines. Runs of equal lines longer than `2 *
/// CONTEXT_LINES` between two changes split into separate hunks.
fn group_hunks(lines: &[TaggedLine]) -> Vec<std::ops::Range<usize>> {
    let change_indices: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.tag != LineTag::Equal)
        .map(|(i, _)| i)
        .collect();

    if change_indices.is_empty() {
        return vec![];
    }

    let mut ranges: Vec<std::ops::Range<usize>> = vec![];
    let mut start = change_indices[0].saturating_sub(CONTEXT_LINES);
    let mut end = (change_indices[0] + 1 + CONTEXT_LINES).min(lines.len());

    for &idx in &change_indices[1..] {
        let next_start = idx.saturating_sub(CONTEXT_LINES);
        if next_start <= end {
            end = (idx + 1 + CONTEXT_LINES).min(lines.len());
        } else {
            ranges.push(start..end);
            start = next_start;
            end = (idx + 1 + CONTEXT_LINES).min(lines.len());
        }
    }
    ranges.push(start..end);
    ranges
}

fn render_hunk(
    out: &mut String,
    hunk_lines: &[TaggedLine],
    old_lines: &[&str],
    new_lines: &[&str],
) {
    let old_start = hunk_lines
        .iter()
        .find_map(|l| l.old_idx)
        .unwrap_or(0);
    let new_start = hunk_lines
        .iter()
        .find_map(|l| l.new_idx)
        .unwrap_or(0);
    let old_count = hunk_lines.iter().filter(|l| l.old_idx.is_some()).count();
    let new_count = hunk_lines.iter().filter(|l| l.new_idx.is_some()).count();

    out.push_str(&format!(
        "@@ -{},{} +{},{} @@\n",
        old_start + 1,
        old_count,
        new_start + 1,
        new_count
    ));

    for line in hunk_lines {
        match line.tag {
            LineTag::Equal => out.push_str(&format!(" {}\n", old_lines[line.old_idx.unwrap()])),
            LineTag::Delete => out.push_str(&format!("-{}\n", old_lines[line.old_idx.unwrap()])),
            LineTag::Insert => out.push_str(&format!("+{}\n", new_lines[line.new_idx.unwrap()])),
        }
    }
}

/// Stub shown for a file added in a commit: no previous version to diff against.
pub fn added_stub(path: &str, size: i64) -> String {
    format!("--- /dev/null\n+++ b/{path}\n@@ new file, {size} bytes @@\n")
}

/// Stub shown for a file deleted in a commit.
pub fn deleted_stub(path: &str) -> String {
    format!("--- a/{path}\n+++ /dev/null\n@@ file deleted @@\n")
}
