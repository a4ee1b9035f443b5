//! Parser for `svnlook tree` output.
//!
//! `svnlook tree` prints one object per line, indented by one space per
//! nesting level, directories with a trailing slash:
//!
//! ```text
//! trunk/
//!  case-001/
//!   dir2/
//!    b.txt
//!   c.html
//! ```
//!
//! Listing `/case-001` yields
//!
//! ```text
//! /case-001/
//! /case-001/dir2/
//! /case-001/dir2/b.txt
//! /case-001/c.html
//! ```
//!
//! The first line names the queried object itself and is replaced by
//! `path/`, so the output never depends on where the content subtree
//! lives inside the repository.

/// Turn indented tree output into absolute paths.
///
/// Lines whose indentation skips a level (no enclosing directory was seen)
/// are dropped.
pub fn parse_tree_output(path: &str, stdout: &str) -> Vec<String> {
    let mut parents: Vec<String> = vec![String::new()];
    let mut out = Vec::new();
    let mut lines = stdout.lines().filter(|l| !l.trim_end_matches('\r').is_empty());

    let Some(first) = lines.next() else {
        return out;
    };
    let root = if first.trim_end_matches('\r').ends_with('/') {
        format!("{path}/")
    } else {
        // A single file: the listing is just the file.
        out.push(path.to_string());
        return out;
    };
    out.push(root.clone());
    parents.push(root);

    for line in lines {
        let line = line.trim_end_matches('\r');
        let name = line.trim_start_matches(' ');
        let depth = line.len() - name.len();
        let Some(parent) = parents.get(depth) else {
            continue;
        };
        let full = format!("{parent}{name}");
        out.push(full.clone());
        if name.ends_with('/') {
            parents.truncate(depth + 1);
            parents.push(full);
        }
    }
    out
}
