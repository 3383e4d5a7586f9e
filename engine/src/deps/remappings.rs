//! `remappings.txt` handling
//!
//! Entries are merged by prefix and the file is replaced atomically, so a
//! crash mid-write leaves the previous file intact.

use crate::fs_atomic::atomic_write_file;
use std::collections::BTreeMap;
use std::path::Path;

pub const REMAPPINGS_FILE: &str = "remappings.txt";

/// Parse `prefix=target` lines. Blank lines and `#` comments are skipped;
/// later entries for the same prefix win.
pub fn parse(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let (prefix, target) = l.split_once('=')?;
            Some((prefix.trim().to_string(), target.trim().to_string()))
        })
        .collect()
}

pub fn render(entries: &BTreeMap<String, String>) -> String {
    entries
        .iter()
        .map(|(prefix, target)| format!("{prefix}={target}\n"))
        .collect()
}

/// Merge `entries` (full `prefix=target` lines) into the project's remappings
/// and replace the file. Returns whether the file content changed.
pub fn write_merged(project_dir: &Path, entries: &[String]) -> std::io::Result<bool> {
    let path = project_dir.join(REMAPPINGS_FILE);
    let existing = if path.exists() {
        std::fs::read_to_string(&path)?
    } else {
        String::new()
    };

    let mut merged = parse(&existing);
    merged.extend(parse(&entries.join("\n")));
    let rendered = render(&merged);
    if rendered == existing {
        return Ok(false);
    }
    atomic_write_file(&path, rendered.as_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_noise() {
        let parsed = parse("# comment\n\nforge-std/=lib/forge-std/src/\nbad line\n");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["forge-std/"], "lib/forge-std/src/");
    }

    #[test]
    fn test_merge_overrides_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(REMAPPINGS_FILE),
            "forge-std/=lib/forge-std/src/\n@openzeppelin/contracts/=old/\n",
        )
        .unwrap();

        let entries = vec!["@openzeppelin/contracts/=/cache/lib/openzeppelin-contracts/contracts/".to_string()];
        assert!(write_merged(dir.path(), &entries).unwrap());
        let text = std::fs::read_to_string(dir.path().join(REMAPPINGS_FILE)).unwrap();
        assert_eq!(
            text,
            "@openzeppelin/contracts/=/cache/lib/openzeppelin-contracts/contracts/\nforge-std/=lib/forge-std/src/\n"
        );

        assert!(!write_merged(dir.path(), &entries).unwrap());
    }
}
