//! Submodule metadata repair for the library cache
//!
//! Installs are git submodules under `<cache>/lib/`. Interrupted installs and
//! manual edits leave records that make later installs fail for reasons that
//! have nothing to do with the library, so they are repaired first:
//! - `.gitmodules` entries whose path no longer exists are dropped
//! - entries whose path is outside `lib/` are relocated when the checkout
//!   exists under `lib/`, dropped otherwise
//! - `.git/modules/lib/<name>` directories with no matching entry are removed

use crate::fs_atomic::atomic_write_file;
use std::fs;
use std::path::Path;
use tracing::info;

pub const GITMODULES_FILE: &str = ".gitmodules";

/// One `[submodule "..."]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleRecord {
    pub name: String,
    pub path: Option<String>,
    pub url: Option<String>,
    /// Raw `key = value` lines in the order they appeared
    lines: Vec<(String, String)>,
}

impl SubmoduleRecord {
    fn render(&self) -> String {
        let mut out = format!("[submodule \"{}\"]\n", self.name);
        for (key, value) in &self.lines {
            out.push_str(&format!("\t{key} = {value}\n"));
        }
        out
    }

    fn set_path(&mut self, path: &str) {
        self.path = Some(path.to_string());
        for (key, value) in &mut self.lines {
            if key == "path" {
                *value = path.to_string();
            }
        }
    }
}

pub fn parse_gitmodules(text: &str) -> Vec<SubmoduleRecord> {
    let mut records: Vec<SubmoduleRecord> = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("[submodule") {
            let name = rest
                .trim()
                .trim_end_matches(']')
                .trim()
                .trim_matches('"')
                .to_string();
            records.push(SubmoduleRecord {
                name,
                path: None,
                url: None,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(current) = records.last_mut() else {
            continue;
        };
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            match key.as_str() {
                "path" => current.path = Some(value.clone()),
                "url" => current.url = Some(value.clone()),
                _ => {}
            }
            current.lines.push((key, value));
        }
    }
    records
}

pub fn render_gitmodules(records: &[SubmoduleRecord]) -> String {
    records.iter().map(SubmoduleRecord::render).collect()
}

/// Repair submodule metadata under `root`. Returns one line per repair.
pub fn repair_vcs_metadata(root: &Path) -> std::io::Result<Vec<String>> {
    let mut repairs = Vec::new();
    let gitmodules = root.join(GITMODULES_FILE);

    let mut kept: Vec<SubmoduleRecord> = Vec::new();
    if gitmodules.exists() {
        let original = fs::read_to_string(&gitmodules)?;
        let records = parse_gitmodules(&original);
        let total = records.len();

        for mut record in records {
            let Some(path) = record.path.clone() else {
                repairs.push(format!("dropped submodule '{}' with no path", record.name));
                continue;
            };
            if !path.starts_with("lib/") {
                let base = Path::new(&path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&record.name)
                    .to_string();
                let relocated = format!("lib/{base}");
                if root.join(&relocated).exists() {
                    record.set_path(&relocated);
                    repairs.push(format!("relocated submodule '{}' from {path} to {relocated}", record.name));
                    kept.push(record);
                } else {
                    repairs.push(format!("dropped misplaced submodule '{}' at {path}", record.name));
                }
                continue;
            }
            if !root.join(&path).exists() {
                repairs.push(format!("dropped stale submodule '{}' ({path} missing)", record.name));
                continue;
            }
            kept.push(record);
        }

        if kept.len() != total || repairs.iter().any(|r| r.starts_with("relocated")) {
            if kept.is_empty() {
                fs::remove_file(&gitmodules)?;
            } else {
                atomic_write_file(&gitmodules, render_gitmodules(&kept).as_bytes())?;
            }
        }
    }

    let modules_dir = root.join(".git").join("modules").join("lib");
    if modules_dir.is_dir() {
        for entry in fs::read_dir(&modules_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let expected = format!("lib/{name}");
            if kept.iter().any(|r| r.path.as_deref() == Some(expected.as_str())) {
                continue;
            }
            fs::remove_dir_all(entry.path())?;
            repairs.push(format!("removed orphan module metadata .git/modules/lib/{name}"));
        }
    }

    for repair in &repairs {
        info!(root = %root.display(), "{}", repair);
    }
    Ok(repairs)
}
