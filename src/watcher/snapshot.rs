//! Point-in-time filesystem snapshots: file counting, bounded-depth
//! directory trees, and the `.claude` config packet.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::{is_excluded_dir, is_hidden};

/// A file or directory in the tree response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    /// Path relative to the tree root, forward-slash separated.
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<FileNode>,
    #[serde(skip_serializing_if = "size_is_zero", default)]
    pub size: u64,
}

fn size_is_zero(size: &u64) -> bool {
    *size == 0
}

/// One collected `.claude` markdown file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Path relative to `.claude`, forward-slash separated.
    pub name: String,
    pub content: String,
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Count every non-excluded file under `root`. Errors on individual
/// entries are swallowed; those entries are skipped.
pub fn count_files(root: &Path) -> u64 {
    let mut count = 0;
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            if entry.path() == root {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_dir() {
                !is_excluded_dir(&name) && (!is_hidden(&name) || name == ".claude")
            } else {
                // Hidden files are skipped unless they live inside .claude.
                !is_hidden(&name) || relative_path(root, entry.path()).starts_with(".claude")
            }
        });

    for entry in walker {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_file() {
            count += 1;
        }
    }
    count
}

/// Build a directory tree rooted at `root`, at most `max_depth` levels
/// deep. At each level directories come first, then files, each group in
/// listing order. Directories at the depth limit carry no children.
pub fn build_file_tree(root: &Path, max_depth: usize) -> Vec<FileNode> {
    build_tree_level(root, root, 0, max_depth)
}

fn build_tree_level(root: &Path, dir: &Path, depth: usize, max_depth: usize) -> Vec<FileNode> {
    if depth >= max_depth {
        return Vec::new();
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded_dir(&name) || (is_hidden(&name) && name != ".claude") {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            dirs.push((name, entry));
        } else {
            files.push((name, entry));
        }
    }

    let mut nodes = Vec::with_capacity(dirs.len() + files.len());

    for (name, entry) in dirs {
        let path = entry.path();
        nodes.push(FileNode {
            name,
            path: relative_path(root, &path),
            is_dir: true,
            children: build_tree_level(root, &path, depth + 1, max_depth),
            size: 0,
        });
    }

    for (name, entry) in files {
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        nodes.push(FileNode {
            name,
            path: relative_path(root, &entry.path()),
            is_dir: false,
            children: Vec::new(),
            size,
        });
    }

    nodes
}

/// Collect every `*.md` file under `<work_dir>/.claude`, recursively.
/// Returns an empty list when the directory does not exist; unreadable
/// files are skipped.
pub fn read_claude_config(work_dir: &Path) -> Vec<ConfigFile> {
    let claude_dir = work_dir.join(".claude");
    if !claude_dir.is_dir() {
        return Vec::new();
    }

    let mut configs = Vec::new();
    for entry in WalkDir::new(&claude_dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if !entry.file_name().to_string_lossy().ends_with(".md") {
            continue;
        }
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        configs.push(ConfigFile {
            name: relative_path(&claude_dir, entry.path()),
            content,
        });
    }
    configs
}
