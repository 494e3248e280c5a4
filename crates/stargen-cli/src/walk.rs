//! Enumerate candidate directories and their files.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

/// One directory to generate: its repo-relative path and the files directly
/// inside it (relative to the directory).
#[derive(Debug)]
pub struct Directory {
    pub rel: String,
    pub files: Vec<String>,
}

/// Walk the repository, honoring gitignore, and group files by their parent
/// directory. `paths` restricts the walk to the given repo-relative
/// subtrees (empty = whole repo). Directories come back sorted, parents
/// before children.
pub fn collect_directories(root: &Path, paths: &[String]) -> Result<Vec<Directory>> {
    let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    by_dir.insert(String::new(), Vec::new());

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .build();

    for entry in walker.flatten() {
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        if rel_str.is_empty() {
            continue;
        }

        if !paths.is_empty() && !paths.iter().any(|p| in_subtree(&rel_str, p)) {
            continue;
        }

        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if is_dir {
            by_dir.entry(rel_str).or_default();
            continue;
        }

        let filename = rel_str.rsplit('/').next().unwrap_or(&rel_str).to_string();
        // BUILD files are read for directives, never claimed as sources.
        if filename == "BUILD" || filename == "BUILD.bazel" {
            continue;
        }

        let dir = match rel_str.rsplit_once('/') {
            Some((dir, _)) => dir.to_string(),
            None => String::new(),
        };
        by_dir.entry(dir).or_default().push(filename);
    }

    Ok(by_dir
        .into_iter()
        .map(|(rel, mut files)| {
            files.sort();
            Directory { rel, files }
        })
        .collect())
}

fn in_subtree(rel: &str, subtree: &str) -> bool {
    let subtree = subtree.trim_matches('/');
    subtree.is_empty() || rel == subtree || rel.starts_with(&format!("{subtree}/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn groups_files_by_directory() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.js");
        touch(tmp.path(), "lib/b.js");
        touch(tmp.path(), "lib/sub/c.js");
        touch(tmp.path(), "lib/BUILD.bazel");

        let dirs = collect_directories(tmp.path(), &[]).unwrap();
        let rels: Vec<&str> = dirs.iter().map(|d| d.rel.as_str()).collect();
        assert_eq!(rels, ["", "lib", "lib/sub"]);

        let lib = dirs.iter().find(|d| d.rel == "lib").unwrap();
        // The BUILD file itself is not a candidate source.
        assert_eq!(lib.files, ["b.js"]);
    }

    #[test]
    fn path_restriction_limits_the_walk() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "a.js");
        touch(tmp.path(), "lib/b.js");
        touch(tmp.path(), "app/c.js");

        let dirs =
            collect_directories(tmp.path(), &["lib".to_string()]).unwrap();
        let rels: Vec<&str> = dirs.iter().map(|d| d.rel.as_str()).collect();
        // The root entry is always present for config inheritance.
        assert_eq!(rels, ["", "lib"]);
    }
}
