//! Classpath finder.
//!
//! Roots are directories separated by `:`. Entries are yielded with
//! `/`-separated names relative to their root; iteration order is sorted by
//! name so a build is a pure function of classpath content.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct ClasspathFinder {
    roots: Vec<PathBuf>,
}

impl ClasspathFinder {
    pub fn new(classpath: &str) -> Self {
        Self::with_roots(
            classpath
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
        )
    }

    pub fn with_roots(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn add_root(&mut self, root: PathBuf) {
        self.roots.push(root);
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// All `.class` entries across the roots as `(name, bytes)`, sorted by
    /// name. Earlier roots shadow later ones for duplicate names.
    pub fn class_entries(&self) -> io::Result<Vec<(String, Vec<u8>)>> {
        let mut names: Vec<(String, PathBuf)> = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                continue;
            }
            let mut found = Vec::new();
            collect_classes(root, root, &mut found)?;
            for (name, path) in found {
                if !names.iter().any(|(n, _)| *n == name) {
                    names.push((name, path));
                }
            }
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));

        names
            .into_iter()
            .map(|(name, path)| Ok((name, fs::read(path)?)))
            .collect()
    }

    /// Read one entry by name.
    pub fn find(&self, name: &str) -> io::Result<Vec<u8>> {
        for root in &self.roots {
            let path = root.join(name);
            if path.is_file() {
                return fs::read(path);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("classpath entry not found: {name}"),
        ))
    }
}

fn collect_classes(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_classes(root, &path, out)?;
        } else if path.extension().is_some_and(|e| e == "class") {
            let rel = path
                .strip_prefix(root)
                .expect("entry outside its own root");
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((name, path));
        }
    }
    Ok(())
}

/// Compose the effective classpath roots: the argument entries (prefixed
/// when an embed prefix is configured), then the installation's system
/// classes when a VM home is set.
pub fn compose_classpath(
    classpath: &str,
    java_home: Option<&str>,
    embed_prefix: Option<&str>,
) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = classpath
        .split(':')
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let path = Path::new(entry);
            match embed_prefix {
                Some(prefix) if path.is_relative() => Path::new(prefix).join(path),
                _ => path.to_path_buf(),
            }
        })
        .collect();
    if let Some(home) = java_home {
        roots.push(Path::new(home).join("classes"));
    }
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        fs::write(dir.path().join("pkg/sub/B.class"), b"bbb").unwrap();
        fs::write(dir.path().join("A.class"), b"aaa").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let finder = ClasspathFinder::with_roots(vec![dir.path().to_path_buf()]);
        let entries = finder.class_entries().unwrap();
        let names: Vec<_> = entries.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["A.class", "pkg/sub/B.class"]);
        assert_eq!(entries[0].1, b"aaa");
    }

    #[test]
    fn earlier_roots_shadow_later() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(a.path().join("X.class"), b"first").unwrap();
        fs::write(b.path().join("X.class"), b"second").unwrap();

        let finder =
            ClasspathFinder::with_roots(vec![a.path().to_path_buf(), b.path().to_path_buf()]);
        let entries = finder.class_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, b"first");
        assert_eq!(finder.find("X.class").unwrap(), b"first");
    }

    #[test]
    fn find_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let finder = ClasspathFinder::with_roots(vec![dir.path().to_path_buf()]);
        let err = finder.find("nope.class").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn classpath_composition() {
        let roots = compose_classpath("a:/abs/b", Some("/vm"), Some("/prefix"));
        assert_eq!(
            roots,
            vec![
                PathBuf::from("/prefix/a"),
                PathBuf::from("/abs/b"),
                PathBuf::from("/vm/classes"),
            ]
        );
        assert_eq!(compose_classpath("", None, None), Vec::<PathBuf>::new());
    }
}
