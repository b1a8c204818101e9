use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Dir,
}

/// One directory entry. Symlinks are classified by the link itself, not the
/// target; loop detection is explicitly out of scope.
#[derive(Debug)]
pub struct Entry {
    pub path: PathBuf,
    pub size: u64,
    pub kind: EntryKind,
}

/// Lazy one-level walk over a directory, `.` and `..` excluded, paths
/// anchored at the canonicalized root.
pub struct Walker {
    inner: fs::ReadDir,
}

impl Walker {
    pub fn open<P: AsRef<Path>>(root: P) -> io::Result<Walker> {
        let root = fs::canonicalize(root)?;
        Ok(Walker {
            inner: fs::read_dir(root)?,
        })
    }
}

impl Iterator for Walker {
    type Item = io::Result<Entry>;

    fn next(&mut self) -> Option<io::Result<Entry>> {
        let entry = match self.inner.next()? {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err)),
        };
        let path = entry.path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) => return Some(Err(err)),
        };
        let kind = if meta.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        Some(Ok(Entry {
            path,
            size: meta.len(),
            kind,
        }))
    }
}

/// Renders a one-level listing, terminated by a `.` line of its own.
pub fn list_dir<P: AsRef<Path>>(root: P) -> io::Result<String> {
    let mut out = String::new();
    for entry in Walker::open(root)? {
        push_line(&mut out, &entry?);
    }
    out.push_str(".\r\n");
    Ok(out)
}

/// Renders a depth-first listing of the whole tree; the contents of a
/// subdirectory come before the subdirectory's own line. The `.` terminator
/// appears once, at the outermost level.
pub fn list_tree<P: AsRef<Path>>(root: P) -> io::Result<String> {
    let mut out = String::new();
    walk_tree(root.as_ref(), &mut out)?;
    out.push_str(".\r\n");
    Ok(out)
}

fn walk_tree(root: &Path, out: &mut String) -> io::Result<()> {
    for entry in Walker::open(root)? {
        let entry = entry?;
        if entry.kind == EntryKind::Dir {
            walk_tree(&entry.path, out)?;
        }
        push_line(out, &entry);
    }
    Ok(())
}

fn push_line(out: &mut String, entry: &Entry) {
    let _ = write!(out, "{:<15} {}\r\n", entry.size, entry.path.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs::File;
    use std::io::Write as _;

    fn touch(path: &Path, content: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(content).unwrap();
    }

    #[test]
    fn test_empty_directory_lists_terminator_only() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(list_dir(dir.path()).unwrap(), ".\r\n");
    }

    #[test]
    fn test_one_level_yields_each_entry_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.txt"), b"aaaa");
        touch(&dir.path().join("b.txt"), b"bb");
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub").join("nested"), b"n");

        let names: HashSet<String> = Walker::open(dir.path())
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path
                    .file_name()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        // One level only: the nested file stays hidden.
        let expected: HashSet<String> = ["a.txt", "b.txt", "sub"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_sizes_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("four"), b"1234");
        fs::create_dir(dir.path().join("sub")).unwrap();

        for entry in Walker::open(dir.path()).unwrap() {
            let entry = entry.unwrap();
            match entry.path.file_name().unwrap().to_str().unwrap() {
                "four" => {
                    assert_eq!(entry.kind, EntryKind::File);
                    assert_eq!(entry.size, 4);
                }
                "sub" => assert_eq!(entry.kind, EntryKind::Dir),
                other => panic!("unexpected entry {}", other),
            }
        }
    }

    #[test]
    fn test_line_format() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("f"), b"12345");

        let listing = list_dir(dir.path()).unwrap();
        let line = listing.split("\r\n").next().unwrap();
        // 15-wide left-justified size, separator space, then the path.
        assert!(line.starts_with(&format!("{:<15} ", 5)));
        assert!(line.ends_with("/f"));
        assert!(listing.ends_with(".\r\n"));
    }

    #[test]
    fn test_recursive_covers_every_leaf_once() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("top"), b"t");
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub").join("inner"), b"in");
        fs::create_dir(dir.path().join("sub").join("deep")).unwrap();
        touch(&dir.path().join("sub").join("deep").join("leaf"), b"lll");

        let listing = list_tree(dir.path()).unwrap();
        let lines: Vec<&str> = listing.split("\r\n").collect();
        let position = |name: &str| {
            let suffix = format!("/{}", name);
            let hits: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| line.ends_with(&suffix))
                .map(|(idx, _)| idx)
                .collect();
            assert_eq!(hits.len(), 1, "entry {} must appear exactly once", name);
            hits[0]
        };

        let top = position("top");
        let inner = position("inner");
        let leaf = position("leaf");
        let sub = position("sub");
        let deep = position("deep");

        // Subdirectory contents precede the subdirectory's own line.
        assert!(leaf < deep);
        assert!(deep < sub);
        assert!(inner < sub);
        assert!(top < lines.len());

        // Exactly one terminator line, at the end.
        assert_eq!(lines.iter().filter(|line| **line == ".").count(), 1);
        assert!(listing.ends_with(".\r\n"));
    }
}
