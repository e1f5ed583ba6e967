//! The fixture tree materialized at `/app/test` for filesystem-heavy tests.
//!
//! The layout and file contents are part of the external grading contract:
//! test expectations are written against these exact bytes, so the tree is
//! generated in code rather than copied from an operator-supplied directory.

use std::fs;
use std::io;
use std::path::Path;

/// `(relative path, line count)` for every file in the tree. Directories are
/// created as needed. `fileN.txt` always holds N lines.
const FIXTURE_FILES: &[(&str, u32)] = &[
    ("file4.txt", 4),
    ("file5.txt", 5),
    ("folder1/file1.txt", 1),
    ("folder1/folder4/file2.txt", 2),
    ("folder1/folder4/folder5/file3.txt", 3),
    ("folder2/file6.txt", 6),
    ("folder3/file7.txt", 7),
    ("folder3/file8.txt", 8),
    ("folder3/file9.txt", 9),
];

/// Write the fixture tree under `dir`.
pub fn materialize(dir: &Path) -> io::Result<()> {
    for (relative, lines) in FIXTURE_FILES {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        fs::write(&path, file_contents(&name, *lines))?;
    }
    Ok(())
}

fn file_contents(name: &str, lines: u32) -> String {
    let mut contents = format!("This is {name}! I have {lines} lines. This is line 1.\n");
    for line in 2..=lines {
        contents.push_str(&format!("This is line {line}.\n"));
    }
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn file_contents_follow_the_pattern() {
        assert_eq!(
            file_contents("file3.txt", 3),
            "This is file3.txt! I have 3 lines. This is line 1.\nThis is line 2.\nThis is line 3.\n"
        );
        assert_eq!(
            file_contents("file1.txt", 1),
            "This is file1.txt! I have 1 lines. This is line 1.\n"
        );
    }

    #[test]
    fn materialize_writes_nine_files_in_six_folders() {
        let tmp = TempDir::new().expect("tempdir");
        materialize(tmp.path()).expect("materialize");

        let deepest = tmp.path().join("folder1/folder4/folder5/file3.txt");
        let contents = fs::read_to_string(&deepest).expect("read file3");
        assert!(contents.starts_with("This is file3.txt! I have 3 lines."));
        assert_eq!(contents.lines().count(), 3);

        for (relative, _) in FIXTURE_FILES {
            assert!(tmp.path().join(relative).is_file(), "{relative} missing");
        }
    }

    #[test]
    fn materialize_is_byte_stable() {
        let first = TempDir::new().expect("tempdir");
        let second = TempDir::new().expect("tempdir");
        materialize(first.path()).expect("materialize");
        materialize(second.path()).expect("materialize");
        for (relative, _) in FIXTURE_FILES {
            let a = fs::read(first.path().join(relative)).expect("read");
            let b = fs::read(second.path().join(relative)).expect("read");
            assert_eq!(a, b, "{relative} differs between runs");
        }
    }
}
