//! Temporary locations for tests that read responses from local files.

use std::path::PathBuf;

/// Creates a temporary directory for test output.
///
/// The directory is automatically cleaned up when the returned `TempDir` is dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temporary test directory")
}

/// Writes `contents` to `name` inside `dir` and returns the full path.
pub fn write_test_file(dir: &tempfile::TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).expect("Failed to write test file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_test_dir() {
        let dir = temp_test_dir();
        assert!(dir.path().exists());
    }

    #[test]
    fn test_write_test_file() {
        let dir = temp_test_dir();
        let path = write_test_file(&dir, "sample.dods", b"abc");
        assert_eq!(std::fs::read(path).unwrap(), b"abc");
    }
}
