//! Bounded file reads for prompt assembly.
//!
//! Every file that reaches a prompt is read through [`read_head`], which
//! caps the number of bytes taken from the *start* of the file. The cap
//! bounds worst-case prompt size; tails are never sampled.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Default per-file byte budget.
pub const DEFAULT_MAX_BYTES: usize = 8192;

/// Read at most `max_bytes` from the beginning of `path`.
///
/// `None` reads the whole file. Invalid UTF-8 is replaced rather than
/// rejected so a single binary-ish file cannot abort a traversal.
pub fn read_head<P: AsRef<Path>>(path: P, max_bytes: Option<usize>) -> Result<String> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;

    let mut buf = Vec::new();
    match max_bytes {
        Some(cap) => {
            file.take(cap as u64)
                .read_to_end(&mut buf)
                .with_context(|| format!("Failed to read file {}", path.display()))?;
        }
        None => {
            let mut file = file;
            file.read_to_end(&mut buf)
                .with_context(|| format!("Failed to read file {}", path.display()))?;
        }
    }

    let mut text = match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => {
            let cut_char = e
                .utf8_error()
                .error_len()
                .is_none();
            let valid = e
                .utf8_error()
                .valid_up_to();
            let mut bytes = e.into_bytes();
            // A character split by the cap is dropped, not replaced.
            if cut_char && max_bytes.is_some() {
                bytes.truncate(valid);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };
    // Replacement characters are wider than the bytes they stand for.
    if let Some(cap) = max_bytes
        && text.len() > cap
    {
        let mut end = cap;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    Ok(text)
}

/// Count lines the way a diff hunk header does: a trailing newline does
/// not open a new line, and an empty text has zero lines.
pub fn line_count(text: &str) -> usize {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    let nl = memchr::memchr_iter(b'\n', bytes).count();
    if bytes.ends_with(b"\n") { nl } else { nl + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_head_truncates_from_start() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("big.txt");
        let body: String = (0..1000).map(|i| format!("{i:04}\n")).collect();
        std::fs::write(&path, &body)?;

        let head = read_head(&path, Some(64))?;
        assert_eq!(head.len(), 64);
        assert_eq!(head, body[..64]);
        Ok(())
    }

    #[test]
    fn test_read_head_small_file_untouched() -> Result<()> {
        let tmp = TempDir::new()?;
        let path = tmp.path().join("small.txt");
        std::fs::write(&path, "hello")?;

        assert_eq!(read_head(&path, Some(8192))?, "hello");
        assert_eq!(read_head(&path, None)?, "hello");
        Ok(())
    }

    #[test]
    fn test_read_head_never_exceeds_cap() -> Result<()> {
        let tmp = TempDir::new()?;
        let accents = tmp.path().join("accents.txt");
        std::fs::write(&accents, "é".repeat(100))?;

        let head = read_head(&accents, Some(9))?;
        assert_eq!(head, "éééé");
        assert_eq!(head.len(), 8);

        let binary = tmp.path().join("blob.bin");
        std::fs::write(&binary, [0xFFu8; 16])?;
        let head = read_head(&binary, Some(10))?;
        assert!(head.len() <= 10);
        assert!(head.chars().all(|c| c == char::REPLACEMENT_CHARACTER));
        Ok(())
    }

    #[test]
    fn test_line_count() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("a"), 1);
        assert_eq!(line_count("a\n"), 1);
        assert_eq!(line_count("a\nb\nc"), 3);
        assert_eq!(line_count("a\r\nb\r\n"), 2);
    }
}
