//! Line scanner for append-only JSONL archives.
//!
//! Reads from a byte offset to EOF with a 1 MiB initial buffer, rejecting
//! any single line longer than 10 MiB. The offset returned always points just
//! past the last line handed to the callback, so a later call can resume with
//! `seek` instead of re-reading the file.
//!
//! An unterminated final line is only consumed when it already decodes as
//! JSON; otherwise the writer is assumed to be mid-append and the line is
//! left for the next pass.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Initial read buffer size.
pub const INITIAL_BUFFER_BYTES: usize = 1024 * 1024;

/// Longest accepted line.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Outcome of a scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    /// Offset just past the last consumed line
    pub offset: u64,
    /// Lines handed to the callback
    pub lines: usize,
}

/// Scan `path` from `start` to EOF, calling `on_line` for every complete line.
///
/// Blank lines are consumed but not reported. On `LineTooLong` or an I/O
/// error the callback has already seen every line before the failure.
pub fn scan_lines<F>(
    path: &Path,
    start: u64,
    cancel: Option<&CancellationToken>,
    mut on_line: F,
) -> Result<ScanProgress>
where
    F: FnMut(&str),
{
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.to_path_buf())
        } else {
            Error::Io(e)
        }
    })?;

    let mut reader = BufReader::with_capacity(INITIAL_BUFFER_BYTES, file);
    if start > 0 {
        reader.seek(SeekFrom::Start(start))?;
    }

    let mut progress = ScanProgress {
        offset: start,
        lines: 0,
    };
    let mut buf: Vec<u8> = Vec::new();

    loop {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }

        buf.clear();
        let terminated = read_line_capped(&mut reader, &mut buf, path)?;
        if buf.is_empty() {
            break;
        }

        let consumed = buf.len() as u64;
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);

        if !terminated && serde_json::from_str::<serde::de::IgnoredAny>(line).is_err() {
            // Partial write in progress
            break;
        }

        progress.offset += consumed;
        if !line.trim().is_empty() {
            progress.lines += 1;
            on_line(line);
        }

        if !terminated {
            break;
        }
    }

    Ok(progress)
}

/// Read one line (including its `\n`) into `buf`.
///
/// Returns whether the line was newline-terminated.
fn read_line_capped<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, path: &Path) -> Result<bool> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(false);
        }

        let (chunk_len, found) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if buf.len() + chunk_len > MAX_LINE_BYTES + 1 {
            return Err(Error::LineTooLong {
                path: path.to_path_buf(),
                limit: MAX_LINE_BYTES,
            });
        }

        buf.extend_from_slice(&available[..chunk_len]);
        reader.consume(chunk_len);

        if found {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collect(path: &Path, start: u64) -> (Vec<String>, ScanProgress) {
        let mut lines = Vec::new();
        let progress = scan_lines(path, start, None, |l| lines.push(l.to_string())).unwrap();
        (lines, progress)
    }

    #[test]
    fn test_scan_reports_lines_and_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{\"a\":1}}\n\n{{\"b\":2}}\n").unwrap();
        f.flush().unwrap();

        let (lines, progress) = collect(f.path(), 0);
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert_eq!(progress.offset, 17);
        assert_eq!(progress.lines, 2);
    }

    #[test]
    fn test_scan_resumes_from_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{\"a\":1}}\n").unwrap();
        f.flush().unwrap();
        let (_, first) = collect(f.path(), 0);

        write!(f, "{{\"b\":2}}\n").unwrap();
        f.flush().unwrap();
        let (lines, second) = collect(f.path(), first.offset);
        assert_eq!(lines, vec![r#"{"b":2}"#]);
        assert_eq!(second.offset, 16);
    }

    #[test]
    fn test_partial_trailing_line_is_left_unconsumed() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{\"a\":1}}\n{{\"b\":").unwrap();
        f.flush().unwrap();

        let (lines, progress) = collect(f.path(), 0);
        assert_eq!(lines.len(), 1);
        assert_eq!(progress.offset, 8);
    }

    #[test]
    fn test_complete_unterminated_line_is_consumed() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{\"a\":1}}\n{{\"b\":2}}").unwrap();
        f.flush().unwrap();

        let (lines, progress) = collect(f.path(), 0);
        assert_eq!(lines.len(), 2);
        assert_eq!(progress.offset, 15);
    }

    #[test]
    fn test_line_too_long() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{\"ok\":true}}").unwrap();
        let big = "x".repeat(MAX_LINE_BYTES + 10);
        writeln!(f, "{}", big).unwrap();
        f.flush().unwrap();

        let mut seen = 0;
        let err = scan_lines(f.path(), 0, None, |_| seen += 1).unwrap_err();
        assert!(matches!(err, Error::LineTooLong { .. }));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_cancelled_scan() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{{}}").unwrap();
        f.flush().unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = scan_lines(f.path(), 0, Some(&token), |_| {}).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = scan_lines(Path::new("/nonexistent/agentlog.jsonl"), 0, None, |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
