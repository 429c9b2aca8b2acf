//! Error detection in captured process output.
//!
//! Tools invoked by external services often exit with 0 after printing an
//! error, so captured streams are scanned line by line as well.

use std::io;
use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

const ERROR_MARKERS: [&str; 2] = ["error", "exception"];

/// Whether a non-blank line mentions an error marker, ignoring case
pub fn is_error_line(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    let lower = line.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Error lines of the file at `path`; a missing file has none
pub async fn scan_for_errors(path: &Path) -> io::Result<Vec<String>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut lines = BufReader::new(file).lines();
    let mut errors = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if is_error_line(&line) {
            errors.push(line);
        }
    }
    Ok(errors)
}
