//! File-backed append-only logs.

use crate::error::AggregationError;
use crate::storage::row::{format_score, pivot_header, PivotRow, SnapshotRow};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const DECISION_HEADER: &str = "timestamp,score\n";

/// The long-form, pivot and decision logs for one frozen column set.
#[derive(Debug, Clone)]
pub struct LogStore {
    long_path: PathBuf,
    pivot_path: PathBuf,
    decision_path: PathBuf,
    columns: Vec<String>,
    pivot_header: String,
}

impl LogStore {
    /// Bind the logs to `columns` and write missing headers.
    ///
    /// An existing pivot log whose header names another column set is moved
    /// aside to `<stem>.<unix-seconds>.csv` (with a `.<n>` suffix when that
    /// name is taken) so its rows stay readable.
    pub fn open(
        long_path: PathBuf,
        pivot_path: PathBuf,
        decision_path: PathBuf,
        columns: Vec<String>,
    ) -> io::Result<Self> {
        let store = Self {
            pivot_header: pivot_header(&columns),
            long_path,
            pivot_path,
            decision_path,
            columns,
        };

        if let Some(existing) = read_first_line(&store.pivot_path)? {
            if existing != store.pivot_header.trim_end() {
                let aside = rotated_path(&store.pivot_path);
                tracing::warn!(
                    path = %store.pivot_path.display(),
                    moved_to = %aside.display(),
                    "pivot log columns changed, starting a new file"
                );
                move_aside(&store.pivot_path, &aside)?;
            }
        }

        append_with_header(&store.pivot_path, &store.pivot_header, "")?;
        append_with_header(&store.decision_path, DECISION_HEADER, "")?;
        Ok(store)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn pivot_path(&self) -> &Path {
        &self.pivot_path
    }

    pub fn long_path(&self) -> &Path {
        &self.long_path
    }

    pub fn decision_path(&self) -> &Path {
        &self.decision_path
    }

    /// Append one tick to the long-form and pivot logs.
    pub fn append_row(&self, row: &SnapshotRow) -> Result<(), AggregationError> {
        append(&self.long_path, &row.long_lines()).map_err(|source| AggregationError::Io {
            log: "long-form",
            source,
        })?;
        append_with_header(&self.pivot_path, &self.pivot_header, &row.pivot_line()).map_err(
            |source| AggregationError::Io {
                log: "pivot",
                source,
            },
        )
    }

    pub fn append_decision(&self, timestamp: &str, score: f64) -> Result<(), AggregationError> {
        let line = format!("{timestamp},{}\n", format_score(score));
        append_with_header(&self.decision_path, DECISION_HEADER, &line).map_err(|source| {
            AggregationError::Io {
                log: "decision",
                source,
            }
        })
    }

    /// Up to `n` newest well-formed pivot rows, oldest first.
    pub fn read_pivot_tail(&self, n: usize) -> io::Result<Vec<PivotRow>> {
        let file = match File::open(&self.pivot_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut tail = VecDeque::with_capacity(n);
        for line in BufReader::new(file).lines().skip(1) {
            let line = line?;
            match PivotRow::parse(&line, self.columns.len()) {
                Some(row) => {
                    if tail.len() == n {
                        tail.pop_front();
                    }
                    if n > 0 {
                        tail.push_back(row);
                    }
                }
                None => tracing::debug!(line = %line, "skipping malformed pivot row"),
            }
        }
        Ok(tail.into())
    }
}

fn append(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(contents.as_bytes())
}

/// Append `contents`, prefixed by `header` when the file is absent or empty.
fn append_with_header(path: &Path, header: &str, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if file.metadata()?.len() == 0 {
        let mut buf = String::with_capacity(header.len() + contents.len());
        buf.push_str(header);
        buf.push_str(contents);
        file.write_all(buf.as_bytes())
    } else if contents.is_empty() {
        Ok(())
    } else {
        file.write_all(contents.as_bytes())
    }
}

fn read_first_line(path: &Path) -> io::Result<Option<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut line = String::new();
    if BufReader::new(file).read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// First unused `<stem>.<unix-seconds>[.<n>].csv` next to `path`.
fn rotated_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data_pivot");
    let secs = chrono::Utc::now().timestamp();

    let mut candidate = path.with_file_name(format!("{stem}.{secs}.csv"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{stem}.{secs}.{n}.csv"));
        n += 1;
    }
    candidate
}

/// Move `from` to `to` without replacing an existing file.
fn move_aside(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => fs::remove_file(from),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        // Filesystems without hard links.
        Err(_) if !to.exists() => fs::rename(from, to),
        Err(e) => Err(e),
    }
}
