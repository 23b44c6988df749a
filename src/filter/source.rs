//! Rule list sources and offset-based line resolution.
//!
//! The index stores file offsets, not rule text; this module reads the text
//! back. On-disk sources are memory-mapped once per match call, after an
//! mtime freshness check. In-memory sources never go stale.

use memmap2::Mmap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;

#[derive(Debug)]
pub(crate) enum FilterSource {
    Memory {
        data: String,
    },
    Disk {
        path: PathBuf,
        /// Modification time recorded when the filter was loaded
        mtime: Option<SystemTime>,
    },
}

pub(crate) fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn trim_line_end(line: &str) -> &str {
    line.trim_end_matches(|c| c == '\r' || c == '\n')
}

impl FilterSource {
    pub fn memory(data: String) -> Self {
        FilterSource::Memory { data }
    }

    pub fn disk(path: impl Into<PathBuf>) -> Self {
        FilterSource::Disk {
            path: path.into(),
            mtime: None,
        }
    }

    /// Record the backing file's current mtime as the freshness baseline.
    pub fn refresh_mtime(&mut self) {
        if let FilterSource::Disk { path, mtime } = self {
            *mtime = modification_time(path);
        }
    }

    /// Check whether the backing file changed since the mtime was recorded.
    pub fn is_outdated(&self) -> bool {
        match self {
            FilterSource::Memory { .. } => false,
            FilterSource::Disk { path, mtime } => {
                let current = modification_time(path);
                current.is_none() || current != *mtime
            }
        }
    }

    /// Iterate over lines, passing each line's starting byte offset. The
    /// callback returns `false` to stop early.
    pub fn for_each_line<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u32, &str) -> bool,
    {
        match self {
            FilterSource::Memory { data } => {
                let mut offset = 0usize;
                for chunk in data.split_inclusive('\n') {
                    if !f(offset as u32, trim_line_end(chunk)) {
                        break;
                    }
                    offset += chunk.len();
                }
                Ok(())
            }
            FilterSource::Disk { path, .. } => {
                let file = File::open(path)?;
                let mut reader = BufReader::new(file);
                let mut buf = String::new();
                let mut offset = 0usize;
                loop {
                    buf.clear();
                    let n = reader.read_line(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    if !f(offset as u32, trim_line_end(&buf)) {
                        break;
                    }
                    offset += n;
                }
                Ok(())
            }
        }
    }
}

fn line_at(data: &str, offset: usize) -> Option<&str> {
    let rest = data.get(offset..)?;
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim_end_matches('\r'))
}

/// Resolves file offsets back to rule text during one match call.
///
/// The first on-disk read verifies the file's mtime; a mismatch marks the
/// whole run `outdated` and every further read returns `None`.
pub(crate) struct LineReader<'a> {
    source: &'a FilterSource,
    map: Option<Mmap>,
    pub outdated: bool,
    failed: bool,
}

impl<'a> LineReader<'a> {
    pub fn new(source: &'a FilterSource) -> Self {
        Self {
            source,
            map: None,
            outdated: false,
            failed: false,
        }
    }

    pub fn read_line(&mut self, offset: u32) -> Option<String> {
        if self.outdated || self.failed {
            return None;
        }

        match self.source {
            FilterSource::Memory { data } => line_at(data, offset as usize).map(str::to_string),
            FilterSource::Disk { path, mtime } => {
                if self.map.is_none() {
                    if modification_time(path) != *mtime {
                        self.outdated = true;
                        return None;
                    }
                    let file = match File::open(path) {
                        Ok(f) => f,
                        Err(e) => {
                            log::error!(
                                "failed to open {} to match a domain: {}",
                                path.display(),
                                e
                            );
                            self.failed = true;
                            return None;
                        }
                    };
                    match unsafe { Mmap::map(&file) } {
                        Ok(map) => self.map = Some(map),
                        Err(e) => {
                            log::error!("failed to map {}: {}", path.display(), e);
                            self.failed = true;
                            return None;
                        }
                    }
                }

                let map = self.map.as_ref()?;
                let bytes = map.get(offset as usize..)?;
                let end = bytes
                    .iter()
                    .position(|&b| b == b'\n')
                    .unwrap_or(bytes.len());
                std::str::from_utf8(&bytes[..end])
                    .ok()
                    .map(|s| s.trim_end_matches('\r').to_string())
            }
        }
    }
}
