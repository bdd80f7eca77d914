//! File-backed [`ResumeStore`], persisting offsets as plain `MID OFFSET` lines so a restart
//! doesn't re-send or re-request bytes already transferred.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fbbcore::resume::ResumeStore;

pub struct FileResumeStore {
    path: PathBuf,
    offsets: HashMap<String, usize>,
}

impl FileResumeStore {
    /// Load existing offsets from `path` if it exists; a missing file is treated as empty.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut offsets = HashMap::new();
        match fs::read_to_string(&path) {
            Ok(contents) => {
                for line in contents.lines() {
                    let mut parts = line.split_whitespace();
                    if let (Some(mid), Some(offset)) = (parts.next(), parts.next()) {
                        if let Ok(offset) = offset.parse() {
                            offsets.insert(mid.to_string(), offset);
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(FileResumeStore { path, offsets })
    }

    fn flush(&self) -> std::io::Result<()> {
        let mut out = String::new();
        for (mid, offset) in &self.offsets {
            out.push_str(&format!("{} {}\n", mid, offset));
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(out.as_bytes())
    }
}

impl ResumeStore for FileResumeStore {
    fn offset_for(&self, mid: &str) -> Option<usize> {
        self.offsets.get(mid).copied()
    }

    fn record_offset(&mut self, mid: &str, offset: usize) {
        self.offsets.insert(mid.to_string(), offset);
        if let Err(e) = self.flush() {
            log::warn!("failed to persist resume offset for {}: {}", mid, e);
        }
    }
}
