use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::backup::warn::{self, WarnEvent};
use crate::error::BackupError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "heic"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaCategory {
    Image,
    Video,
    Other,
}

impl MediaCategory {
    pub fn from_filename(filename: &str) -> Self {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Self::Other;
        };
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Video
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file as seen by one enumeration pass.
#[derive(Debug, Clone)]
pub struct LocalFileRecord {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub category: MediaCategory,
    /// Filesystem modification time captured during the walk.
    pub modified: SystemTime,
}

impl LocalFileRecord {
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            category: MediaCategory::from_filename(&filename),
            filename,
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub files: Vec<LocalFileRecord>,
    pub total_bytes: u64,
    pub unreadable: usize,
}

/// Walk `root` recursively and collect every regular file, sorted by path.
pub fn enumerate(root: &Path, follow_links: bool) -> Result<Enumeration, BackupError> {
    if !root.is_dir() {
        return Err(BackupError::MissingRoot(root.to_path_buf()));
    }

    let mut out = Enumeration::default();
    let walker = WalkDir::new(root)
        .follow_links(follow_links)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                out.unreadable += 1;
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                warn::emit(WarnEvent {
                    code: "WALK_ENTRY_UNREADABLE",
                    stage: "enumerate",
                    path: &path,
                    reason: "directory-entry-skipped",
                    err: &err.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                out.unreadable += 1;
                warn::emit(WarnEvent {
                    code: "STAT_FAILED",
                    stage: "enumerate",
                    path: &entry.path().display().to_string(),
                    reason: "file-skipped",
                    err: &err.to_string(),
                });
                continue;
            }
        };
        let filename = entry.file_name().to_string_lossy().to_string();
        out.total_bytes += meta.len();
        out.files.push(LocalFileRecord {
            path: entry.path().to_path_buf(),
            category: MediaCategory::from_filename(&filename),
            filename,
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(out)
}
