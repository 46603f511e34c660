//! Resume sidecar: the on-disk log of blocks already written.
//!
//! `<dest>.ferry-progress` starts with a header naming the file it belongs
//! to, followed by one decimal offset per line, appended after each block
//! write completes:
//!
//! ```text
//! ferry-progress 1 <hash hex> <size> <block size>
//! 0
//! 32768
//! ```
//!
//! A sidecar whose header does not match the incoming metadata is stale
//! and ignored. A torn last line (crash mid-append) is dropped on load.

use crate::FileMetaData;
use crate::chunker::BlockSkipList;
use crate::error::FilesResult;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use std::io::SeekFrom;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MAGIC_HEADER: &str = "ferry-progress";
const FORMAT_VERSION: u32 = 1;
const SUFFIX: &str = ".ferry-progress";

/// Sidecar path for a destination file.
#[must_use]
pub fn sidecar_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(SUFFIX);
    PathBuf::from(name)
}

fn header(meta: &FileMetaData) -> String {
    format!(
        "{MAGIC_HEADER} {FORMAT_VERSION} {} {} {}",
        meta.hash, meta.size, meta.block_size
    )
}

/// Load the skip list for `dest`, if a matching sidecar and the
/// destination both exist.
///
/// # Errors
///
/// Returns `FilesError::Io` for read failures other than a missing file.
pub async fn load(dest: &Path, meta: &FileMetaData) -> FilesResult<Option<BlockSkipList>> {
    let path = sidecar_path(dest);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if !tokio::fs::try_exists(dest).await.unwrap_or(false) {
        debug!("Ignoring sidecar {}: destination missing", path.display());
        return Ok(None);
    }

    let mut lines = text.split_inclusive('\n');
    match lines.next() {
        Some(h) if h.trim_end() == header(meta) => {}
        _ => {
            debug!("Ignoring stale sidecar {}", path.display());
            return Ok(None);
        }
    }

    let plan = meta.plan();
    let mut skip = BlockSkipList::new();
    for line in lines {
        if !line.ends_with('\n') {
            break;
        }
        match line.trim_end().parse::<u64>() {
            Ok(offset) if plan.check_offset(offset).is_ok() => {
                skip.insert(offset);
            }
            _ => warn!("Skipping bad sidecar line {:?}", line.trim_end()),
        }
    }
    Ok(Some(skip))
}

/// Delete the sidecar for `dest`, if present.
///
/// # Errors
///
/// Returns `FilesError::Io` for failures other than a missing file.
pub async fn remove(dest: &Path) -> FilesResult<()> {
    match tokio::fs::remove_file(sidecar_path(dest)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Length of the sidecar up to and including its last newline, or `None`
/// when there is no complete header line to keep.
async fn complete_len(path: &Path) -> FilesResult<Option<u64>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i as u64 + 1))
}

/// Append handle shared by all receiving lanes.
#[derive(Debug)]
pub struct Sidecar {
    path: PathBuf,
    file: Mutex<File>,
}

impl Sidecar {
    /// Open the sidecar for `dest`. When `resume` is false any previous log
    /// is replaced by a fresh header. When resuming, a torn last line is cut
    /// off before new offsets are appended.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the sidecar cannot be written.
    pub async fn open(dest: &Path, meta: &FileMetaData, resume: bool) -> FilesResult<Self> {
        let path = sidecar_path(dest);
        let existing = if resume {
            complete_len(&path).await?
        } else {
            None
        };
        let file = match existing {
            Some(len) => {
                let mut file = OpenOptions::new().write(true).open(&path).await?;
                file.set_len(len).await?;
                file.seek(SeekFrom::End(0)).await?;
                file
            }
            None => {
                let mut file = File::create(&path).await?;
                file.write_all(format!("{}\n", header(meta)).as_bytes())
                    .await?;
                file.flush().await?;
                file
            }
        };
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Sidecar location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record that the block at `offset` is on disk.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` if the append fails.
    pub async fn record(&self, offset: u64) -> FilesResult<()> {
        let mut file = self.file.lock().await;
        file.write_all(format!("{offset}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
