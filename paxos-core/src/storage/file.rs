use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::PaxosError;
use crate::storage::RecordStore;
use crate::types::AcceptorRecord;

/// Longest base64 run used as a single path component.
const SEGMENT_LEN: usize = 128;

/// Record store keeping one bincode-encoded file per key.
///
/// Each write lands in `<name>.tmp`, is synced, then renamed over
/// `<name>.rec`, so a crash mid-write leaves either the old or the new
/// record on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `base_dir`.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self, PaxosError> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| storage_error("create", &base_dir, e))?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Keys are arbitrary strings; their URL-safe base64 is path-safe. Names
    /// longer than [`SEGMENT_LEN`] are split into `<segment>~` directories so
    /// no path component exceeds the file system's name limit. `~` and `.`
    /// are outside the base64 alphabet, so segments never clash with records.
    fn path_for(&self, key: &str, extension: &str) -> PathBuf {
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        let mut path = self.base_dir.clone();
        let mut rest = name.as_str();
        while rest.len() > SEGMENT_LEN {
            let (segment, tail) = rest.split_at(SEGMENT_LEN);
            path.push(format!("{}~", segment));
            rest = tail;
        }
        path.push(format!("{}.{}", rest, extension));
        path
    }
}

fn storage_error(op: &str, path: &Path, err: impl std::fmt::Display) -> PaxosError {
    PaxosError::Storage(format!("{} {}: {}", op, path.display(), err))
}

impl RecordStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<AcceptorRecord>, PaxosError> {
        let path = self.path_for(key, "rec");
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let (record, _) =
            bincode::serde::decode_from_slice::<AcceptorRecord, _>(&bytes, bincode::config::standard())
                .map_err(|e| storage_error("decode", &path, e))?;
        Ok(Some(record))
    }

    async fn store(&self, key: &str, record: &AcceptorRecord) -> Result<(), PaxosError> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())?;
        let tmp = self.path_for(key, "tmp");
        let path = self.path_for(key, "rec");

        if let Some(parent) = tmp.parent().filter(|dir| *dir != self.base_dir.as_path()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create", parent, e))?;
        }
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| storage_error("create", &tmp, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", &tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("rename", &path, e))?;
        Ok(())
    }
}
