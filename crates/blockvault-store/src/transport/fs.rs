//! Filesystem transport
//!
//! Layout under `<root>/<container>/`:
//!
//! ```text
//! data/<key>         object payload
//! meta/<key>.json    sidecar: metadata, content MD5, CRC32C
//! tmp/               staging area for atomic replace
//! ```
//!
//! Payloads are verified against the sidecar CRC32C as they stream out.

use super::{
    BackendError, BlobObject, BlobProperties, BlobTransport, ListEntry, ListPage, TransportInfo,
    TransportResult, clamp_range, decode_token, encode_token,
};
use async_trait::async_trait;
use blockvault_common::content_md5;
use bytes::{Bytes, BytesMut};
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

const READ_CHUNK_SIZE: usize = 64 * 1024;
const SIDECAR_SUFFIX: &str = ".json";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_length: u64,
    content_md5: String,
    crc32c: u32,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Transport storing objects as files under a container directory
#[derive(Clone, Debug)]
pub struct FsTransport {
    root: PathBuf,
    container: String,
}

impl FsTransport {
    /// Bind to `<root>/<container>`
    ///
    /// The container directory is not created; a missing one reports
    /// `ContainerNotFound` on every call.
    pub fn new(root: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            container: container.into(),
        }
    }

    /// Create the container directory tree
    pub async fn create_container(&self) -> TransportResult<()> {
        for dir in ["data", "meta", "tmp"] {
            fs::create_dir_all(self.container_dir().join(dir))
                .await
                .map_err(|e| self.map_io(e, dir))?;
        }
        Ok(())
    }

    fn container_dir(&self) -> PathBuf {
        self.root.join(&self.container)
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.container_dir().join("data").join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.container_dir()
            .join("meta")
            .join(format!("{key}{SIDECAR_SUFFIX}"))
    }

    /// Fail fast when the container directory is gone
    async fn check_container(&self) -> TransportResult<()> {
        match fs::metadata(self.container_dir()).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(self.container_missing()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.container_missing()),
            Err(e) => Err(self.map_io(e, "")),
        }
    }

    fn container_missing(&self) -> BackendError {
        BackendError::ContainerNotFound(format!(
            "directory {} does not exist",
            self.container_dir().display()
        ))
    }

    fn map_io(&self, err: std::io::Error, key: &str) -> BackendError {
        match err.kind() {
            ErrorKind::NotFound => BackendError::NotFound(key.to_string()),
            ErrorKind::PermissionDenied => BackendError::AuthenticationFailed(format!(
                "permission denied on {}: {err}",
                self.container_dir().display()
            )),
            kind => BackendError::other(format!("{kind:?}"), format!("{key}: {err}")),
        }
    }

    async fn read_sidecar(&self, key: &str) -> TransportResult<Sidecar> {
        let raw = fs::read(self.meta_path(key))
            .await
            .map_err(|e| self.map_io(e, key))?;
        serde_json::from_slice(&raw)
            .map_err(|e| BackendError::other("InvalidSidecar", format!("{key}: {e}")))
    }

    async fn write_staged(&self, staged: &Path, target: &Path, contents: &[u8], key: &str) -> TransportResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.map_io(e, key))?;
        }
        fs::write(staged, contents)
            .await
            .map_err(|e| self.map_io(e, key))?;
        fs::rename(staged, target)
            .await
            .map_err(|e| self.map_io(e, key))
    }

    /// All keys under `data/`, sorted
    async fn walk_keys(&self) -> TransportResult<Vec<(String, u64)>> {
        let data_dir = self.container_dir().join("data");
        let mut keys = Vec::new();
        let mut pending = vec![data_dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(self.map_io(e, "")),
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| self.map_io(e, ""))? {
                let file_type = entry.file_type().await.map_err(|e| self.map_io(e, ""))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Some(key) = path
                    .strip_prefix(&data_dir)
                    .ok()
                    .and_then(Path::to_str)
                    .map(|k| k.replace(std::path::MAIN_SEPARATOR, "/"))
                else {
                    warn!("Skipping non UTF-8 object path {}", path.display());
                    continue;
                };
                let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                keys.push((key, len));
            }
        }
        keys.sort_unstable();
        Ok(keys)
    }
}

/// Reject keys that would escape the container directory
fn validate_key(key: &str) -> TransportResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(BackendError::other("InvalidKey", format!("invalid object key {key:?}")));
    }
    Ok(())
}

struct ReadState {
    file: fs::File,
    crc: u32,
    expected_crc: u32,
    key: String,
    done: bool,
}

#[async_trait]
impl BlobTransport for FsTransport {
    fn describe(&self) -> TransportInfo {
        TransportInfo {
            provider: "fs",
            container: self.container.clone(),
            connection_params: BTreeMap::from([
                ("root".to_string(), self.root.display().to_string()),
                ("container".to_string(), self.container.clone()),
            ]),
        }
    }

    fn supports_range_reads(&self) -> bool {
        true
    }

    async fn get_object(&self, key: &str) -> TransportResult<BlobObject> {
        validate_key(key)?;
        self.check_container().await?;
        let sidecar = self.read_sidecar(key).await?;
        let file = fs::File::open(self.data_path(key))
            .await
            .map_err(|e| self.map_io(e, key))?;

        let state = ReadState {
            file,
            crc: 0,
            expected_crc: sidecar.crc32c,
            key: key.to_string(),
            done: false,
        };
        let body = stream::try_unfold(state, |mut state| async move {
            if state.done {
                return Ok(None);
            }
            let mut buf = BytesMut::zeroed(READ_CHUNK_SIZE);
            let n = state.file.read(&mut buf).await.map_err(|e| {
                BackendError::other(format!("{:?}", e.kind()), format!("{}: {e}", state.key))
            })?;
            if n == 0 {
                state.done = true;
                if state.crc != state.expected_crc {
                    return Err(BackendError::other(
                        "DataCorruption",
                        format!("checksum mismatch reading {}", state.key),
                    ));
                }
                return Ok(None);
            }
            buf.truncate(n);
            state.crc = crc32c::crc32c_append(state.crc, &buf);
            Ok(Some((buf.freeze(), state)))
        });

        Ok(BlobObject {
            properties: BlobProperties {
                content_length: sidecar.content_length,
                content_md5: Some(sidecar.content_md5),
                metadata: sidecar.metadata,
            },
            body: Box::pin(body),
        })
    }

    async fn get_object_range(&self, key: &str, start: u64, end: u64) -> TransportResult<Bytes> {
        validate_key(key)?;
        self.check_container().await?;
        let mut file = fs::File::open(self.data_path(key))
            .await
            .map_err(|e| self.map_io(e, key))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| self.map_io(e, key))?
            .len();
        let (start, end) = clamp_range(start, end, len);
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| self.map_io(e, key))?;

        let mut buf = Vec::new();
        file.take(end - start)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| self.map_io(e, key))?;
        Ok(Bytes::from(buf))
    }

    async fn get_properties(&self, key: &str) -> TransportResult<BlobProperties> {
        validate_key(key)?;
        self.check_container().await?;
        let sidecar = self.read_sidecar(key).await?;
        Ok(BlobProperties {
            content_length: sidecar.content_length,
            content_md5: Some(sidecar.content_md5),
            metadata: sidecar.metadata,
        })
    }

    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> TransportResult<()> {
        validate_key(key)?;
        self.check_container().await?;
        let sidecar = Sidecar {
            content_length: data.len() as u64,
            content_md5: content_md5(&data),
            crc32c: crc32c::crc32c(&data),
            metadata,
        };
        let sidecar = serde_json::to_vec(&sidecar)
            .map_err(|e| BackendError::other("InvalidSidecar", format!("{key}: {e}")))?;

        let tmp_dir = self.container_dir().join("tmp");
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| self.map_io(e, key))?;
        let staged_data = tmp_dir.join(format!("{}.data", uuid::Uuid::new_v4().simple()));
        let staged_meta = tmp_dir.join(format!("{}.meta", uuid::Uuid::new_v4().simple()));

        let data_path = self.data_path(key);
        if let Err(e) = self.write_staged(&staged_data, &data_path, &data, key).await {
            let _ = fs::remove_file(&staged_data).await;
            return Err(e);
        }
        // A payload without its sidecar is invisible to properties lookups
        if let Err(e) = self
            .write_staged(&staged_meta, &self.meta_path(key), &sidecar, key)
            .await
        {
            let _ = fs::remove_file(&staged_meta).await;
            if let Err(rm) = fs::remove_file(&data_path).await {
                warn!("Failed to remove {key} after its sidecar write failed: {rm}");
            }
            return Err(e);
        }
        debug!("Stored {} bytes at {}", data.len(), key);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> TransportResult<()> {
        validate_key(key)?;
        self.check_container().await?;
        fs::remove_file(self.data_path(key))
            .await
            .map_err(|e| self.map_io(e, key))?;
        match fs::remove_file(self.meta_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.map_io(e, key)),
        }
    }

    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_results: usize,
    ) -> TransportResult<ListPage> {
        self.check_container().await?;
        let after = continuation_token.map(decode_token).transpose()?;
        let max_results = max_results.max(1);

        let keys = self.walk_keys().await?;
        let mut matching = keys
            .into_iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter(|(name, _)| after.as_ref().is_none_or(|after| name > after))
            .map(|(name, content_length)| ListEntry {
                name,
                content_length,
            });

        let entries: Vec<ListEntry> = matching.by_ref().take(max_results).collect();
        let continuation_token = match (matching.next(), entries.last()) {
            (Some(_), Some(last)) => Some(encode_token(&last.name)),
            _ => None,
        };
        Ok(ListPage {
            entries,
            continuation_token,
        })
    }
}
