//! Tenant-isolated byte storage on the local filesystem.
//!
//! Layout is `root/tenants/<tenant_id>/<storage_key>` and nothing else. Keys are 32 random bytes
//! encoded as lowercase hex; the name a user uploads under is never part of a path.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use rand::{rngs::OsRng, RngCore};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task;
use uuid::Uuid;

pub const STORAGE_KEY_BYTES: usize = 32;
pub const MAX_DISPLAY_NAME_CHARS: usize = 255;

const TENANTS_DIR: &str = "tenants";
const FALLBACK_DISPLAY_NAME: &str = "unnamed";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("stored object not found")]
    NotFound,
    #[error("malformed storage key")]
    InvalidKey,
    #[error("storage path escapes tenant namespace")]
    Escape,
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub storage_key: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct TenantStorage {
    root: PathBuf,
}

impl TenantStorage {
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TENANTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one tenant's objects, created on first use.
    pub async fn namespace_for(&self, tenant_id: Uuid) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        blocking(move || ensure_namespace(&root, tenant_id)).await
    }

    pub async fn put(
        &self,
        tenant_id: Uuid,
        bytes: Bytes,
        original_name: &str,
    ) -> StorageResult<StoredObject> {
        let root = self.root.clone();
        let display_name = sanitize_display_name(original_name);
        let storage_key = blocking(move || {
            let namespace = ensure_namespace(&root, tenant_id)?;
            let storage_key = generate_storage_key();
            let mut staged = NamedTempFile::new_in(&namespace)?;
            staged.write_all(&bytes)?;
            staged.as_file().sync_all()?;
            staged
                .persist_noclobber(namespace.join(&storage_key))
                .map_err(|err| StorageError::Io(err.error))?;
            Ok(storage_key)
        })
        .await?;

        Ok(StoredObject {
            storage_key,
            display_name,
        })
    }

    /// Absolute path of an existing object, guaranteed to sit inside the tenant namespace.
    pub async fn resolve(&self, tenant_id: Uuid, storage_key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let storage_key = storage_key.to_string();
        blocking(move || resolve_path(&root, tenant_id, &storage_key)).await
    }

    pub async fn read(&self, tenant_id: Uuid, storage_key: &str) -> StorageResult<Vec<u8>> {
        let root = self.root.clone();
        let storage_key = storage_key.to_string();
        blocking(move || {
            let path = resolve_path(&root, tenant_id, &storage_key)?;
            fs::read(path).map_err(not_found_or_io)
        })
        .await
    }

    /// Returns `false` when the object was already gone.
    pub async fn delete(&self, tenant_id: Uuid, storage_key: &str) -> StorageResult<bool> {
        let root = self.root.clone();
        let storage_key = storage_key.to_string();
        blocking(move || {
            let path = match resolve_path(&root, tenant_id, &storage_key) {
                Ok(path) => path,
                Err(StorageError::NotFound) => return Ok(false),
                Err(err) => return Err(err),
            };
            match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(StorageError::Io(err)),
            }
        })
        .await
    }
}

async fn blocking<T, F>(work: F) -> StorageResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| StorageError::Io(io::Error::new(io::ErrorKind::Other, err)))?
}

fn namespace_path(root: &Path, tenant_id: Uuid) -> PathBuf {
    root.join(TENANTS_DIR).join(tenant_id.to_string())
}

fn ensure_namespace(root: &Path, tenant_id: Uuid) -> StorageResult<PathBuf> {
    let namespace = namespace_path(root, tenant_id);
    fs::create_dir_all(&namespace)?;
    Ok(namespace)
}

fn resolve_path(root: &Path, tenant_id: Uuid, storage_key: &str) -> StorageResult<PathBuf> {
    if !is_valid_storage_key(storage_key) {
        return Err(StorageError::InvalidKey);
    }

    let namespace = fs::canonicalize(namespace_path(root, tenant_id)).map_err(not_found_or_io)?;
    let candidate = fs::canonicalize(namespace.join(storage_key)).map_err(not_found_or_io)?;

    if candidate.parent() != Some(namespace.as_path()) {
        return Err(StorageError::Escape);
    }
    Ok(candidate)
}

fn not_found_or_io(err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(err)
    }
}

pub fn generate_storage_key() -> String {
    let mut bytes = [0u8; STORAGE_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn is_valid_storage_key(key: &str) -> bool {
    key.len() == STORAGE_KEY_BYTES * 2
        && key
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Display text derived from an uploaded file name. Never used to build a path.
pub fn sanitize_display_name(original: &str) -> String {
    let base = original
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|&c| !c.is_control() && !is_invisible_format(c))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return FALLBACK_DISPLAY_NAME.to_string();
    }

    if cleaned.chars().count() <= MAX_DISPLAY_NAME_CHARS {
        return cleaned.to_string();
    }

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && ext.chars().count() < 16 => {
            let keep = MAX_DISPLAY_NAME_CHARS - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{stem}.{ext}")
        }
        _ => cleaned.chars().take(MAX_DISPLAY_NAME_CHARS).collect(),
    }
}

/// Zero-width and bidi-override characters, which can disguise a name's real extension.
fn is_invisible_format(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
            | '\u{FFF9}'..='\u{FFFB}'
    )
}
