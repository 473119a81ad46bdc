//! Object storage for tarballs and slugs
//!
//! The [`Storage`] trait is the seam to S3/GCS/Minio style backends.
//! [`FileStorage`] keeps objects in a local directory, for single-node
//! clusters that mount the same directory into builder and runner pods.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::spec::StorageInfo;

/// Anything that can be uploaded
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Backend type passed to builder and runner pods (`s3`, `gcs`, `minio`, `local`)
    fn storage_type(&self) -> String;

    /// Name of the k8s secret with the backend credentials
    fn k8s_secret_name(&self) -> String;

    /// Credentials to store in [`Storage::k8s_secret_name`]
    fn access_data(&self) -> BTreeMap<String, Vec<u8>>;

    /// Extra env vars for pods that read or write objects
    fn pod_env_vars(&self) -> BTreeMap<String, String>;

    async fn upload_file(&self, path: &str, file: &mut dyn ReadSeek) -> Result<()>;

    /// Objects whose name starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<Object>>;

    /// Delete every object whose name starts with `prefix`
    async fn delete(&self, prefix: &str) -> Result<()>;

    /// Snapshot of what pod specs need
    fn info(&self) -> StorageInfo {
        StorageInfo {
            storage_type: self.storage_type(),
            k8s_secret_name: self.k8s_secret_name(),
            pod_env_vars: self.pod_env_vars(),
        }
    }
}

/// Directory-backed storage
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    secret_name: String,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            secret_name: "teresa-storage-keys".to_string(),
        }
    }

    pub fn with_secret_name(mut self, name: impl Into<String>) -> Self {
        self.secret_name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

fn list_objects(root: &Path, prefix: &str) -> Result<Vec<(Object, PathBuf)>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut objects = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} outside storage root", entry.path().display()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if !name.starts_with(prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", name))?
            .modified()
            .with_context(|| format!("No mtime for {}", name))?;
        objects.push((
            Object {
                name,
                last_modified: DateTime::<Utc>::from(modified),
            },
            entry.path().to_path_buf(),
        ));
    }
    Ok(objects)
}

#[async_trait]
impl Storage for FileStorage {
    fn storage_type(&self) -> String {
        "local".to_string()
    }

    fn k8s_secret_name(&self) -> String {
        self.secret_name.clone()
    }

    fn access_data(&self) -> BTreeMap<String, Vec<u8>> {
        BTreeMap::new()
    }

    fn pod_env_vars(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "LOCAL_STORAGE_ROOT".to_string(),
            self.root.to_string_lossy().into_owned(),
        );
        env
    }

    /// Only the disk write runs on the blocking pool; uploads are in-memory tarballs
    async fn upload_file(&self, path: &str, file: &mut dyn ReadSeek) -> Result<()> {
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| format!("Failed to read upload for {}", path))?;

        let dest = self.object_path(path);
        let written = data.len();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&dest, &data).with_context(|| format!("Failed to write {}", dest.display()))
        })
        .await
        .context("Storage upload task failed")??;
        debug!(path = %path, bytes = written, "uploaded object");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Object>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        let objects = tokio::task::spawn_blocking(move || list_objects(&root, &prefix))
            .await
            .context("Storage listing task failed")??;
        Ok(objects.into_iter().map(|(o, _)| o).collect())
    }

    async fn delete(&self, prefix: &str) -> Result<()> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            for (object, path) in list_objects(&root, &prefix)? {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to delete {}", object.name))?;
            }
            Ok(())
        })
        .await
        .context("Storage delete task failed")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_upload_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        for name in [
            "builds/myapp/v1/in/app.tgz",
            "builds/myapp/v1/out/slug.tgz",
            "builds/myapp/v10/in/app.tgz",
            "builds/other/v1/in/app.tgz",
        ] {
            let mut data = Cursor::new(name.as_bytes().to_vec());
            storage.upload_file(name, &mut data).await.unwrap();
        }

        let names: Vec<String> = storage
            .list("builds/myapp/v1/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "builds/myapp/v1/in/app.tgz".to_string(),
                "builds/myapp/v1/out/slug.tgz".to_string(),
            ]
        );

        assert_eq!(storage.list("builds/myapp/").await.unwrap().len(), 3);

        storage.delete("builds/myapp/v1/").await.unwrap();
        assert!(storage.list("builds/myapp/v1/").await.unwrap().is_empty());
        assert_eq!(storage.list("builds/myapp/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uploaded_content() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let mut data = Cursor::new(b"slug".to_vec());
        storage.upload_file("a/b.tgz", &mut data).await.unwrap();
        let content = fs::read(dir.path().join("a/b.tgz")).unwrap();
        assert_eq!(content, b"slug");
    }

    #[tokio::test]
    async fn test_upload_overwrites_and_reports_write_errors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        storage
            .upload_file("a/b.tgz", &mut Cursor::new(b"first slug".to_vec()))
            .await
            .unwrap();
        storage
            .upload_file("a/b.tgz", &mut Cursor::new(b"second".to_vec()))
            .await
            .unwrap();
        assert_eq!(fs::read(dir.path().join("a/b.tgz")).unwrap(), b"second");

        let err = storage
            .upload_file("a/b.tgz/c.tgz", &mut Cursor::new(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to create"));
    }

    #[tokio::test]
    async fn test_missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("missing"));
        assert!(storage.list("").await.unwrap().is_empty());
    }

    #[test]
    fn test_info() {
        let storage = FileStorage::new("/data").with_secret_name("keys");
        let info = storage.info();
        assert_eq!(info.storage_type, "local");
        assert_eq!(info.k8s_secret_name, "keys");
        assert_eq!(info.pod_env_vars["LOCAL_STORAGE_ROOT"], "/data");
    }
}
