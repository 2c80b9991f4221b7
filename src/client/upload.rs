//! Uploads a local build context to the workspace blob datastore.

use super::ClientError;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_DATASTORE: &str = "workspaceblobstore";
pub const STORAGE_SCOPE: &str = "https://storage.azure.com/.default";
/// Blob service REST version that accepts Entra ID bearer tokens.
pub const BLOB_API_VERSION: &str = "2021-08-06";

const REMOTE_SCHEMES: [&str; 6] = ["http", "https", "azureml", "wasb", "wasbs", "abfss"];

/// Whether a build context path already names remote storage.
pub fn is_remote_uri(path: &str) -> bool {
    match Url::parse(path) {
        Ok(url) => REMOTE_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatastoreResource {
    pub properties: DatastoreProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DatastoreProperties {
    pub account_name: String,
    pub container_name: String,
    #[serde(default = "default_storage_suffix")]
    pub endpoint: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_storage_suffix() -> String {
    "core.windows.net".to_string()
}

fn default_protocol() -> String {
    "https".to_string()
}

impl DatastoreProperties {
    /// `{protocol}://{account}.blob.{suffix}`, or `endpoint_override` when set.
    pub fn blob_service(&self, endpoint_override: Option<&str>) -> Result<Url, ClientError> {
        let raw = match endpoint_override {
            Some(endpoint) => endpoint.to_string(),
            None => format!(
                "{}://{}.blob.{}",
                self.protocol, self.account_name, self.endpoint
            ),
        };
        let url = Url::parse(&raw).map_err(|e| {
            ClientError::InvalidConfiguration(format!("invalid blob endpoint '{raw}': {e}"))
        })?;
        if url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfiguration(format!(
                "blob endpoint '{raw}' cannot be a base URL"
            )));
        }
        Ok(url)
    }
}

/// One file of a build context, addressed by its `/`-separated relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContextFile {
    pub relative: String,
    pub contents: Vec<u8>,
}

/// Reads every file below `root`, sorted by relative path.
pub(crate) fn collect_context(root: &Path) -> Result<Vec<ContextFile>, ClientError> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| read_error(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| read_error(&dir, e))?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let contents = std::fs::read(&path).map_err(|e| read_error(&path, e))?;
            files.push(ContextFile {
                relative: relative_path(root, &path),
                contents,
            });
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(path: &Path, source: std::io::Error) -> ClientError {
    ClientError::BuildContext {
        path: PathBuf::from(path),
        source,
    }
}

/// Content hash of a build context; identical contexts share an upload prefix.
pub(crate) fn content_hash(files: &[ContextFile]) -> String {
    let mut hasher = Sha256::new();
    for file in files {
        hasher.update(file.relative.as_bytes());
        hasher.update([0]);
        hasher.update((file.contents.len() as u64).to_le_bytes());
        hasher.update(&file.contents);
    }
    format!("{:x}", hasher.finalize())
}

/// URL of `relative` under `{container}/LocalUpload/{hash}/`.
pub(crate) fn blob_url(
    service: &Url,
    container: &str,
    hash: &str,
    relative: &str,
) -> Result<Url, ClientError> {
    let mut url = service.clone();
    {
        let mut segments = url.path_segments_mut().map_err(|()| {
            ClientError::InvalidConfiguration(format!("{service} cannot be a base URL"))
        })?;
        segments
            .pop_if_empty()
            .extend([container, "LocalUpload", hash])
            .extend(relative.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_uris_are_recognised() {
        assert!(is_remote_uri("https://acct.blob.core.windows.net/c/ctx/"));
        assert!(is_remote_uri("azureml://datastores/workspaceblobstore/paths/ctx"));
        assert!(!is_remote_uri("./docker"));
        assert!(!is_remote_uri("/tmp/docker"));
        assert!(!is_remote_uri(r"C:\build\docker"));
    }

    #[test]
    fn test_collect_context_is_sorted_and_relative() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM python").unwrap();
        std::fs::write(dir.path().join("src").join("app.py"), "print()").unwrap();

        let files = collect_context(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["Dockerfile", "src/app.py"]);
    }

    #[test]
    fn test_missing_context_directory_names_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = collect_context(&missing).unwrap_err();
        assert!(err.to_string().contains(&missing.display().to_string()));
    }

    #[test]
    fn test_content_hash_tracks_contents() {
        let a = vec![ContextFile {
            relative: "Dockerfile".to_string(),
            contents: b"FROM python:3.11".to_vec(),
        }];
        let mut b = a.clone();
        b[0].contents = b"FROM python:3.12".to_vec();

        assert_eq!(content_hash(&a), content_hash(&a.clone()));
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&a).len(), 64);
    }

    #[test]
    fn test_blob_service_and_url() {
        let properties = DatastoreProperties {
            account_name: "acct".to_string(),
            container_name: "blobs".to_string(),
            endpoint: "core.windows.net".to_string(),
            protocol: "https".to_string(),
        };
        let service = properties.blob_service(None).unwrap();
        let url = blob_url(&service, "blobs", "abc", "src/app.py").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acct.blob.core.windows.net/blobs/LocalUpload/abc/src/app.py"
        );
    }
}
