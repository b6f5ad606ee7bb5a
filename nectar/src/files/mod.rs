//! Static file serving.
//!
//! A [`FileProvider`] abstracts where file bytes come from;
//! [`LocalFileProvider`] reads them from a base directory through
//! monoio's file API, streaming chunks through the response-body
//! writer so large files never sit in memory whole.

use std::{
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use async_trait::async_trait;
use bytes::Bytes;
use nectar_core::{HttpError, ResponseBody};

mod middleware;
pub(crate) mod range;

pub use middleware::{FileMiddleware, FileMiddlewareConfig};

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct FileAttributes {
    pub is_folder: bool,
    pub modification_date: SystemTime,
    pub size: u64,
}

/// Source of servable files.
#[async_trait(?Send)]
pub trait FileProvider: 'static {
    type FileId: 'static;

    /// Resolve a URL path into a file id; `None` when the path cannot
    /// name a file (escapes, bad syntax).
    fn identifier(&self, path: &str) -> Option<Self::FileId>;

    async fn attributes(&self, id: &Self::FileId) -> Option<FileAttributes>;

    /// Stream the file, or the inclusive byte range of it.
    async fn load(
        &self,
        id: &Self::FileId,
        byte_range: Option<(u64, u64)>,
    ) -> Result<ResponseBody, HttpError>;
}

/// Files from a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    root: PathBuf,
}

impl LocalFileProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait(?Send)]
impl FileProvider for LocalFileProvider {
    type FileId = PathBuf;

    fn identifier(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        let mut resolved = self.root.clone();
        // Only plain names may extend the path; anything that could
        // escape the root is rejected outright.
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(resolved)
    }

    async fn attributes(&self, id: &PathBuf) -> Option<FileAttributes> {
        let metadata = std::fs::metadata(id).ok()?;
        Some(FileAttributes {
            is_folder: metadata.is_dir(),
            modification_date: metadata.modified().ok()?,
            size: metadata.len(),
        })
    }

    async fn load(
        &self,
        id: &PathBuf,
        byte_range: Option<(u64, u64)>,
    ) -> Result<ResponseBody, HttpError> {
        let file = monoio::fs::File::open(id).await.map_err(HttpError::internal)?;
        let (mut position, end) = match byte_range {
            Some((start, end)) => (start, end + 1),
            None => {
                let size = std::fs::metadata(id).map_err(HttpError::internal)?.len();
                (0, size)
            }
        };

        Ok(ResponseBody::from_writer(move |mut writer| async move {
            while position < end {
                let want = ((end - position) as usize).min(READ_CHUNK_SIZE);
                let buf = vec![0u8; want];
                let (result, mut buf) = file.read_at(buf, position).await;
                let read = result.map_err(HttpError::internal)?;
                buf.truncate(read);
                if read == 0 {
                    // File shrank under us; the peer sees truncation.
                    return Err(HttpError::internal(std::io::Error::other(
                        "file ended before the advertised length",
                    )));
                }
                position += read as u64;
                writer.write(Bytes::from(buf)).await?;
            }
            Ok(())
        }))
    }
}
