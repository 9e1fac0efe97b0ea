//! Local storage for generated media.
//!
//! Each category owns one flat directory under the storage root and every
//! asset is a single file named `<id>.<ext>`. There is no index: a file that
//! exists under its final name is a complete asset. Writes go to a hidden
//! temporary file in the same directory and are renamed into place once fully
//! flushed, so a reader can never observe a partial file.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("asset {0} not found")]
    NotFound(String),

    #[error("failed to write asset: {0}")]
    WriteFailed(#[source] io::Error),

    #[error("failed to read asset: {0}")]
    ReadFailed(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Audio,
    Image,
}

impl Category {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Audio => "audios",
            Category::Image => "images",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Category::Audio => "mp3",
            Category::Image => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Category::Audio => "audio/mp3",
            Category::Image => "image/png",
        }
    }

    pub fn all() -> [Category; 2] {
        [Category::Audio, Category::Image]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Audio => write!(f, "audio"),
            Category::Image => write!(f, "image"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetId(String);

impl AssetId {
    /// Millisecond timestamp plus 64 random bits. The timestamp keeps ids
    /// roughly sortable, the random part keeps concurrent writers apart.
    pub fn generate() -> Self {
        AssetId(format!(
            "{}-{:016x}",
            chrono::Utc::now().timestamp_millis(),
            rand::random::<u64>()
        ))
    }

    /// Accepts only ids that could have been issued by [`AssetId::generate`]'s
    /// alphabet, so a caller-supplied id can never escape its directory.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| AssetId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finalized asset on disk. Reading it streams the file.
#[derive(Debug, Clone)]
pub struct AssetHandle {
    pub id: AssetId,
    pub category: Category,
    pub path: PathBuf,
    pub len: u64,
}

impl AssetHandle {
    pub async fn open(&self) -> Result<ByteStream, StoreError> {
        let file = fs::File::open(&self.path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StoreError::NotFound(self.id.to_string()),
                _ => StoreError::ReadFailed(e),
            })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    /// Reads the whole asset into memory.
    pub async fn read_all(&self) -> Result<Bytes, StoreError> {
        let mut stream = self.open().await?;
        let mut buf = Vec::with_capacity(self.len as usize);
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk.map_err(StoreError::ReadFailed)?);
        }
        Ok(Bytes::from(buf))
    }
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    /// Opens the store rooted at `root`, creating the category directories.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for category in Category::all() {
            fs::create_dir_all(root.join(category.dir_name())).await?;
        }
        Ok(AssetStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn asset_path(&self, id: &AssetId, category: Category) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(format!("{}.{}", id, category.extension()))
    }

    fn temp_path(&self, id: &AssetId, category: Category) -> PathBuf {
        self.root
            .join(category.dir_name())
            .join(format!(".{}.{}.tmp", id, category.extension()))
    }

    pub async fn store(&self, bytes: &[u8], category: Category) -> Result<AssetId, StoreError> {
        let id = AssetId::generate();
        let tmp = self.temp_path(&id, category);
        let path = self.asset_path(&id, category);

        if let Err(e) = write_new_file(&tmp, bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::WriteFailed(e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::WriteFailed(e));
        }

        log::debug!("Stored {} asset {} ({} bytes)", category, id, bytes.len());
        Ok(id)
    }

    pub async fn resolve(&self, id: &str, category: Category) -> Result<AssetHandle, StoreError> {
        let id = AssetId::parse(id).ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let path = self.asset_path(&id, category);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(AssetHandle {
                id,
                category,
                path,
                len: meta.len(),
            }),
            Ok(_) => Err(StoreError::NotFound(id.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::ReadFailed(e)),
        }
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
