//! The virtual filesystem contract and a chrooted local-filesystem
//! implementation shipped as the one concrete backend.
//!
//! Handlers only ever see `&dyn Vfs` through a session's `Arc<dyn Vfs>`; the
//! core never reaches into `std::fs` directly outside this module.

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;

use crate::error::VfsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub permissions: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Append,
    Exclusive,
}

/// An open file handle for streaming reads or writes, offset-seekable so
/// REST can be honored without re-reading from the start.
#[async_trait]
pub trait VfsReader: Send + Sync {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, VfsError>;
}

#[async_trait]
pub trait VfsWriter: Send + Sync {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), VfsError>;
    async fn finish(self: Box<Self>) -> Result<(), VfsError>;
}

/// Narrow contract a connection depends on for every path-touching command.
/// Paths passed in are already resolved relative to the session's chroot
/// root by `resolve` below; implementations never need to reason about the
/// client's notion of cwd.
#[async_trait]
pub trait Vfs: Send + Sync {
    async fn list(&self, dir: &Path) -> Result<Vec<DirEntryInfo>, VfsError>;
    async fn stat(&self, path: &Path) -> Result<Metadata, VfsError>;
    async fn open_read(&self, path: &Path, offset: u64) -> Result<Box<dyn VfsReader>, VfsError>;
    async fn open_write(
        &self,
        path: &Path,
        offset: u64,
        mode: WriteMode,
    ) -> Result<Box<dyn VfsWriter>, VfsError>;
    async fn delete(&self, path: &Path) -> Result<(), VfsError>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), VfsError>;
    async fn mkdir(&self, path: &Path) -> Result<(), VfsError>;
    async fn rmdir(&self, path: &Path) -> Result<(), VfsError>;
}

/// Resolves a client-supplied path (absolute or relative to `cwd`) against a
/// chroot `root`, rejecting any `..` that would climb above it. Returns the
/// resolved path both as the session-visible virtual path (for PWD/257
/// replies) and the real filesystem path under `root`.
pub fn resolve(root: &Path, cwd: &str, arg: &str) -> Result<(String, PathBuf), VfsError> {
    let raw = if arg.starts_with('/') {
        arg.to_string()
    } else if cwd == "/" {
        format!("/{arg}")
    } else {
        format!("{cwd}/{arg}")
    };

    let mut stack: Vec<&str> = Vec::new();
    for comp in Path::new(&raw).components() {
        match comp {
            Component::Normal(p) => stack.push(p.to_str().ok_or(VfsError::PathTraversal)?),
            Component::ParentDir => {
                if stack.pop().is_none() {
                    return Err(VfsError::PathTraversal);
                }
            }
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => return Err(VfsError::PathTraversal),
        }
    }

    let virtual_path = if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    };

    let mut real = root.to_path_buf();
    for seg in &stack {
        real.push(seg);
    }
    Ok((virtual_path, real))
}

/// A chrooted view of the host filesystem: every `Vfs` call receives an
/// already-chroot-resolved real path (see `resolve`), so this impl is a thin
/// `tokio::fs` wrapper plus error-kind mapping.
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: PathBuf) -> Self {
        LocalFs { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn map_io_err(e: std::io::Error) -> VfsError {
    match e.kind() {
        std::io::ErrorKind::NotFound => VfsError::NotFound,
        std::io::ErrorKind::PermissionDenied => VfsError::PermissionDenied,
        std::io::ErrorKind::AlreadyExists => VfsError::Exists,
        _ => VfsError::Io(e),
    }
}

struct FileReader {
    file: tokio::fs::File,
}

#[async_trait]
impl VfsReader for FileReader {
    async fn read_chunk(&mut self, max: usize) -> Result<Vec<u8>, VfsError> {
        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; max];
        let n = self.file.read(&mut buf).await.map_err(map_io_err)?;
        buf.truncate(n);
        Ok(buf)
    }
}

struct FileWriter {
    file: tokio::fs::File,
}

#[async_trait]
impl VfsWriter for FileWriter {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<(), VfsError> {
        use tokio::io::AsyncWriteExt;
        self.file.write_all(data).await.map_err(map_io_err)
    }

    async fn finish(mut self: Box<Self>) -> Result<(), VfsError> {
        use tokio::io::AsyncWriteExt;
        self.file.flush().await.map_err(map_io_err)
    }
}

#[async_trait]
impl Vfs for LocalFs {
    async fn list(&self, dir: &Path) -> Result<Vec<DirEntryInfo>, VfsError> {
        let mut rd = tokio::fs::read_dir(dir).await.map_err(map_io_err)?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(map_io_err)? {
            let meta = entry.metadata().await.map_err(map_io_err)?;
            out.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind: if meta.is_dir() { EntryKind::Dir } else { EntryKind::File },
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn stat(&self, path: &Path) -> Result<Metadata, VfsError> {
        let meta = tokio::fs::metadata(path).await.map_err(map_io_err)?;
        Ok(Metadata {
            kind: if meta.is_dir() { EntryKind::Dir } else { EntryKind::File },
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            permissions: if meta.permissions().readonly() { "r--r--r--".into() } else { "rw-rw-rw-".into() },
        })
    }

    async fn open_read(&self, path: &Path, offset: u64) -> Result<Box<dyn VfsReader>, VfsError> {
        use tokio::io::{AsyncSeekExt, SeekFrom};
        let mut file = tokio::fs::File::open(path).await.map_err(map_io_err)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(map_io_err)?;
        }
        Ok(Box::new(FileReader { file }))
    }

    async fn open_write(
        &self,
        path: &Path,
        offset: u64,
        mode: WriteMode,
    ) -> Result<Box<dyn VfsWriter>, VfsError> {
        use tokio::io::{AsyncSeekExt, SeekFrom};
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create(true);
        match mode {
            WriteMode::Create => {
                opts.truncate(offset == 0);
            }
            WriteMode::Append => {
                opts.append(true);
            }
            WriteMode::Exclusive => {
                opts.create_new(true);
            }
        }
        let mut file = opts.open(path).await.map_err(map_io_err)?;
        if offset > 0 && mode != WriteMode::Append {
            file.seek(SeekFrom::Start(offset)).await.map_err(map_io_err)?;
        }
        Ok(Box::new(FileWriter { file }))
    }

    async fn delete(&self, path: &Path) -> Result<(), VfsError> {
        tokio::fs::remove_file(path).await.map_err(map_io_err)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), VfsError> {
        tokio::fs::rename(from, to).await.map_err(map_io_err)
    }

    async fn mkdir(&self, path: &Path) -> Result<(), VfsError> {
        tokio::fs::create_dir(path).await.map_err(map_io_err)
    }

    async fn rmdir(&self, path: &Path) -> Result<(), VfsError> {
        tokio::fs::remove_dir(path).await.map_err(map_io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_escape_above_root() {
        let root = Path::new("/srv/ftp");
        assert!(matches!(resolve(root, "/", "../../etc/passwd"), Err(VfsError::PathTraversal)));
    }

    #[test]
    fn resolve_handles_relative_and_absolute() {
        let root = Path::new("/srv/ftp");
        let (v, real) = resolve(root, "/a/b", "c").unwrap();
        assert_eq!(v, "/a/b/c");
        assert_eq!(real, Path::new("/srv/ftp/a/b/c"));

        let (v2, real2) = resolve(root, "/a/b", "/x/y").unwrap();
        assert_eq!(v2, "/x/y");
        assert_eq!(real2, Path::new("/srv/ftp/x/y"));
    }

    #[test]
    fn resolve_dot_dot_within_root_is_fine() {
        let root = Path::new("/srv/ftp");
        let (v, _) = resolve(root, "/a/b", "../c").unwrap();
        assert_eq!(v, "/a/c");
    }
}
