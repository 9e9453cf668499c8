//! # Media Archiver
//!
//! Splits an upload directory into size-bounded zip parts for transfer and
//! extracts received parts into a staging directory.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::{DirEntry, WalkDir};
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

use crate::models::random_token;
use crate::swap::{UPLOAD_BAK_DIR, UPLOAD_TMP_DIR};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Errors raised while creating or extracting archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Zip { context: String, source: ZipError },
    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("archive {} does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("archive task failed: {0}")]
    Task(String),
}

impl ArchiveError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            context: context.into(),
            source,
        }
    }

    fn zip(context: impl Into<String>, source: ZipError) -> Self {
        ArchiveError::Zip {
            context: context.into(),
            source,
        }
    }
}

/// An ordered batch of archive parts sharing one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBatch {
    pub token: String,
    /// Part paths in order; part `n` (1-based) is `archives[n - 1]`
    pub archives: Vec<PathBuf>,
}

impl ArchiveBatch {
    pub fn parts(&self) -> u32 {
        u32::try_from(self.archives.len()).unwrap_or(u32::MAX)
    }
}

/// Archive `source` into `<dest>/<token>_part<N>.zip` files.
///
/// A new part is started whenever the current one already holds a file and
/// adding the next file would push its uncompressed size past
/// `max_megabytes`. A single oversized file still gets a part of its own.
/// The walk skips `dest` and any staged or backed-up upload directories.
/// A missing source directory yields an empty batch.
pub async fn create_archives(
    source: &Path,
    dest: &Path,
    max_megabytes: u32,
) -> Result<ArchiveBatch, ArchiveError> {
    let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || create_archives_blocking(&source, &dest, max_megabytes))
        .await
        .map_err(|err| ArchiveError::Task(err.to_string()))?
}

/// Extract every entry of `archive` into `dest`, creating it if needed.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || extract_archive_blocking(&archive, &dest))
        .await
        .map_err(|err| ArchiveError::Task(err.to_string()))?
}

fn create_archives_blocking(
    source: &Path,
    dest: &Path,
    max_megabytes: u32,
) -> Result<ArchiveBatch, ArchiveError> {
    let token = random_token(24);
    let mut batch = ArchiveBatch {
        token: token.clone(),
        archives: Vec::new(),
    };

    if !source.is_dir() {
        tracing::warn!(source = %source.display(), "Media directory does not exist; nothing to archive");
        return Ok(batch);
    }

    std::fs::create_dir_all(dest)
        .map_err(|err| ArchiveError::io(format!("creating {}", dest.display()), err))?;

    let cap = u64::from(max_megabytes.max(1)) * BYTES_PER_MB;
    let excluded_dest = dest.canonicalize().ok();
    let mut writer: Option<ZipWriter<BufWriter<File>>> = None;
    let mut current_size = 0u64;

    let walker = WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, excluded_dest.as_deref()));

    for entry in walker {
        let entry = entry.map_err(|source_err| ArchiveError::Walk {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|source_err| ArchiveError::Walk {
                path: entry.path().to_path_buf(),
                source: source_err,
            })?
            .len();

        let rollover = match writer {
            None => true,
            Some(_) => current_size > 0 && current_size.saturating_add(size) > cap,
        };
        if rollover {
            if let Some(open) = writer.take() {
                finish(open)?;
            }
            let path = dest.join(format!("{}_part{}.zip", token, batch.archives.len() + 1));
            let file = File::create(&path)
                .map_err(|err| ArchiveError::io(format!("creating {}", path.display()), err))?;
            writer = Some(ZipWriter::new(BufWriter::new(file)));
            batch.archives.push(path);
            current_size = 0;
        }

        let Some(zip) = writer.as_mut() else {
            continue;
        };
        let name = entry_name(source, entry.path());
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size >= u64::from(u32::MAX));
        zip.start_file(name.as_str(), options)
            .map_err(|err| ArchiveError::zip(format!("adding {name}"), err))?;
        let mut input = BufReader::new(
            File::open(entry.path())
                .map_err(|err| ArchiveError::io(format!("reading {}", entry.path().display()), err))?,
        );
        std::io::copy(&mut input, zip)
            .map_err(|err| ArchiveError::io(format!("compressing {name}"), err))?;
        current_size = current_size.saturating_add(size);
    }

    if let Some(open) = writer.take() {
        finish(open)?;
    }

    tracing::info!(
        token = %batch.token,
        parts = batch.archives.len(),
        max_mb = max_megabytes,
        "Created media archives"
    );
    Ok(batch)
}

fn finish(writer: ZipWriter<BufWriter<File>>) -> Result<(), ArchiveError> {
    let mut inner = writer
        .finish()
        .map_err(|err| ArchiveError::zip("finalizing archive", err))?;
    std::io::Write::flush(&mut inner).map_err(|err| ArchiveError::io("flushing archive", err))
}

fn is_excluded(entry: &DirEntry, dest: Option<&Path>) -> bool {
    if !entry.file_type().is_dir() || entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with(UPLOAD_TMP_DIR) || name.starts_with(UPLOAD_BAK_DIR) {
        return true;
    }
    match (dest, entry.path().canonicalize()) {
        (Some(dest), Ok(path)) => path == dest,
        _ => false,
    }
}

/// Archive entry name: the path relative to `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn extract_archive_blocking(archive: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    if !archive.is_file() {
        return Err(ArchiveError::NotFound(archive.to_path_buf()));
    }
    let file = File::open(archive)
        .map_err(|err| ArchiveError::io(format!("opening {}", archive.display()), err))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|err| ArchiveError::zip(format!("reading {}", archive.display()), err))?;
    std::fs::create_dir_all(dest)
        .map_err(|err| ArchiveError::io(format!("creating {}", dest.display()), err))?;

    let entries = zip.len();
    zip.extract(dest)
        .map_err(|err| ArchiveError::zip(format!("extracting into {}", dest.display()), err))?;

    tracing::debug!(archive = %archive.display(), dest = %dest.display(), entries, "Extracted archive");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(path: &Path, len: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![b'x'; len]).unwrap();
    }

    #[tokio::test]
    async fn rolls_over_when_cap_is_exceeded() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("uploads");
        let dest = root.path().join("staging");
        for i in 0..6 {
            write_file(&source.join(format!("2024/file{i}.bin")), 512 * 1024);
        }

        let batch = create_archives(&source, &dest, 1).await.unwrap();

        assert_eq!(batch.archives.len(), 3);
        assert!(batch.archives.iter().all(|p| p.exists()));
        assert!(
            batch.archives[0]
                .file_name()
                .unwrap()
                .to_string_lossy()
                .ends_with("_part1.zip")
        );
    }

    #[tokio::test]
    async fn oversized_file_gets_its_own_part() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("uploads");
        write_file(&source.join("a.bin"), 10);
        write_file(&source.join("b.bin"), 2 * 1024 * 1024);
        write_file(&source.join("c.bin"), 10);

        let batch = create_archives(&source, &root.path().join("out"), 1)
            .await
            .unwrap();
        assert_eq!(batch.parts(), 3);
    }

    #[tokio::test]
    async fn skips_staging_and_upload_copies() {
        let root = TempDir::new().unwrap();
        let source = root.path().join("uploads");
        let dest = source.join("sitesync-staging");
        write_file(&source.join("keep/photo.jpg"), 16);
        write_file(&source.join("upload_tmp_x/ignored.jpg"), 16);
        write_file(&source.join("upload_bak/ignored.jpg"), 16);
        write_file(&dest.join("old_part1.zip"), 16);

        let batch = create_archives(&source, &dest, 5).await.unwrap();
        assert_eq!(batch.parts(), 1);

        let out = root.path().join("extracted");
        let entries = extract_archive(&batch.archives[0], &out).await.unwrap();
        assert_eq!(entries, 1);
        assert!(out.join("keep/photo.jpg").exists());
    }

    #[tokio::test]
    async fn missing_source_yields_empty_batch() {
        let root = TempDir::new().unwrap();
        let batch = create_archives(&root.path().join("nope"), root.path(), 5)
            .await
            .unwrap();
        assert!(batch.archives.is_empty());
        assert_eq!(batch.token.len(), 24);
    }

    #[tokio::test]
    async fn extracting_a_missing_archive_fails() {
        let root = TempDir::new().unwrap();
        let err = extract_archive(&root.path().join("none.zip"), root.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[tokio::test]
    async fn extracting_garbage_fails_with_zip_error() {
        let root = TempDir::new().unwrap();
        let bogus = root.path().join("bogus.zip");
        std::fs::write(&bogus, b"not a zip").unwrap();
        let err = extract_archive(&bogus, &root.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Zip { .. }));
    }
}
