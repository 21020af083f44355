//! Job archive packaging.
//!
//! Layout inside `payload.zip`:
//! - `manifest.json` at the root
//! - `seq/<frame files>` in file name order
//!
//! Entries carry a fixed timestamp and permissions, so equal inputs produce
//! equal bytes. The archive is written to a temporary sibling and renamed
//! into place only after it is fully finished; a failed run never leaves a
//! file at the archive path that could be mistaken for a valid payload.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::job::{JobDir, MANIFEST_FILE, SEQ_DIR};

/// Deflate level for every entry.
const COMPRESSION_LEVEL: i32 = 9;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackagedJob {
    pub archive: PathBuf,
    pub frames: usize,
    pub bytes: u64,
}

/// Bundles the manifest and the whole frame directory of `job`.
pub fn package_job(job: &JobDir) -> Result<PackagedJob> {
    let manifest = job.manifest_path();
    let seq = job.seq_dir();
    if !manifest.is_file() || !seq.is_dir() {
        return Err(PipelineError::InvalidJobState(format!(
            "job {} has no manifest or seq; capture first",
            job.identifier()
        )));
    }

    let archive = job.archive_path();
    let partial = archive.with_extension("zip.partial");
    let frames = match write_archive(&partial, &manifest, &seq) {
        Ok(frames) => frames,
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            return Err(err);
        }
    };
    if let Err(err) = std::fs::rename(&partial, &archive) {
        let _ = std::fs::remove_file(&partial);
        return Err(archive_failed(&archive, err));
    }
    let bytes = std::fs::metadata(&archive)
        .map_err(|e| archive_failed(&archive, e))?
        .len();
    log::info!(
        "packaged job {}: {} frames, {} bytes -> {}",
        job.identifier(),
        frames,
        bytes,
        archive.display()
    );
    Ok(PackagedJob {
        archive,
        frames,
        bytes,
    })
}

fn write_archive(dest: &Path, manifest: &Path, seq: &Path) -> Result<usize> {
    let file = File::create(dest).map_err(|e| archive_failed(dest, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    add_file(&mut zip, MANIFEST_FILE, manifest, options)?;

    zip.add_directory(format!("{}/", SEQ_DIR), options)
        .map_err(|e| archive_failed(dest, e))?;
    let frames = sorted_files(seq)?;
    for frame in &frames {
        let name = frame
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        add_file(&mut zip, &format!("{}/{}", SEQ_DIR, name), frame, options)?;
    }

    let mut out = zip.finish().map_err(|e| archive_failed(dest, e))?;
    out.flush().map_err(|e| archive_failed(dest, e))?;
    out.get_ref()
        .sync_all()
        .map_err(|e| archive_failed(dest, e))?;
    Ok(frames.len())
}

fn add_file<W: Write + std::io::Seek>(
    zip: &mut ZipWriter<W>,
    entry: &str,
    source: &Path,
    options: FileOptions,
) -> Result<()> {
    let mut input = File::open(source).map_err(|e| archive_failed(source, e))?;
    zip.start_file(entry, options)
        .map_err(|e| archive_failed(source, e))?;
    std::io::copy(&mut input, zip).map_err(|e| archive_failed(source, e))?;
    Ok(())
}

/// Every regular file in `dir`, not only frames: the whole directory ships.
fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| archive_failed(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| archive_failed(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn archive_failed(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::ArchiveFailed(format!("{}: {}", path.display(), err))
}
