//! Frame count normalization.
//!
//! The device runs on coarse wall-clock timing, so it rarely writes exactly
//! the requested number of frames. Normalization keeps a uniformly spaced
//! subset and deletes everything else.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    /// Frames kept on disk, in ascending file name order.
    pub kept: Vec<PathBuf>,
    pub removed: usize,
}

/// Indices to keep out of `actual` frames for a `target` count.
///
/// The stride is a real-valued ratio (never below 1) and each pick is
/// `floor(i * stride)`. With fewer frames than requested every frame is kept.
pub fn select_indices(actual: usize, target: usize) -> Vec<usize> {
    if actual == 0 || target == 0 {
        return Vec::new();
    }
    if actual == target {
        return (0..actual).collect();
    }
    let stride = (actual as f64 / target as f64).max(1.0);
    let picks: BTreeSet<usize> = (0..target)
        .map(|i| (i as f64 * stride).floor() as usize)
        .filter(|idx| *idx < actual)
        .collect();
    picks.into_iter().collect()
}

/// Reduces `frames` (already sorted) to at most `target` files, deleting the
/// unselected ones. Re-running on its own output is a no-op.
pub fn normalize_frames(frames: &[PathBuf], target: u32) -> Result<NormalizeOutcome> {
    let target = target as usize;
    if frames.len() == target {
        return Ok(NormalizeOutcome {
            kept: frames.to_vec(),
            removed: 0,
        });
    }

    let picks = select_indices(frames.len(), target);
    let mut keep = picks.iter().peekable();
    let mut kept = Vec::with_capacity(picks.len());
    let mut removed = 0;
    for (idx, path) in frames.iter().enumerate() {
        if keep.peek() == Some(&&idx) {
            keep.next();
            kept.push(path.clone());
            continue;
        }
        remove_frame(path)?;
        removed += 1;
    }
    log::info!(
        "normalized frames: {} captured, {} kept, {} removed (target {})",
        frames.len(),
        kept.len(),
        removed,
        target
    );
    Ok(NormalizeOutcome { kept, removed })
}

fn remove_frame(path: &Path) -> Result<()> {
    std::fs::remove_file(path)
        .map_err(|e| PipelineError::storage(format!("remove {}", path.display()), e))
}
