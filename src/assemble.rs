use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::error::{Result, SynclipError};
use crate::unit::ResultArtifact;

/// Concatenate result artifacts, in ascending segment-index order, into one
/// final video.
///
/// Gaps left by failed units are skipped: the output is best effort, not
/// guaranteed to cover the whole original track. An existing output path is
/// never overwritten; a numeric suffix is appended instead.
pub fn assemble(artifacts: &[ResultArtifact], output_dir: &Path) -> Result<PathBuf> {
    if artifacts.is_empty() {
        return Err(SynclipError::NoInputs);
    }

    for artifact in artifacts {
        if !artifact.path.exists() {
            return Err(SynclipError::FileNotFound(
                artifact.path.display().to_string(),
            ));
        }
    }

    let output = next_free_path(output_dir, "final_combined", "mp4");

    info!(
        "Assembling {} artifacts into {}",
        artifacts.len(),
        output.display()
    );

    // Concat demuxer list; re-encode keeps mixed segment encodings
    // compatible.
    let mut list = tempfile::Builder::new()
        .prefix("synclip_concat_")
        .suffix(".txt")
        .tempfile()?;
    list.write_all(concat_manifest(artifacts).as_bytes())?;
    list.flush()?;

    let status = Command::new("ffmpeg")
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(list.path())
        .args(["-vcodec", "libx264", "-acodec", "aac"])
        .arg(&output)
        .status()
        .map_err(|e| SynclipError::Encode(format!("Failed to run FFmpeg: {e}")))?;

    if !status.success() || !output.exists() {
        return Err(SynclipError::Encode(
            "FFmpeg concat failed".to_string(),
        ));
    }

    let max_index = artifacts.iter().map(|a| a.index).max().unwrap_or(0);
    if artifacts.len() < max_index {
        warn!("Assembled output has gaps from failed units");
    }

    info!("Final artifact written to {}", output.display());
    Ok(output)
}

/// Concat demuxer manifest, strictly in ascending segment-index order
/// regardless of the order units finished in.
fn concat_manifest(artifacts: &[ResultArtifact]) -> String {
    let mut ordered: Vec<&ResultArtifact> = artifacts.iter().collect();
    ordered.sort_by_key(|a| a.index);

    let mut manifest = String::new();
    for artifact in ordered {
        manifest.push_str(&format!("file '{}'\n", artifact.path.display()));
    }
    manifest
}

/// First non-colliding path of the form `stem.ext`, `stem_1.ext`, ...
fn next_free_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let base = dir.join(format!("{stem}.{ext}"));
    if !base.exists() {
        return base;
    }
    let mut i = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{i}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}
