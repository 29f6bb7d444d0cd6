//! Persistence of annotated encodings as `{prefix}_{n}.pickle` artifacts.
//!
//! An artifact holds the bincode serialisation of a `Vec<AnnotatedEncoding>`.
//! Writes go to a temporary sibling first and are renamed into place.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use mrc_core::{divide_into_chunks, AnnotatedEncoding, ArtifactChunking};

pub const ARTIFACT_EXTENSION: &str = "pickle";

/// `{dir}/{prefix}_{n}.pickle`, `n` starting at 1.
pub fn artifact_path(dir: &Path, prefix: &str, n: usize) -> PathBuf {
    dir.join(format!("{prefix}_{n}.{ARTIFACT_EXTENSION}"))
}

pub fn write_artifact(path: &Path, encodings: &[AnnotatedEncoding]) -> Result<()> {
    let tmp = path.with_extension(format!("{ARTIFACT_EXTENSION}.tmp"));
    {
        let file = File::create(&tmp).with_context(|| format!("Cannot create {}", tmp.display()))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, encodings)
            .with_context(|| format!("Cannot serialise encodings to {}", tmp.display()))?;
        writer.flush()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Cannot move artifact into {}", path.display()))?;
    debug!("Wrote {} encodings to {}", encodings.len(), path.display());
    Ok(())
}

pub fn read_artifact(path: &Path) -> Result<Vec<AnnotatedEncoding>> {
    let file = File::open(path).with_context(|| format!("Cannot open artifact {}", path.display()))?;
    bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("Cannot deserialise artifact {}", path.display()))
}

/// Read `{prefix}_1`, `{prefix}_2`, … until the first missing index; one entry per artifact.
pub fn read_split(dir: &Path, prefix: &str) -> Result<Vec<Vec<AnnotatedEncoding>>> {
    let mut artifacts = Vec::new();
    loop {
        let path = artifact_path(dir, prefix, artifacts.len() + 1);
        if !path.exists() { break; }
        artifacts.push(read_artifact(&path)?);
    }
    if artifacts.is_empty() {
        bail!(mrc_core::error::Error::NotFound(format!("no '{prefix}' artifacts in {}", dir.display())));
    }
    info!("Read {} '{}' artifacts from {}", artifacts.len(), prefix, dir.display());
    Ok(artifacts)
}

/// Write `encodings` under `dir`, one artifact per chunk, and return the paths in order.
pub fn persist(
    encodings: &[AnnotatedEncoding],
    chunking: ArtifactChunking,
    dir: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Cannot create output directory {}", dir.display()))?;
    let size = match chunking {
        ArtifactChunking::Single => encodings.len().max(1),
        ArtifactChunking::Every(n) => n.get(),
    };
    let mut paths = Vec::new();
    for (i, chunk) in divide_into_chunks(encodings, size)?.enumerate() {
        let path = artifact_path(dir, prefix, i + 1);
        write_artifact(&path, chunk)?;
        paths.push(path);
    }
    if paths.is_empty() {
        let path = artifact_path(dir, prefix, 1);
        write_artifact(&path, &[])?;
        paths.push(path);
    }
    info!("Persisted {} encodings as {} '{}' artifacts", encodings.len(), paths.len(), prefix);
    Ok(paths)
}
