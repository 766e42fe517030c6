//! Media library index boundary
//!
//! The real metadata index is an external collaborator; the streaming
//! pipeline only depends on the [`MediaIndex`] trait. [`MemoryIndex`] is the
//! built-in implementation: a startup walk of the media root that probes
//! each file for tags and duration.
//!
//! [`PathGuard`] enforces the media-root security boundary: any path taken
//! from a control message must canonicalize to a location inside the root
//! before a file is opened.

use crate::error::{Error, Result};
use cadenza_common::Track;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions considered playable during the scan.
const MEDIA_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "oga", "m4a", "mp4", "aac", "wav"];

/// Text search over the media library.
///
/// Implementations return tracks by value; callers copy results into their
/// queues and never hold references into the index.
pub trait MediaIndex: Send + Sync {
    /// Case-insensitive text search over title, artist, album and filename.
    fn search(&self, query: &str, limit: usize) -> Vec<Track>;

    /// Exact lookup by (canonical) path.
    fn get_by_path(&self, path: &Path) -> Option<Track>;

    /// All tracks by an artist (case-insensitive match).
    fn tracks_by_artist(&self, artist: &str, limit: usize) -> Vec<Track>;

    /// All tracks on an album (case-insensitive match).
    fn tracks_by_album(&self, album: &str, limit: usize) -> Vec<Track>;
}

/// In-memory index built from a filesystem scan.
pub struct MemoryIndex {
    tracks: Vec<Track>,
    by_path: HashMap<PathBuf, usize>,
}

impl MemoryIndex {
    /// Build an index from pre-resolved tracks.
    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        let by_path = tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.path.clone(), i))
            .collect();
        Self { tracks, by_path }
    }

    /// Walk the media root and probe every playable file.
    ///
    /// Unreadable or unrecognized files are skipped with a debug log; the
    /// scan itself only fails if the root cannot be walked at all.
    pub fn scan(root: &Path) -> Result<Self> {
        let mut tracks = Vec::new();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Library scan: cannot access entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let ext = match path.extension().and_then(|e| e.to_str()) {
                Some(e) => e.to_ascii_lowercase(),
                None => continue,
            };
            if !MEDIA_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }

            // Store canonical paths so control-message lookups (which are
            // canonicalized by PathGuard) hit the map directly.
            let canonical = match path.canonicalize() {
                Ok(p) => p,
                Err(e) => {
                    debug!("Library scan: cannot canonicalize {}: {}", path.display(), e);
                    continue;
                }
            };

            match probe_track(&canonical) {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    debug!("Library scan: skipping {}: {}", canonical.display(), e);
                }
            }
        }

        info!("Library scan: indexed {} tracks under {}", tracks.len(), root.display());
        Ok(Self::from_tracks(tracks))
    }

    /// Number of indexed tracks.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl MediaIndex for MemoryIndex {
    fn search(&self, query: &str, limit: usize) -> Vec<Track> {
        let needle = query.to_lowercase();
        self.tracks
            .iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.artist.to_lowercase().contains(&needle)
                    || t.album.to_lowercase().contains(&needle)
                    || t.path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn get_by_path(&self, path: &Path) -> Option<Track> {
        self.by_path.get(path).map(|&i| self.tracks[i].clone())
    }

    fn tracks_by_artist(&self, artist: &str, limit: usize) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| t.artist.eq_ignore_ascii_case(artist))
            .take(limit)
            .cloned()
            .collect()
    }

    fn tracks_by_album(&self, album: &str, limit: usize) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| t.album.eq_ignore_ascii_case(album))
            .take(limit)
            .cloned()
            .collect()
    }
}

/// Probe one file for tags and duration.
fn probe_track(path: &Path) -> Result<Track> {
    let file = File::open(path)
        .map_err(|e| Error::Library(format!("cannot open {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Library(format!("probe failed: {}", e)))?;

    let mut format = probed.format;
    let mut track = Track::untagged(path);

    // Duration from the first audio track's frame count, when known.
    if let Some(audio_track) = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    {
        if let (Some(n_frames), Some(rate)) = (
            audio_track.codec_params.n_frames,
            audio_track.codec_params.sample_rate,
        ) {
            track.duration_sec = (n_frames / rate as u64) as u32;
        }
    }

    // Tags may live outside the container (ID3) or inside it; take both,
    // container tags last so they win.
    let mut probe_meta = probed.metadata;
    if let Some(metadata) = probe_meta.get() {
        if let Some(rev) = metadata.current() {
            apply_tags(rev, &mut track);
        }
    }
    if let Some(rev) = format.metadata().current() {
        apply_tags(rev, &mut track);
    }

    Ok(track)
}

fn apply_tags(rev: &MetadataRevision, track: &mut Track) {
    for tag in rev.tags() {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => track.title = tag.value.to_string(),
            Some(StandardTagKey::Artist) => track.artist = tag.value.to_string(),
            Some(StandardTagKey::Album) => track.album = tag.value.to_string(),
            _ => {}
        }
    }
}

/// Media-root path boundary.
///
/// Holds the canonicalized media root; `validate` resolves a candidate path
/// (following links and relative segments) and rejects anything that lands
/// outside the root.
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .map_err(|e| Error::Config(format!("invalid media root {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    /// Canonicalized media root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `candidate` and require it to be inside the media root.
    ///
    /// Returns the canonical path for subsequent opens and index lookups.
    pub fn validate(&self, candidate: &Path) -> Result<PathBuf> {
        let resolved = candidate.canonicalize().map_err(|_| {
            Error::PathOutsideRoot(candidate.display().to_string())
        })?;
        if !resolved.starts_with(&self.root) {
            return Err(Error::PathOutsideRoot(candidate.display().to_string()));
        }
        Ok(resolved)
    }
}
