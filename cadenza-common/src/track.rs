//! Track metadata value type
//!
//! A `Track` is a by-value copy of library metadata. Queues hold copies, not
//! references into the index — the index may rescan at any time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One playable track: path plus display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Absolute path within the media root.
    pub path: PathBuf,
    /// Display title (file stem if untagged).
    pub title: String,
    /// Display artist (may be empty).
    #[serde(default)]
    pub artist: String,
    /// Display album (may be empty).
    #[serde(default)]
    pub album: String,
    /// Track duration in whole seconds (0 if unknown).
    #[serde(default)]
    pub duration_sec: u32,
}

impl Track {
    /// Build a track with no index metadata: the file stem stands in for the
    /// title, everything else is blank.
    pub fn untagged(path: &Path) -> Self {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            path: path.to_path_buf(),
            title,
            artist: String::new(),
            album: String::new(),
            duration_sec: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untagged_uses_file_stem() {
        let t = Track::untagged(Path::new("/music/artist/song.flac"));
        assert_eq!(t.title, "song");
        assert!(t.artist.is_empty());
        assert_eq!(t.duration_sec, 0);
    }
}
