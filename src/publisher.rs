use crate::error::{Result, StreamError};
use hls_m3u8::MediaPlaylist;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info};

pub const MANIFEST_NAME: &str = "index.m3u8";
const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = "ts";

/// On-disk locations for one camera's HLS output
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub manifest: PathBuf,
    /// printf-style pattern handed to the encoder
    pub segment_pattern: PathBuf,
}

/// Layout convention for published HLS artifacts:
/// `{root}/{camera_id}/index.m3u8` plus `segment_NNNNN.ts` files next to it.
///
/// The encoder writes the files; this type only knows where they live, how
/// to read the manifest back consistently and how to drop stale segments.
#[derive(Debug, Clone)]
pub struct SegmentPublisher {
    root: PathBuf,
    public_prefix: String,
    window: usize,
}

impl SegmentPublisher {
    pub fn new(root: impl Into<PathBuf>, public_prefix: &str, window: usize) -> Self {
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
            window: window.max(1),
        }
    }

    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    pub fn paths(&self, camera_id: &str) -> Result<SessionPaths> {
        if !is_safe_component(camera_id) {
            return Err(StreamError::NotFound(camera_id.to_string()));
        }
        let dir = self.root.join(camera_id);
        Ok(SessionPaths {
            manifest: dir.join(MANIFEST_NAME),
            segment_pattern: dir.join(format!("{}%05d.{}", SEGMENT_PREFIX, SEGMENT_EXT)),
            dir,
        })
    }

    /// Stable URL clients poll while the session is alive.
    pub fn publish_path(&self, camera_id: &str) -> String {
        format!("{}/{}/{}", self.public_prefix, camera_id, MANIFEST_NAME)
    }

    /// Resolves a requested file inside a camera directory, rejecting
    /// anything that could escape it.
    pub fn file_path(&self, camera_id: &str, file_name: &str) -> Option<PathBuf> {
        if !is_safe_component(camera_id) || !is_safe_component(file_name) {
            return None;
        }
        Some(self.root.join(camera_id).join(file_name))
    }

    /// Empties (or creates) the camera directory before a new encoder starts.
    pub async fn prepare(&self, camera_id: &str) -> Result<SessionPaths> {
        let paths = self.paths(camera_id)?;
        if fs::try_exists(&paths.dir).await.unwrap_or(false) {
            let _ = fs::remove_dir_all(&paths.dir).await;
        }
        fs::create_dir_all(&paths.dir).await?;
        info!(camera_id = %camera_id, dir = ?paths.dir, "HLS output prepared");
        Ok(paths)
    }

    /// Removes the camera directory once its session is gone.
    pub async fn clear(&self, camera_id: &str) -> Result<()> {
        let paths = self.paths(camera_id)?;
        match fs::remove_dir_all(&paths.dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn manifest_exists(&self, camera_id: &str) -> bool {
        match self.paths(camera_id) {
            Ok(paths) => fs::try_exists(&paths.manifest).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Time since the encoder last rewrote the manifest.
    pub async fn manifest_age(&self, camera_id: &str) -> Option<Duration> {
        let paths = self.paths(camera_id).ok()?;
        let modified = fs::metadata(&paths.manifest).await.ok()?.modified().ok()?;
        Some(SystemTime::now().duration_since(modified).unwrap_or_default())
    }

    /// Reads the manifest as clients should see it: only segments that are
    /// physically present, at most `window` of them.
    pub async fn read_manifest(&self, camera_id: &str) -> Result<String> {
        let paths = self.paths(camera_id)?;
        let raw = fs::read_to_string(&paths.manifest).await?;
        let present = list_segment_files(&paths.dir).await?;

        match live_window(&raw, &present, self.window) {
            Some(rendered) => Ok(rendered),
            // Mid-write or foreign content; hand it out untouched
            None => Ok(raw),
        }
    }

    /// Deletes segment files older than the manifest's current window.
    /// Returns how many files were removed.
    pub async fn prune(&self, camera_id: &str) -> Result<usize> {
        let paths = self.paths(camera_id)?;
        let raw = match fs::read_to_string(&paths.manifest).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let Ok(playlist) = MediaPlaylist::try_from(raw.as_str()) else {
            return Ok(0);
        };
        let numbers: Vec<Option<u64>> = playlist
            .segments
            .iter()
            .map(|(_, seg)| segment_number(&seg.uri()))
            .collect();

        // Files newer than the window may still be in flight; only go below it
        let windowed = &numbers[numbers.len().saturating_sub(self.window)..];
        let Some(oldest_kept) = windowed.iter().flatten().min().copied() else {
            return Ok(0);
        };

        let mut removed = 0;
        for name in list_segment_files(&paths.dir).await? {
            if segment_number(&name).is_some_and(|n| n < oldest_kept) {
                match fs::remove_file(paths.dir.join(&name)).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if removed > 0 {
            debug!(camera_id = %camera_id, removed, "Pruned stale segments");
        }
        Ok(removed)
    }
}

/// Restricts a media playlist to the segments present on disk, keeps the
/// newest `window` of them and renders it again. `None` when `raw` does not
/// parse as a media playlist.
fn live_window(raw: &str, present: &HashSet<String>, window: usize) -> Option<String> {
    let mut playlist = MediaPlaylist::try_from(raw).ok()?;

    let listed: Vec<usize> = playlist.segments.iter().map(|(index, _)| index).collect();
    let available: Vec<usize> = playlist
        .segments
        .iter()
        .filter(|(_, seg)| {
            let uri: &str = &seg.uri();
            present.contains(uri)
        })
        .map(|(index, _)| index)
        .collect();
    let kept = &available[available.len().saturating_sub(window)..];

    for index in listed {
        if kept.binary_search(&index).is_err() {
            playlist.segments.remove(index);
        }
    }

    // A hole left by a missing file is a discontinuity for the player
    for pair in kept.windows(2) {
        if pair[1] != pair[0] + 1 {
            if let Some(seg) = playlist.segments.get_mut(pair[1]) {
                seg.has_discontinuity = true;
            }
        }
    }
    if let Some(&first) = kept.first() {
        playlist.media_sequence += first;
    }

    Some(playlist.to_string())
}

/// `segment_00042.ts` -> 42
pub fn segment_number(name: &str) -> Option<u64> {
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXT)?
        .strip_suffix('.')?
        .parse()
        .ok()
}

async fn list_segment_files(dir: &Path) -> Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if segment_number(name).is_some() {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
}
