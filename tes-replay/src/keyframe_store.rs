//! Tracks snapshot files captured during file replay so that seeking
//! backwards can resume from the nearest prior snapshot instead of
//! replaying the whole stream from byte zero.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// One captured keyframe: the frame number and stream byte offset it was
/// captured at, plus the path of the snapshot file holding the scene
/// state at that point.
#[derive(Debug, Clone)]
pub struct Keyframe {
    pub frame_number: u32,
    pub stream_offset: u64,
    pub snapshot_path: PathBuf,
}

/// An append-only, strictly-increasing sequence of [`Keyframe`]s.
///
/// The original store did not validate ordering on insert; this version
/// deliberately strengthens that into an assertion (see DESIGN.md), since
/// an out-of-order keyframe would silently break nearest-lookup and is
/// always a caller bug rather than legitimate stream behaviour.
#[derive(Debug, Default)]
pub struct KeyframeStore {
    keyframes: Vec<Keyframe>,
}

impl KeyframeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Appends `keyframe`. Fails if its `frame_number` or `stream_offset`
    /// does not strictly exceed the last entry's.
    pub fn add(&mut self, keyframe: Keyframe) -> Result<()> {
        if let Some(last) = self.keyframes.last() {
            if keyframe.frame_number <= last.frame_number
                || keyframe.stream_offset <= last.stream_offset
            {
                return Err(Error::KeyframeOutOfOrder);
            }
        }
        self.keyframes.push(keyframe);
        Ok(())
    }

    /// The keyframe with the greatest `frame_number` not exceeding
    /// `target_frame`, if any.
    #[must_use]
    pub fn lookup_nearest(&self, target_frame: u32) -> Option<&Keyframe> {
        self.keyframes
            .iter()
            .rev()
            .find(|kf| kf.frame_number <= target_frame)
    }

    #[must_use]
    pub fn last(&self) -> Option<&Keyframe> {
        self.keyframes.last()
    }

    /// Removes the single keyframe at exactly `frame_number`, deleting its
    /// snapshot file. Used when a keyframe snapshot fails to replay during
    /// a reverse seek, so the broken entry is not offered again by
    /// [`Self::lookup_nearest`]. Returns whether an entry was found.
    pub fn remove(&mut self, frame_number: u32) -> bool {
        let Some(index) = self
            .keyframes
            .iter()
            .position(|kf| kf.frame_number == frame_number)
        else {
            return false;
        };
        let kf = self.keyframes.remove(index);
        let _ = std::fs::remove_file(&kf.snapshot_path);
        true
    }

    /// Removes every keyframe after (not including) `frame_number`,
    /// deleting their snapshot files. Used after a `RESET` truncates the
    /// usable timeline.
    pub fn truncate_after(&mut self, frame_number: u32) {
        let split = self
            .keyframes
            .partition_point(|kf| kf.frame_number <= frame_number);
        for kf in self.keyframes.drain(split..) {
            let _ = std::fs::remove_file(&kf.snapshot_path);
        }
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Keyframe> {
        self.keyframes.iter()
    }
}

impl Drop for KeyframeStore {
    fn drop(&mut self) {
        for kf in &self.keyframes {
            let _ = std::fs::remove_file(&kf.snapshot_path);
        }
    }
}

#[must_use]
pub fn temp_snapshot_path(dir: &Path, frame_number: u32) -> PathBuf {
    dir.join(format!("tes-keyframe-{frame_number:010}.tes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn add_enforces_strictly_increasing_frame_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = KeyframeStore::new();
        let a = temp_snapshot_path(dir.path(), 10);
        touch(&a);
        store
            .add(Keyframe {
                frame_number: 10,
                stream_offset: 100,
                snapshot_path: a,
            })
            .unwrap();

        let b = temp_snapshot_path(dir.path(), 5);
        let err = store
            .add(Keyframe {
                frame_number: 5,
                stream_offset: 200,
                snapshot_path: b,
            })
            .unwrap_err();
        assert!(matches!(err, Error::KeyframeOutOfOrder));
    }

    #[test]
    fn lookup_nearest_finds_closest_at_or_below_target() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = KeyframeStore::new();
        for frame in [10, 20, 30] {
            let path = temp_snapshot_path(dir.path(), frame);
            touch(&path);
            store
                .add(Keyframe {
                    frame_number: frame,
                    stream_offset: u64::from(frame) * 100,
                    snapshot_path: path,
                })
                .unwrap();
        }
        assert_eq!(store.lookup_nearest(25).unwrap().frame_number, 20);
        assert_eq!(store.lookup_nearest(10).unwrap().frame_number, 10);
        assert!(store.lookup_nearest(5).is_none());
    }

    #[test]
    fn remove_deletes_exact_frame_and_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = KeyframeStore::new();
        for frame in [10, 20, 30] {
            let path = temp_snapshot_path(dir.path(), frame);
            touch(&path);
            store
                .add(Keyframe {
                    frame_number: frame,
                    stream_offset: u64::from(frame) * 100,
                    snapshot_path: path,
                })
                .unwrap();
        }
        let removed_path = store.keyframes[1].snapshot_path.clone();
        assert!(store.remove(20));
        assert_eq!(store.len(), 2);
        assert!(!removed_path.exists());
        assert!(store.lookup_nearest(25).is_some_and(|kf| kf.frame_number == 10));
        assert!(!store.remove(20));
    }

    #[test]
    fn truncate_after_deletes_future_snapshot_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = KeyframeStore::new();
        for frame in [10, 20, 30] {
            let path = temp_snapshot_path(dir.path(), frame);
            touch(&path);
            store
                .add(Keyframe {
                    frame_number: frame,
                    stream_offset: u64::from(frame) * 100,
                    snapshot_path: path,
                })
                .unwrap();
        }
        let kept_path = store.keyframes[0].snapshot_path.clone();
        store.truncate_after(10);
        assert_eq!(store.len(), 1);
        assert!(kept_path.exists());
    }
}
