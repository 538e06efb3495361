//! Cache layout under the configured cache directory.
//!
//! Per-document data lives in a directory named by a hash of the document
//! title so titles with odd characters never touch the filesystem directly.
//! Synthesized audio is shared across documents under `tts/`.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn title_dir(cache_root: &Path, title: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    cache_root.join(hash)
}

pub fn bookmarks_path(cache_root: &Path, title: &str) -> PathBuf {
    title_dir(cache_root, title).join("bookmarks.toml")
}

pub fn tts_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("tts")
}

/// Scratch directory for audio rendered by the device voice.
pub fn device_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("device")
}

/// Stable file name for a synthesized sentence.
pub fn audio_cache_path(tts_dir: &Path, model: &str, voice: &str, sentence: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(voice.as_bytes());
    hasher.update([0u8]);
    hasher.update(sentence.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    tts_dir.join(format!("tts-{hash}.wav"))
}

/// Sibling path that is unique per call, for write-then-rename.
pub fn unique_temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("narrator.tmp")
        .to_string();
    temp_name.push_str(&format!(".tmp-{ts_nanos}-{nonce}"));
    path.with_file_name(temp_name)
}
