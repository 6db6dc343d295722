//! Content-addressable media cache.
//!
//! This module provides:
//! - `MediaIdentity`: SHA-256 over the media's decoded audio, so renamed or
//!   re-tagged copies of the same recording share cache entries
//! - `PcmDecoder` implementations (FFmpeg for any container, a RIFF/WAVE
//!   reader that needs no external tools)
//! - `MediaCacheManager`: staged, verified phase entries per identity
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use subpipe_core::cache::{CachePhase, MediaCacheManager};
//! use subpipe_core::config::IdentityDecoder;
//!
//! let cache = MediaCacheManager::with_decoder_kind("/var/cache/subpipe", IdentityDecoder::Ffmpeg);
//! let id = cache.compute_identity(Path::new("talk.mkv")).unwrap();
//! if let Some(hit) = cache.get(&id, CachePhase::Baseline, None).unwrap() {
//!     println!("{} cached artifact(s)", hit.entry.artifacts.len());
//! }
//! ```

mod identity;
mod manager;
mod types;

pub use identity::{compute_identity, FfmpegDecoder, PcmDecoder, WavDecoder};
pub use manager::{MediaCacheManager, ENTRY_FILE};
pub use types::{
    CacheArtifact, CacheEntry, CacheError, CacheHit, CacheListing, CachePhase, CacheResult,
    MediaIdentity,
};

#[cfg(test)]
pub(crate) use identity::write_test_wav;
