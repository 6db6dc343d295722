//! Content-addressed media cache on the local filesystem.
//!
//! Layout: `<root>/<identity>/<phase>[/<secondary>]/` holding `entry.json`
//! and the artifact files. Writes are staged in `<root>/<identity>/.staging-*`
//! and renamed into place, so readers never observe a partial entry.
//! Concurrent writers of the same key resolve to last-writer-wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::identity::{compute_identity, FfmpegDecoder, PcmDecoder, WavDecoder};
use super::types::{
    CacheArtifact, CacheEntry, CacheError, CacheHit, CacheListing, CachePhase, CacheResult,
    MediaIdentity,
};
use crate::config::IdentityDecoder;
use crate::fs_utils::{read_json, sha256_file, write_json_atomic};

/// Name of the record file inside every entry directory.
pub const ENTRY_FILE: &str = "entry.json";

const STAGING_PREFIX: &str = ".staging-";
const TRASH_PREFIX: &str = ".trash-";

/// Attempts at swapping a staged entry into place when racing other writers.
const MAX_SWAP_ATTEMPTS: u32 = 5;

/// Store of reusable phase artifacts keyed by media identity.
pub struct MediaCacheManager {
    root: PathBuf,
    decoder: Box<dyn PcmDecoder>,
}

impl MediaCacheManager {
    pub fn new(root: impl Into<PathBuf>, decoder: Box<dyn PcmDecoder>) -> Self {
        Self {
            root: root.into(),
            decoder,
        }
    }

    /// Cache at `root` using the configured identity decoder.
    pub fn with_decoder_kind(root: impl Into<PathBuf>, kind: IdentityDecoder) -> Self {
        let decoder: Box<dyn PcmDecoder> = match kind {
            IdentityDecoder::Ffmpeg => Box::new(FfmpegDecoder::default()),
            IdentityDecoder::Wav => Box::new(WavDecoder),
        };
        Self::new(root, decoder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compute_identity(&self, media: &Path) -> CacheResult<MediaIdentity> {
        compute_identity(self.decoder.as_ref(), media)
    }

    /// Directory of the entry for (`id`, `phase`, `secondary`).
    pub fn entry_dir(
        &self,
        id: &MediaIdentity,
        phase: CachePhase,
        secondary: Option<&str>,
    ) -> CacheResult<PathBuf> {
        let phase_dir = self.root.join(id.as_str()).join(phase.as_str());
        match (phase.requires_secondary(), secondary) {
            (false, None) => Ok(phase_dir),
            (true, Some(key)) => Ok(phase_dir.join(sanitize_secondary(key)?)),
            (false, Some(_)) => Err(CacheError::InvalidKey(format!(
                "phase '{}' takes no secondary key",
                phase
            ))),
            (true, None) => Err(CacheError::InvalidKey(format!(
                "phase '{}' requires a secondary key",
                phase
            ))),
        }
    }

    /// Whether an entry record exists and parses. Artifacts are not verified.
    pub fn has(&self, id: &MediaIdentity, phase: CachePhase, secondary: Option<&str>) -> bool {
        self.entry_dir(id, phase, secondary)
            .ok()
            .and_then(|dir| read_json::<CacheEntry>(&dir.join(ENTRY_FILE)).ok())
            .is_some()
    }

    /// Look up and verify an entry.
    ///
    /// Any missing artifact or size/hash mismatch is reported as a miss.
    pub fn get(
        &self,
        id: &MediaIdentity,
        phase: CachePhase,
        secondary: Option<&str>,
    ) -> CacheResult<Option<CacheHit>> {
        let dir = self.entry_dir(id, phase, secondary)?;
        let entry_path = dir.join(ENTRY_FILE);
        if !entry_path.exists() {
            return Ok(None);
        }

        let entry: CacheEntry = match read_json(&entry_path) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Unreadable cache record {}: {}", entry_path.display(), e);
                return Ok(None);
            }
        };

        if let Err(reason) = verify_entry(&dir, &entry, id, phase, secondary) {
            tracing::warn!("Cache entry {} failed verification: {}", dir.display(), reason);
            return Ok(None);
        }

        Ok(Some(CacheHit { entry, dir }))
    }

    /// Store `artifacts` (name, source path) as the entry for the key.
    ///
    /// Replaces any existing entry. The staged copy is verified before it
    /// is moved into place and read back afterwards; a mismatch in our own
    /// bytes is [`CacheError::Corrupted`]. Losing a race to another writer
    /// of the same key is not an error.
    pub fn put(
        &self,
        id: &MediaIdentity,
        phase: CachePhase,
        secondary: Option<&str>,
        artifacts: &[(&str, &Path)],
    ) -> CacheResult<CacheEntry> {
        let final_dir = self.entry_dir(id, phase, secondary)?;
        let identity_dir = self.root.join(id.as_str());
        let staging = identity_dir.join(format!("{}{}", STAGING_PREFIX, unique_suffix()));

        fs::create_dir_all(&staging).map_err(|e| CacheError::io("create cache staging", e))?;
        let staged = self
            .stage_entry(&staging, id, phase, secondary, artifacts)
            .and_then(|entry| {
                verify_entry(&staging, &entry, id, phase, secondary)
                    .map(|()| entry)
                    .map_err(|reason| CacheError::corrupted(&staging, reason))
            });
        let entry = match staged {
            Ok(entry) => entry,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io("create cache phase dir", e))?;
        }
        match swap_into_place(&staging, &final_dir, &identity_dir) {
            Ok(true) => read_back(&final_dir, &entry, id, phase, secondary)?,
            Ok(false) => {
                let _ = fs::remove_dir_all(&staging);
                tracing::debug!("Cache entry {} was written concurrently", final_dir.display());
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        }

        tracing::info!(
            "Cached {} artifact(s) for {}/{}{}",
            entry.artifacts.len(),
            id.short(),
            phase,
            secondary.map(|s| format!("/{}", s)).unwrap_or_default()
        );
        Ok(entry)
    }

    /// Remove all entries of `id`, or only those of one phase.
    ///
    /// Returns whether anything was removed.
    pub fn invalidate(&self, id: &MediaIdentity, phase: Option<CachePhase>) -> CacheResult<bool> {
        let identity_dir = self.root.join(id.as_str());
        let target = match phase {
            Some(phase) => identity_dir.join(phase.as_str()),
            None => identity_dir.clone(),
        };
        if !target.exists() {
            return Ok(false);
        }

        fs::remove_dir_all(&target).map_err(|e| CacheError::io("invalidate cache entry", e))?;
        if phase.is_some() {
            remove_leftovers(&identity_dir)?;
        }

        tracing::info!(
            "Invalidated {}{}",
            id.short(),
            phase.map(|p| format!("/{}", p)).unwrap_or_default()
        );
        Ok(true)
    }

    /// Remove every entry. Returns the number of identities removed.
    pub fn clear(&self) -> CacheResult<usize> {
        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for dir_entry in read_dir(&self.root)? {
            let path = dir_entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| CacheError::io("clear cache", e))?;
                removed += 1;
            }
        }
        tracing::info!("Cleared {} cache identities from {}", removed, self.root.display());
        Ok(removed)
    }

    /// Enumerate stored entries, ordered by identity, phase and key.
    ///
    /// Staging leftovers and unreadable records are skipped.
    pub fn list(&self) -> CacheResult<Vec<CacheListing>> {
        let mut listings = Vec::new();
        if !self.root.exists() {
            return Ok(listings);
        }

        for identity_entry in read_dir(&self.root)? {
            let Some(identity) = identity_entry
                .file_name()
                .to_str()
                .and_then(|name| MediaIdentity::parse(name).ok())
            else {
                continue;
            };
            let identity_dir = identity_entry.path();

            for phase in CachePhase::ALL {
                let phase_dir = identity_dir.join(phase.as_str());
                if !phase_dir.is_dir() {
                    continue;
                }
                if phase.requires_secondary() {
                    for keyed in read_dir(&phase_dir)? {
                        push_listing(&mut listings, &keyed.path(), &identity, phase);
                    }
                } else {
                    push_listing(&mut listings, &phase_dir, &identity, phase);
                }
            }
        }

        listings.sort_by(|a, b| {
            (&a.identity, a.phase, &a.secondary).cmp(&(&b.identity, b.phase, &b.secondary))
        });
        Ok(listings)
    }

    /// Copy a hit's artifacts into `dest_dir`, returning (name, path) pairs.
    pub fn restore(&self, hit: &CacheHit, dest_dir: &Path) -> CacheResult<Vec<(String, PathBuf)>> {
        fs::create_dir_all(dest_dir).map_err(|e| CacheError::io("create restore dir", e))?;
        hit.entry
            .artifacts
            .iter()
            .map(|artifact| {
                let dest = dest_dir.join(&artifact.name);
                fs::copy(hit.dir.join(&artifact.name), &dest)
                    .map_err(|e| CacheError::io(format!("restore {}", artifact.name), e))?;
                Ok((artifact.name.clone(), dest))
            })
            .collect()
    }

    fn stage_entry(
        &self,
        staging: &Path,
        id: &MediaIdentity,
        phase: CachePhase,
        secondary: Option<&str>,
        artifacts: &[(&str, &Path)],
    ) -> CacheResult<CacheEntry> {
        let mut records = Vec::with_capacity(artifacts.len());
        for (name, source) in artifacts {
            validate_artifact_name(name)?;
            let dest = staging.join(name);
            let size = fs::copy(source, &dest)
                .map_err(|e| CacheError::io(format!("stage artifact {}", name), e))?;
            let sha256 =
                sha256_file(&dest).map_err(|e| CacheError::io(format!("hash artifact {}", name), e))?;
            records.push(CacheArtifact {
                name: name.to_string(),
                size,
                sha256,
            });
        }

        let entry = CacheEntry {
            identity: id.clone(),
            phase,
            secondary: secondary.map(str::to_string),
            created_at: Utc::now(),
            artifacts: records,
        };
        write_json_atomic(&staging.join(ENTRY_FILE), &entry)
            .map_err(|e| CacheError::io("write cache record", e))?;
        Ok(entry)
    }
}

/// Check an entry record and its files. Returns the first problem found.
fn verify_entry(
    dir: &Path,
    entry: &CacheEntry,
    id: &MediaIdentity,
    phase: CachePhase,
    secondary: Option<&str>,
) -> Result<(), String> {
    if &entry.identity != id || entry.phase != phase || entry.secondary.as_deref() != secondary {
        return Err("record belongs to a different key".to_string());
    }
    for artifact in &entry.artifacts {
        let path = dir.join(&artifact.name);
        let size = fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|_| format!("{} is missing", artifact.name))?;
        if size != artifact.size {
            return Err(format!(
                "{} has {} bytes, expected {}",
                artifact.name, size, artifact.size
            ));
        }
        let hash = sha256_file(&path).map_err(|e| format!("{}: {}", artifact.name, e))?;
        if hash != artifact.sha256 {
            return Err(format!("{} checksum mismatch", artifact.name));
        }
    }
    Ok(())
}

/// Check the entry we just moved into place.
///
/// Only our own record failing verification is corruption. A missing
/// record or one written by another writer means a concurrent `put` for
/// the same key replaced ours.
fn read_back(
    final_dir: &Path,
    ours: &CacheEntry,
    id: &MediaIdentity,
    phase: CachePhase,
    secondary: Option<&str>,
) -> CacheResult<()> {
    let record = final_dir.join(ENTRY_FILE);
    let reason = match read_json::<CacheEntry>(&record) {
        Ok(stored) if &stored != ours => return Ok(()),
        Ok(stored) => match verify_entry(final_dir, &stored, id, phase, secondary) {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => format!("unreadable record: {}", e),
    };

    // A moved-aside entry never comes back, so a second look tells a
    // replaced entry from a damaged one.
    match read_json::<CacheEntry>(&record) {
        Ok(stored) if &stored != ours => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        _ => Err(CacheError::corrupted(final_dir, reason)),
    }
}

/// Rename `staging` to `final_dir`, moving an existing entry aside first.
///
/// Returns `false` when other writers kept landing entries for the same
/// key; one of theirs stays in place.
fn swap_into_place(staging: &Path, final_dir: &Path, identity_dir: &Path) -> CacheResult<bool> {
    let mut attempts = 0;
    loop {
        attempts += 1;

        let trash = identity_dir.join(format!("{}{}", TRASH_PREFIX, unique_suffix()));
        let moved_aside = match fs::rename(final_dir, &trash) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(CacheError::io("move previous cache entry aside", e)),
        };

        let renamed = fs::rename(staging, final_dir);
        if moved_aside {
            let _ = fs::remove_dir_all(&trash);
        }

        match renamed {
            Ok(()) => return Ok(true),
            // Another writer landed between our two renames.
            Err(_) if final_dir.exists() && attempts < MAX_SWAP_ATTEMPTS => continue,
            Err(_) if final_dir.exists() => return Ok(false),
            Err(e) => return Err(CacheError::io("move cache entry into place", e)),
        }
    }
}

/// Remove staging and trash directories and drop an identity directory
/// that no longer holds any entry.
fn remove_leftovers(identity_dir: &Path) -> CacheResult<()> {
    let mut has_entries = false;
    for dir_entry in read_dir(identity_dir)? {
        let name = dir_entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX) {
            let _ = fs::remove_dir_all(dir_entry.path());
        } else {
            has_entries = true;
        }
    }
    if !has_entries {
        let _ = fs::remove_dir(identity_dir);
    }
    Ok(())
}

fn push_listing(
    listings: &mut Vec<CacheListing>,
    dir: &Path,
    identity: &MediaIdentity,
    phase: CachePhase,
) {
    if let Ok(entry) = read_json::<CacheEntry>(&dir.join(ENTRY_FILE)) {
        listings.push(CacheListing {
            identity: identity.clone(),
            phase,
            secondary: entry.secondary.clone(),
            artifact_count: entry.artifacts.len(),
            total_bytes: entry.total_bytes(),
            created_at: entry.created_at,
        });
    }
}

fn read_dir(dir: &Path) -> CacheResult<Vec<fs::DirEntry>> {
    fs::read_dir(dir)
        .and_then(|entries| entries.collect::<io::Result<Vec<_>>>())
        .map_err(|e| CacheError::io(format!("list {}", dir.display()), e))
}

/// Map a secondary key (glossary hash, language code) to a directory name.
fn sanitize_secondary(key: &str) -> CacheResult<String> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(CacheError::InvalidKey("empty secondary key".to_string()));
    }
    let mut sanitized: String = trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with('.') {
        sanitized.replace_range(0..1, "_");
    }
    Ok(sanitized)
}

fn validate_artifact_name(name: &str) -> CacheResult<()> {
    let valid = !name.is_empty()
        && name != ENTRY_FILE
        && !name.starts_with('.')
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(format!("bad artifact name '{}'", name)))
    }
}

fn unique_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::identity::write_test_wav;
    use tempfile::{tempdir, TempDir};

    fn setup() -> (TempDir, MediaCacheManager, MediaIdentity) {
        let dir = tempdir().unwrap();
        let cache = MediaCacheManager::with_decoder_kind(dir.path().join("cache"), IdentityDecoder::Wav);
        let media = dir.path().join("talk.wav");
        write_test_wav(&media, &[1, 2, 3, 4, 5, 6], 16_000, None);
        let id = cache.compute_identity(&media).unwrap();
        (dir, cache, id)
    }

    fn artifact(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn put_then_get_returns_identical_bytes() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "transcript.json", b"{\"segments\":[]}");

        let entry = cache
            .put(&id, CachePhase::Baseline, None, &[("transcript.json", source.as_path())])
            .unwrap();
        assert_eq!(entry.artifacts.len(), 1);
        assert!(cache.has(&id, CachePhase::Baseline, None));

        let hit = cache.get(&id, CachePhase::Baseline, None).unwrap().unwrap();
        let stored = hit.artifact_path("transcript.json").unwrap();
        assert_eq!(fs::read(stored).unwrap(), fs::read(&source).unwrap());

        let restore_dir = dir.path().join("restore");
        let restored = cache.restore(&hit, &restore_dir).unwrap();
        assert_eq!(restored[0].0, "transcript.json");
        assert_eq!(fs::read(&restored[0].1).unwrap(), b"{\"segments\":[]}");
    }

    #[test]
    fn truncated_artifact_is_a_miss() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "transcript.json", b"0123456789");
        cache
            .put(&id, CachePhase::Baseline, None, &[("transcript.json", source.as_path())])
            .unwrap();

        let stored = cache
            .entry_dir(&id, CachePhase::Baseline, None)
            .unwrap()
            .join("transcript.json");
        fs::write(&stored, b"01234").unwrap();

        assert!(cache.has(&id, CachePhase::Baseline, None));
        assert!(cache.get(&id, CachePhase::Baseline, None).unwrap().is_none());
    }

    #[test]
    fn same_size_tamper_is_a_miss() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "a.json", b"aaaa");
        cache
            .put(&id, CachePhase::Baseline, None, &[("a.json", source.as_path())])
            .unwrap();

        let stored = cache
            .entry_dir(&id, CachePhase::Baseline, None)
            .unwrap()
            .join("a.json");
        fs::write(&stored, b"bbbb").unwrap();

        assert!(cache.get(&id, CachePhase::Baseline, None).unwrap().is_none());
    }

    #[test]
    fn garbage_record_is_a_miss() {
        let (_dir, cache, id) = setup();
        let entry_dir = cache.entry_dir(&id, CachePhase::Baseline, None).unwrap();
        fs::create_dir_all(&entry_dir).unwrap();
        fs::write(entry_dir.join(ENTRY_FILE), b"{ not json").unwrap();

        assert!(!cache.has(&id, CachePhase::Baseline, None));
        assert!(cache.get(&id, CachePhase::Baseline, None).unwrap().is_none());
    }

    #[test]
    fn later_put_replaces_entry() {
        let (dir, cache, id) = setup();
        let first = artifact(dir.path(), "one.json", b"first");
        let second = artifact(dir.path(), "two.json", b"second");

        cache
            .put(&id, CachePhase::Translation, Some("de"), &[("out.json", first.as_path())])
            .unwrap();
        cache
            .put(&id, CachePhase::Translation, Some("de"), &[("out.json", second.as_path())])
            .unwrap();

        let hit = cache
            .get(&id, CachePhase::Translation, Some("de"))
            .unwrap()
            .unwrap();
        assert_eq!(fs::read(hit.artifact_path("out.json").unwrap()).unwrap(), b"second");

        // No staging or trash directories remain.
        let leftovers: Vec<_> = fs::read_dir(cache.root().join(id.as_str()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn secondary_keys_are_validated_per_phase() {
        let (_dir, cache, id) = setup();

        assert!(cache.entry_dir(&id, CachePhase::Baseline, Some("x")).is_err());
        assert!(cache.entry_dir(&id, CachePhase::Glossary, None).is_err());
        assert!(cache.entry_dir(&id, CachePhase::Translation, Some("  ")).is_err());

        let dir = cache
            .entry_dir(&id, CachePhase::Translation, Some("../pt/BR"))
            .unwrap();
        assert!(dir.starts_with(cache.root().join(id.as_str()).join("translation")));
        assert_eq!(dir.file_name().unwrap(), "_._pt_BR");
    }

    #[test]
    fn invalidate_phase_keeps_other_phases() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "t.json", b"t");
        cache
            .put(&id, CachePhase::Baseline, None, &[("t.json", source.as_path())])
            .unwrap();
        cache
            .put(&id, CachePhase::Glossary, Some("abc"), &[("t.json", source.as_path())])
            .unwrap();

        assert!(cache.invalidate(&id, Some(CachePhase::Glossary)).unwrap());
        assert!(!cache.has(&id, CachePhase::Glossary, Some("abc")));
        assert!(cache.has(&id, CachePhase::Baseline, None));

        assert!(cache.invalidate(&id, None).unwrap());
        assert!(!cache.has(&id, CachePhase::Baseline, None));
        assert!(!cache.invalidate(&id, None).unwrap());
    }

    #[test]
    fn list_skips_staging_leftovers() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "t.json", b"12345");
        cache
            .put(&id, CachePhase::Baseline, None, &[("t.json", source.as_path())])
            .unwrap();
        cache
            .put(&id, CachePhase::Translation, Some("fr"), &[("t.json", source.as_path())])
            .unwrap();
        fs::create_dir_all(cache.root().join(id.as_str()).join(".staging-crashed")).unwrap();

        let listings = cache.list().unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].phase, CachePhase::Baseline);
        assert_eq!(listings[0].total_bytes, 5);
        assert_eq!(listings[1].secondary.as_deref(), Some("fr"));

        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn concurrent_puts_for_one_key_all_succeed() {
        let (dir, cache, id) = setup();
        let root = cache.root().to_path_buf();

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let root = root.clone();
                let id = id.clone();
                let source = artifact(dir.path(), &format!("t{}.json", writer), b"same transcript");
                scope.spawn(move || {
                    let cache = MediaCacheManager::with_decoder_kind(root, IdentityDecoder::Wav);
                    for round in 0..50 {
                        if let Err(e) =
                            cache.put(&id, CachePhase::Baseline, None, &[("t.json", source.as_path())])
                        {
                            panic!("writer {} round {}: {}", writer, round, e);
                        }
                    }
                });
            }
        });

        let hit = cache.get(&id, CachePhase::Baseline, None).unwrap().unwrap();
        assert_eq!(fs::read(hit.artifact_path("t.json").unwrap()).unwrap(), b"same transcript");
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn keys_sharing_a_directory_do_not_share_entries() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "subs.srt", "Olá".as_bytes());
        cache
            .put(&id, CachePhase::Translation, Some("pt/BR"), &[("subs.srt", source.as_path())])
            .unwrap();

        assert_eq!(
            cache.entry_dir(&id, CachePhase::Translation, Some("pt/BR")).unwrap(),
            cache.entry_dir(&id, CachePhase::Translation, Some("pt_BR")).unwrap()
        );
        assert!(cache.get(&id, CachePhase::Translation, Some("pt/BR")).unwrap().is_some());
        assert!(cache.get(&id, CachePhase::Translation, Some("pt_BR")).unwrap().is_none());
    }

    #[test]
    fn bad_artifact_names_are_rejected() {
        let (dir, cache, id) = setup();
        let source = artifact(dir.path(), "t.json", b"t");

        for name in ["", "entry.json", ".hidden", "a/b"] {
            assert!(
                cache
                    .put(&id, CachePhase::Baseline, None, &[(name, source.as_path())])
                    .is_err(),
                "accepted {name:?}"
            );
        }
        assert!(!cache.has(&id, CachePhase::Baseline, None));
    }
}
