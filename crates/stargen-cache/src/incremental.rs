//! Content-keyed memo for per-file computations, reusable across runs.
//!
//! Entries are keyed by `(realpath, op_key)`. Two maps back the cache: `old`
//! holds entries loaded from disk (pinned to the clock they were written
//! at), `new` holds this run's entries. Reads check `new` first and promote
//! a file's `old` entries into `new` on first use, so `persist()` only
//! writes entries for files that still exist and were touched this run or
//! survived invalidation.

use crate::changes::ChangeStream;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stargen_core::error::Result;
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};

const CACHE_VERSION: &str = "watchman/1";

/// Zstd magic bytes, used to detect compressed cache files on load.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[derive(Serialize, Deserialize)]
struct CacheState<V> {
    version: String,
    clock_spec: String,
    entries: HashMap<String, HashMap<String, V>>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: String,
}

/// The compute callback: `(rel_path, content) -> value`.
pub type FileCompute<'a, V> = &'a (dyn Fn(&str, &[u8]) -> Result<V> + Sync);

/// An incremental cache for per-file query results.
///
/// Safe for concurrent use; duplicate computations for the same
/// `(realpath, op_key)` are collapsed with a load-or-store on the file's
/// entry map.
pub struct IncrementalCache<V> {
    /// Cache file location; `None` keeps the cache purely in-memory for the
    /// run (same contract, no cross-run reuse).
    file: Option<PathBuf>,

    /// Symlink resolution memo: original path → realpath, plus the realpath
    /// identity so repeated lookups never stat twice.
    symlinks: DashMap<String, String>,

    /// Clock-pinned entries loaded from disk, drained into `new` on use.
    old: Mutex<HashMap<String, HashMap<String, V>>>,

    /// This run's entries.
    new: DashMap<String, Arc<DashMap<String, V>>>,

    last_clock_spec: Mutex<String>,
}

impl<V> IncrementalCache<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    /// An in-memory cache: per-run memoization only.
    pub fn in_memory() -> Self {
        Self {
            file: None,
            symlinks: DashMap::new(),
            old: Mutex::new(HashMap::new()),
            new: DashMap::new(),
            last_clock_spec: Mutex::new(String::new()),
        }
    }

    /// Open the on-disk cache and invalidate entries against the change
    /// stream. Any load failure degrades to an empty cache.
    pub fn open(file: PathBuf, stream: &dyn ChangeStream) -> Self {
        let mut cache = Self::in_memory();
        cache.file = Some(file);
        cache.read(stream);
        cache
    }

    /// The default cache file location: `$ASPECT_GAZELLE_CACHE`, or a
    /// repo-named file in the temp dir.
    pub fn default_file(repo_name: &str) -> PathBuf {
        match std::env::var("ASPECT_GAZELLE_CACHE") {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => std::env::temp_dir().join(format!("aspect-gazelle-{repo_name}.cache")),
        }
    }

    fn read(&mut self, stream: &dyn ChangeStream) {
        let Some(file) = &self.file else { return };

        let raw = match fs::read(file) {
            Ok(raw) => raw,
            Err(e) => {
                trace!("failed to open cache {}: {e}", file.display());
                return;
            }
        };

        let json = if raw.len() >= 4 && raw[..4] == ZSTD_MAGIC {
            let mut decoder = match zstd::Decoder::new(&raw[..]) {
                Ok(d) => d,
                Err(e) => {
                    warn!("failed to init zstd decoder for {}: {e}", file.display());
                    return;
                }
            };
            let mut decompressed = Vec::new();
            if let Err(e) = decoder.read_to_end(&mut decompressed) {
                warn!("failed to decompress cache {}: {e}", file.display());
                return;
            }
            decompressed
        } else {
            raw
        };

        // A version mismatch silently clears the cache on next persist.
        match serde_json::from_slice::<VersionProbe>(&json) {
            Ok(probe) if probe.version == CACHE_VERSION => {}
            _ => {
                debug!("cache version mismatch in {}, clearing", file.display());
                return;
            }
        }

        let state: CacheState<V> = match serde_json::from_slice(&json) {
            Ok(state) => state,
            Err(e) => {
                warn!("failed to read cache {}: {e}", file.display());
                return;
            }
        };

        let loaded_count = state.entries.len();
        let mut entries = state.entries;

        let diff = match stream.get_diff(&state.clock_spec) {
            Ok(diff) => diff,
            Err(e) => {
                warn!("failed to get diff from the change stream: {e}");
                return;
            }
        };

        // A restarted watcher cannot report reliable deltas.
        if diff.is_fresh_instance {
            info!("change stream state is stale, clearing cache");
            *self.last_clock_spec.lock().unwrap_or_else(|e| e.into_inner()) = diff.clock_spec;
            return;
        }

        // Discard entries which have changed since the last cache write.
        for p in &diff.paths {
            entries.remove(p);
        }

        // Every persisted path was stored by realpath already; pre-seed the
        // symlink memo so those paths skip the stat call.
        for key in entries.keys() {
            self.symlinks.insert(key.clone(), key.clone());
        }

        info!(
            "incremental cache: {}/{} entries at clock {:?}",
            entries.len(),
            loaded_count,
            diff.clock_spec
        );

        *self.old.lock().unwrap_or_else(|e| e.into_inner()) = entries;
        *self.last_clock_spec.lock().unwrap_or_else(|e| e.into_inner()) = diff.clock_spec;
    }

    /// Load the cached value for `(realpath(rel), op_key)`, or read the file
    /// and compute it. Returns the value and whether it was served from the
    /// cache.
    pub fn load_or_store_file(
        &self,
        root: &Path,
        rel: &str,
        op_key: &str,
        compute: FileCompute<'_, V>,
    ) -> Result<(V, bool)> {
        let real = self.resolve_symlink(root, rel)?;

        let file_map = match self.new.get(&real) {
            Some(m) => m.clone(),
            None => {
                // First touch of this file: promote any surviving entries
                // loaded from disk.
                let promoted = self
                    .old
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&real);
                let fresh: DashMap<String, V> = promoted
                    .map(|m| m.into_iter().collect())
                    .unwrap_or_default();
                self.new
                    .entry(real.clone())
                    .or_insert(Arc::new(fresh))
                    .clone()
            }
        };

        if let Some(v) = file_map.get(op_key) {
            return Ok((v.clone(), true));
        }

        let content = fs::read(root.join(&real))?;
        let value = compute(rel, &content)?;

        // Collapse a concurrent computation of the same key: first store
        // wins and the loser returns the stored value.
        let result = match file_map.entry(op_key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => (e.get().clone(), true),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(value.clone());
                (value, false)
            }
        };
        Ok(result)
    }

    /// Resolve a path through the symlink memo. Non-links resolve to
    /// themselves; links resolve to their repo-relative realpath.
    fn resolve_symlink(&self, root: &Path, rel: &str) -> Result<String> {
        if let Some(real) = self.symlinks.get(rel) {
            return Ok(real.clone());
        }

        let full = root.join(rel);
        let meta = fs::symlink_metadata(&full)?;

        let mut real = rel.to_string();
        if meta.file_type().is_symlink() {
            if let (Ok(resolved), Ok(real_root)) = (fs::canonicalize(&full), fs::canonicalize(root))
            {
                if let Ok(stripped) = resolved.strip_prefix(&real_root) {
                    real = stripped.to_string_lossy().replace('\\', "/");
                }
            }
        }

        let real = self
            .symlinks
            .entry(rel.to_string())
            .or_insert(real)
            .clone();
        if real != rel {
            self.symlinks.entry(real.clone()).or_insert(real.clone());
        }
        Ok(real)
    }

    /// Write this run's entries (plus promoted survivors) back to disk.
    /// IO failures are logged; the cache simply won't help the next run.
    pub fn persist(&self) {
        let Some(file) = &self.file else { return };

        let mut entries: HashMap<String, HashMap<String, V>> = HashMap::new();
        for item in self.new.iter() {
            let inner: HashMap<String, V> = item
                .value()
                .iter()
                .map(|kv| (kv.key().clone(), kv.value().clone()))
                .collect();
            entries.insert(item.key().clone(), inner);
        }

        let state = CacheState {
            version: CACHE_VERSION.to_string(),
            clock_spec: self
                .last_clock_spec
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            entries,
        };

        let json = match serde_json::to_vec(&state) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode cache: {e}");
                return;
            }
        };

        let result = fs::File::create(file).and_then(|f| {
            let mut encoder = zstd::Encoder::new(f, 0)?;
            encoder.write_all(&json)?;
            encoder.finish()?;
            Ok(())
        });

        match result {
            Ok(()) => debug!(
                "wrote {} cache entries to {}",
                state.entries.len(),
                file.display()
            ),
            Err(e) => warn!("failed to write cache {}: {e}", file.display()),
        }
    }
}
