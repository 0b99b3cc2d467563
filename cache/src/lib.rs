//! Content-addressed cache of session execution results, keyed by the
//! session's finalized hash -- grounded on `codeprocessors/base.py`'s cache
//! methods, generalized from the SQLite-backed idiom in
//! `retrieval/src/embeddings/cache.rs` to the spec's zip-archive-per-`hash_root`
//! layout. Reused across builds so unchanged sessions skip re-execution.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use codebraid_chunk::{CodeChunk, RichOutput};
use codebraid_collections::Session;
use codebraid_message::{Message, MessageKind, MessageList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

type Blake2b256 = Blake2b<U32>;

/// Stand-in for `codebraid.VERSION`, written into every cache/index file so
/// a version bump invalidates old caches on load.
pub const CODEBRAID_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The constant cache key used when the document came from stdin rather
/// than a file on disk -- grounded on spec §4.I's "or the constant `<string>`".
pub const STDIN_CACHE_KEY: &str = "<string>";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not create cache directory {path}: {source}")]
    CreateDir { path: PathBuf, #[source] source: std::io::Error },
    #[error("cache is locked by another process (lock file: {path})")]
    Locked { path: PathBuf },
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("zip archive error at {path}: {source}")]
    Zip { path: PathBuf, #[source] source: zip::result::ZipError },
    #[error("malformed cache JSON at {path}: {source}")]
    Json { path: PathBuf, #[source] source: serde_json::Error },
}

/// `hex(blake2b(origins))[:16]`, home-sanitized first -- one cache key
/// covers every session built from the same source document(s).
pub fn compute_cache_key(origins: &[String]) -> String {
    let mut digest = Blake2b256::new();
    for origin in origins {
        digest.update(sanitize_home(origin).as_bytes());
        digest.update(b"\0");
    }
    let hex = format!("{:x}", digest.finalize());
    hex[..16].to_string()
}

fn sanitize_home(path: &str) -> String {
    match dirs::home_dir() {
        Some(home) => {
            let home = home.to_string_lossy();
            if home.is_empty() { path.to_string() } else { path.replacen(home.as_ref(), "~", 1) }
        }
        None => path.to_string(),
    }
}


/// One chunk's cached output -- grounded on spec §6's `SessionCache.code_chunks` entry.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ChunkCache {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repl_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rich_output: Option<Vec<RichOutput>>,
}

impl ChunkCache {
    fn is_empty(&self) -> bool {
        self.errors.is_empty()
            && self.warnings.is_empty()
            && self.stdout_lines.is_none()
            && self.stderr_lines.is_none()
            && self.repl_lines.is_none()
            && self.expr_lines.is_none()
            && self.rich_output.is_none()
    }
}

/// One session's cached result, keyed by the session's full `hash` inside
/// the shared `<hash_root>.zip` archive -- grounded on spec §6's `SessionCache`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SessionCache {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_errors: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_warnings: Vec<Message>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_files: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub code_chunks: HashMap<String, ChunkCache>,
}

impl SessionCache {
    /// Build a cache entry from an already-executed session, or `None` if
    /// there's nothing cacheable about it (no errors, warnings, or output
    /// anywhere) -- grounded on `_update_session_cache`'s per-chunk skip.
    pub fn from_session(session: &Session) -> Self {
        let mut code_chunks = HashMap::new();
        for (idx, chunk) in session.chunks.iter().enumerate() {
            let entry = chunk_cache_entry(chunk);
            if !entry.is_empty() {
                code_chunks.insert(idx.to_string(), entry);
            }
        }
        SessionCache {
            session_errors: session.errors.cacheable().into_iter().cloned().collect(),
            session_warnings: session.warnings.cacheable().into_iter().cloned().collect(),
            session_files: Vec::new(),
            code_chunks,
        }
    }

    /// Rehydrate a session's chunks from a loaded cache entry, marking the
    /// session as not needing execution -- grounded on `_load_session_cache`.
    pub fn apply_to(&self, session: &mut Session) {
        for msg in &self.session_errors {
            session.errors.push(msg.clone());
        }
        for msg in &self.session_warnings {
            session.warnings.push(msg.clone());
        }
        for (idx_str, entry) in &self.code_chunks {
            let Ok(idx) = idx_str.parse::<usize>() else { continue };
            let Some(chunk) = session.chunks.get_mut(idx) else { continue };
            for msg in &entry.errors {
                chunk.errors.push(msg.clone());
            }
            for msg in &entry.warnings {
                chunk.warnings.push(msg.clone());
            }
            if let Some(lines) = &entry.stdout_lines {
                chunk.stdout_lines = lines.clone();
            }
            if let Some(lines) = &entry.stderr_lines {
                chunk.stderr_lines = lines.clone();
            }
            if let Some(lines) = &entry.repl_lines {
                chunk.repl_lines = lines.clone();
            }
            if let Some(lines) = &entry.expr_lines {
                chunk.expr_lines = lines.clone();
            }
            if let Some(rich) = &entry.rich_output {
                chunk.rich_output = Some(rich.clone());
            }
        }
        session.needs_exec = false;
    }
}

fn chunk_cache_entry(chunk: &CodeChunk) -> ChunkCache {
    ChunkCache {
        errors: messages_from(&chunk.errors),
        warnings: messages_from(&chunk.warnings),
        stdout_lines: non_empty(&chunk.stdout_lines),
        stderr_lines: non_empty(&chunk.stderr_lines),
        repl_lines: non_empty(&chunk.repl_lines),
        expr_lines: non_empty(&chunk.expr_lines),
        rich_output: chunk.rich_output.clone(),
    }
}

fn messages_from(list: &MessageList) -> Vec<Message> {
    list.cacheable().into_iter().cloned().collect()
}

fn non_empty(lines: &[String]) -> Option<Vec<String>> {
    if lines.is_empty() { None } else { Some(lines.to_vec()) }
}

/// `<cache_root>/<cache_key>/index.json`'s payload, tracking every file
/// this cache key currently owns so a future build can detect staleness and
/// clean up abandoned rich-output files -- grounded on `_update_cache_index`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    pub codebraid_version: String,
    pub origins: Option<Vec<String>>,
    pub files: Vec<String>,
}

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LOCK_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns one `<cache_root>/<cache_key>/` directory for the lifetime of a
/// build -- grounded on `CodeProcessor`'s `_prep_cache`/`cleanup` pair.
pub struct CacheManager {
    dir: PathBuf,
    cache_key: String,
    lock_path: PathBuf,
    locked: bool,
    created_files: Vec<PathBuf>,
}

impl CacheManager {
    /// `mkdir -p`, acquire the exclusive lock, and load (or reset) the
    /// index -- grounded on `_prep_cache`.
    pub async fn prepare(cache_root: &Path, cache_key: &str, origins: Option<&[String]>) -> Result<Self, CacheError> {
        let dir = cache_root.join(cache_key);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| CacheError::CreateDir { path: dir.clone(), source: e })?;

        let lock_path = dir.join(format!("{cache_key}.lock"));
        acquire_lock(&lock_path).await?;

        let mut manager = CacheManager { dir, cache_key: cache_key.to_string(), lock_path, locked: true, created_files: Vec::new() };
        manager.reconcile_index(origins).await?;
        Ok(manager)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(format!("{}_index.zip", self.cache_key))
    }

    fn hash_root_path(&self, hash_root: &str) -> PathBuf {
        self.dir.join(format!("{hash_root}.zip"))
    }

    /// If the on-disk index doesn't match this build's version or origin
    /// set, wipe only the files it names (never the directory itself).
    async fn reconcile_index(&mut self, origins: Option<&[String]>) -> Result<(), CacheError> {
        let index_path = self.index_path();
        let Some(old) = read_index(&index_path)? else {
            return Ok(());
        };
        let origins_match = match (origins, &old.origins) {
            (Some(a), Some(b)) => a == b.as_slice(),
            (None, None) => true,
            _ => false,
        };
        let stale = old.codebraid_version != CODEBRAID_VERSION
            || !origins_match
            || old.files.iter().any(|f| !self.dir.join(f).exists());
        if stale {
            tracing::debug!(dir = %self.dir.display(), "cache index stale, wiping indexed files");
            for file in &old.files {
                let path = self.dir.join(file);
                let _ = tokio::fs::remove_file(&path).await;
            }
            let _ = tokio::fs::remove_file(&index_path).await;
        }
        Ok(())
    }

    /// Open `<hash_root>.zip` and pull out this session's entry, if any.
    pub async fn load(&self, hash_root: &str, hash: &str) -> Result<Option<SessionCache>, CacheError> {
        let path = self.hash_root_path(hash_root);
        let Some(mut archive) = open_archive(&path)? else {
            return Ok(None);
        };
        let mut entries = read_cache_json(&mut archive, &path)?;
        Ok(entries.remove(hash))
    }

    /// Merge this session's new entry into its `hash_root` archive,
    /// preserving every other session already cached there -- grounded on
    /// `_update_session_cache`.
    pub async fn update(&mut self, hash_root: &str, hash: &str, entry: SessionCache) -> Result<(), CacheError> {
        let path = self.hash_root_path(hash_root);
        let mut entries = match open_archive(&path)? {
            Some(mut archive) => read_cache_json(&mut archive, &path)?,
            None => HashMap::new(),
        };
        entries.insert(hash.to_string(), entry);
        write_cache_json(&path, &entries)?;
        self.created_files.push(path);
        Ok(())
    }

    /// Write the new index: every `hash_root.zip` this build touched, plus
    /// every rich-output file any cached session references, plus the
    /// index file itself; delete anything the old index named that isn't
    /// in that set -- grounded on `_update_cache_index`.
    pub async fn finalize_index(&mut self, hash_roots: &[String], files: &[String], origins: Option<&[String]>) -> Result<(), CacheError> {
        let index_path = self.index_path();
        let mut keep: Vec<String> = hash_roots.iter().map(|r| format!("{r}.zip")).collect();
        keep.extend(files.iter().cloned());
        let index_name = index_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        keep.push(index_name);

        if let Some(old) = read_index(&index_path)? {
            for file in &old.files {
                if !keep.contains(file) {
                    let _ = tokio::fs::remove_file(self.dir.join(file)).await;
                }
            }
        }

        let new_index = CacheIndex { codebraid_version: CODEBRAID_VERSION.to_string(), origins: origins.map(|o| o.to_vec()), files: keep };
        write_index(&index_path, &new_index)?;
        Ok(())
    }

    /// Release the lock and, when `no_cache` is set, remove everything this
    /// build wrote and try (non-fatally) to remove the now-maybe-empty
    /// key and root directories -- grounded on `cleanup`.
    pub async fn cleanup(&mut self, no_cache: bool) -> Result<(), CacheError> {
        if no_cache {
            for file in self.created_files.drain(..) {
                let _ = tokio::fs::remove_file(&file).await;
            }
            let _ = tokio::fs::remove_dir(&self.dir).await;
            if let Some(root) = self.dir.parent() {
                let _ = tokio::fs::remove_dir(root).await;
            }
        }
        if self.locked {
            let _ = tokio::fs::remove_file(&self.lock_path).await;
            self.locked = false;
        }
        Ok(())
    }
}

async fn acquire_lock(lock_path: &Path) -> Result<(), CacheError> {
    let deadline = tokio::time::Instant::now() + LOCK_POLL_TIMEOUT;
    loop {
        match std::fs::OpenOptions::new().write(true).create_new(true).open(lock_path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(CacheError::Locked { path: lock_path.to_path_buf() });
                }
                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
            }
            Err(e) => return Err(CacheError::Io { path: lock_path.to_path_buf(), source: e }),
        }
    }
}

fn read_index(path: &Path) -> Result<Option<CacheIndex>, CacheError> {
    let Some(mut archive) = open_archive(path)? else {
        return Ok(None);
    };
    let mut file = archive.by_name("index.json").map_err(|e| CacheError::Zip { path: path.to_path_buf(), source: e })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| CacheError::Io { path: path.to_path_buf(), source: e })?;
    let index = serde_json::from_str(&contents).map_err(|e| CacheError::Json { path: path.to_path_buf(), source: e })?;
    Ok(Some(index))
}

fn write_index(path: &Path, index: &CacheIndex) -> Result<(), CacheError> {
    let body = serde_json::to_vec_pretty(index).map_err(|e| CacheError::Json { path: path.to_path_buf(), source: e })?;
    write_single_entry_zip(path, "index.json", &body)
}

fn open_archive(path: &Path) -> Result<Option<zip::ZipArchive<std::fs::File>>, CacheError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = std::fs::File::open(path).map_err(|e| CacheError::Io { path: path.to_path_buf(), source: e })?;
    let archive = zip::ZipArchive::new(file).map_err(|e| CacheError::Zip { path: path.to_path_buf(), source: e })?;
    Ok(Some(archive))
}

fn read_cache_json(archive: &mut zip::ZipArchive<std::fs::File>, path: &Path) -> Result<HashMap<String, SessionCache>, CacheError> {
    let mut file = archive.by_name("cache.json").map_err(|e| CacheError::Zip { path: path.to_path_buf(), source: e })?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(|e| CacheError::Io { path: path.to_path_buf(), source: e })?;
    drop(file);
    #[derive(Deserialize)]
    struct OnDisk {
        #[allow(dead_code)]
        codebraid_version: String,
        cache: HashMap<String, SessionCache>,
    }
    let on_disk: OnDisk = serde_json::from_str(&contents).map_err(|e| CacheError::Json { path: path.to_path_buf(), source: e })?;
    Ok(on_disk.cache)
}

fn write_cache_json(path: &Path, entries: &HashMap<String, SessionCache>) -> Result<(), CacheError> {
    let body = serde_json::json!({
        "codebraid_version": CODEBRAID_VERSION,
        "cache": entries,
    });
    let bytes = serde_json::to_vec_pretty(&body).map_err(|e| CacheError::Json { path: path.to_path_buf(), source: e })?;
    write_single_entry_zip(path, "cache.json", &bytes)
}

/// Write `name` -> `bytes` into a fresh zip at `path`, via a sibling temp
/// file renamed over the destination so a crash mid-write never leaves a
/// truncated archive -- grounded on spec §5's "session cache files are
/// written atomically per session".
fn write_single_entry_zip(path: &Path, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp_path = path.with_extension("zip.tmp");
    {
        let file = std::fs::File::create(&tmp_path).map_err(|e| CacheError::Io { path: tmp_path.clone(), source: e })?;
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(name, options).map_err(|e| CacheError::Zip { path: tmp_path.clone(), source: e })?;
        writer.write_all(bytes).map_err(|e| CacheError::Io { path: tmp_path.clone(), source: e })?;
        writer.finish().map_err(|e| CacheError::Zip { path: tmp_path.clone(), source: e })?;
    }
    std::fs::rename(&tmp_path, path).map_err(|e| CacheError::Io { path: path.to_path_buf(), source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_and_home_sanitized() {
        let a = compute_cache_key(&["/tmp/doc.md".to_string()]);
        let b = compute_cache_key(&["/tmp/doc.md".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn different_origins_yield_different_keys() {
        let a = compute_cache_key(&["/tmp/one.md".to_string()]);
        let b = compute_cache_key(&["/tmp/two.md".to_string()]);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn update_then_load_round_trips_a_session_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CacheManager::prepare(dir.path(), "key1", None).await.unwrap();
        let mut entry = SessionCache::default();
        entry.code_chunks.insert("0".to_string(), ChunkCache { stdout_lines: Some(vec!["hi".to_string()]), ..Default::default() });
        manager.update("root1", "hash1", entry).await.unwrap();

        let loaded = manager.load("root1", "hash1").await.unwrap().unwrap();
        assert_eq!(loaded.code_chunks["0"].stdout_lines, Some(vec!["hi".to_string()]));
        manager.cleanup(false).await.unwrap();
    }

    #[tokio::test]
    async fn update_preserves_other_sessions_in_the_same_hash_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CacheManager::prepare(dir.path(), "key1", None).await.unwrap();
        manager.update("root1", "hashA", SessionCache::default()).await.unwrap();
        manager.update("root1", "hashB", SessionCache::default()).await.unwrap();
        assert!(manager.load("root1", "hashA").await.unwrap().is_some());
        assert!(manager.load("root1", "hashB").await.unwrap().is_some());
        manager.cleanup(false).await.unwrap();
    }

    #[tokio::test]
    async fn no_cache_cleanup_removes_created_archives() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CacheManager::prepare(dir.path(), "key1", None).await.unwrap();
        manager.update("root1", "hash1", SessionCache::default()).await.unwrap();
        let archive_path = manager.hash_root_path("root1");
        assert!(archive_path.exists());
        manager.cleanup(true).await.unwrap();
        assert!(!archive_path.exists());
    }
}
