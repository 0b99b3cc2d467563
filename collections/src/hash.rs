use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use codebraid_chunk::CodeChunk;
use serde_json::json;

/// `Blake2b` truncated to 256 bits, matching the original's `hashlib.blake2b()`
/// default digest size used for session/cache-key hashing.
type Blake2b256 = Blake2b<U32>;

/// Running digest builder that folds each piece's hash back into the
/// accumulator as a domain separator, grounded on `CodeCollection._hash`
/// (`code_collections.py`): after every piece of canonical input the
/// digest-so-far is mixed back in, so that e.g. two chunks whose code
/// happens to be byte-identical in a different order still hash distinctly
/// when concatenated with their neighbors' pieces.
pub struct RollingHash {
    digest: Blake2b256,
    total_len: usize,
}

impl RollingHash {
    pub fn new() -> Self {
        RollingHash {
            digest: Blake2b256::new(),
            total_len: 0,
        }
    }

    pub fn fold(&mut self, bytes: &[u8]) {
        self.total_len += bytes.len();
        self.digest.update(bytes);
        let running = self.digest.clone().finalize();
        self.digest.update(running);
    }

    /// Finalize into `hex(digest) + "_" + total_len`, the session's `hash`
    /// field. `hash_root` is `hex[:16]`, `run_delim_hash` is `hex[:64]`.
    pub fn finish(self) -> String {
        let hex = format!("{:x}", self.digest.finalize());
        format!("{hex}_{}", self.total_len)
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a just-finalized session hash into `(hash, hash_root, run_delim_hash)`.
/// `hash_root` must be exactly 16 hex chars; `run_delim_hash` is the full
/// 64-hex-char digest (padded if a future digest width were ever smaller,
/// though Blake2b-256's 64-char hex output always satisfies this).
pub fn split_hash(hash: &str) -> (String, String) {
    let hex_part = hash.split('_').next().unwrap_or(hash);
    let hash_root = hex_part.chars().take(16).collect();
    let run_delim_hash = hex_part.chars().take(64).collect();
    (hash_root, run_delim_hash)
}

/// Canonical per-session identity input: `{session_name, executable,
/// executable_opts, args}` for a subprocess session, or `{session_name,
/// jupyter_kernel, jupyter_timeout}` for a Jupyter one -- grounded on the
/// first piece folded into `CodeCollection._hash`.
#[allow(clippy::too_many_arguments)]
pub fn identity_json_subprocess(
    session_name: Option<&str>,
    executable: &str,
    executable_opts: Option<&[String]>,
    args: Option<&[String]>,
) -> Vec<u8> {
    json!({
        "session_name": session_name,
        "executable": executable,
        "executable_opts": executable_opts,
        "args": args,
    })
    .to_string()
    .into_bytes()
}

pub fn identity_json_jupyter(session_name: Option<&str>, jupyter_kernel: &str, jupyter_timeout: f64) -> Vec<u8> {
    json!({
        "session_name": session_name,
        "jupyter_kernel": jupyter_kernel,
        "jupyter_timeout": jupyter_timeout,
    })
    .to_string()
    .into_bytes()
}

/// Per-chunk piece folded into the session hash: `{command, inline,
/// complete}` followed by the chunk's code, exactly as listed in the spec.
pub fn fold_chunk(hash: &mut RollingHash, chunk: &CodeChunk, complete: bool) {
    let piece = json!({
        "command": chunk.command,
        "inline": chunk.inline,
        "complete": complete,
    });
    hash.fold(piece.to_string().as_bytes());
    for line in &chunk.code_lines {
        hash.fold(line.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changing_code_changes_the_hash() {
        let mut a = RollingHash::new();
        a.fold(b"{}");
        a.fold(b"x = 1");
        let mut b = RollingHash::new();
        b.fold(b"{}");
        b.fold(b"x = 2");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn same_input_is_deterministic() {
        let mut a = RollingHash::new();
        a.fold(b"abc");
        let mut b = RollingHash::new();
        b.fold(b"abc");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn split_hash_produces_expected_prefix_lengths() {
        let mut h = RollingHash::new();
        h.fold(b"abc");
        let full = h.finish();
        let (root, delim) = split_hash(&full);
        assert_eq!(root.len(), 16);
        assert_eq!(delim.len(), 64);
        assert!(full.starts_with(&delim));
    }
}
