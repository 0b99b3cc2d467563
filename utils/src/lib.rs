pub mod keyed;
pub mod lines;
pub mod terminal;

pub use keyed::KeyedCache;
pub use lines::splitlines_lf;
pub use terminal::{formatter_for_stderr, select_formatter, Formatter};

/// Generate a random lowercase-ASCII string, used for namespacing temp files
/// within a session's scratch directory so that concurrent builds sharing a
/// system temp root never collide.
pub fn random_ascii_lower_alpha(n: usize) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    // A lightweight xorshift seeded from the clock. Collision avoidance for
    // temp file names doesn't need a cryptographic RNG, just a generator
    // that two concurrent processes are very unlikely to reproduce.
    let mut state = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E3779B97F4A7C15)
        ^ (std::process::id() as u64).wrapping_mul(0x2545F4914F6CDD1D);
    if state == 0 {
        state = 0x9E3779B97F4A7C15;
    }
    let mut out = String::with_capacity(n);
    for _ in 0..n {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let letter = (state % 26) as u8 + b'a';
        out.push(letter as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ascii_lower_alpha_has_requested_length_and_alphabet() {
        let s = random_ascii_lower_alpha(12);
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_lowercase()));
    }
}
