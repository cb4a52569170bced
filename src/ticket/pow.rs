//! Hash-based proof-of-work.
//!
//! A piece of [`Work`] is solved by bumping its nonce until the SHA3-256
//! digest of its encoding starts with at least `difficulty` zero bits.

use sha3::{Digest, Sha3_256};
use std::sync::atomic::{AtomicBool, Ordering};

/// Difficulty used when a caller asks for level 0
pub const DEFAULT_DIFFICULTY: u32 = 24;

/// Digest width in bits; no digest can carry more leading zeros
pub const MAX_DIFFICULTY: u32 = 256;

/// Anything with a nonce and a deterministic encoding.
pub trait Work {
    /// Deterministic byte encoding, including the current nonce
    fn encode(&self) -> Vec<u8>;

    fn increment_nonce(&mut self);
}

/// Resolve a configured difficulty, mapping 0 to [`DEFAULT_DIFFICULTY`]
pub fn effective_difficulty(difficulty: u32) -> u32 {
    if difficulty == 0 {
        DEFAULT_DIFFICULTY
    } else {
        difficulty
    }
}

/// SHA3-256 of the work's current encoding
pub fn digest<W: Work + ?Sized>(work: &W) -> [u8; 32] {
    Sha3_256::digest(work.encode()).into()
}

/// Number of leading zero bits in `digest`
pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Whether `digest` meets `difficulty` (already resolved, see [`effective_difficulty`])
pub fn satisfies(digest: &[u8], difficulty: u32) -> bool {
    difficulty <= MAX_DIFFICULTY && leading_zero_bits(digest) >= difficulty
}

/// Search nonces until the digest meets `difficulty`.
///
/// Starts from the current nonce. `cancel` is polled before every attempt;
/// `None` is returned as soon as it is set.
pub fn solve<W: Work + ?Sized>(work: &mut W, difficulty: u32, cancel: &AtomicBool) -> Option<[u8; 32]> {
    let difficulty = effective_difficulty(difficulty);
    if difficulty > MAX_DIFFICULTY {
        return None;
    }
    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        let digest = digest(work);
        if satisfies(&digest, difficulty) {
            return Some(digest);
        }
        work.increment_nonce();
    }
}

/// Check that the work's current state meets `difficulty`
pub fn verify<W: Work + ?Sized>(work: &W, difficulty: u32) -> bool {
    satisfies(&digest(work), effective_difficulty(difficulty))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    struct Counter {
        payload: Vec<u8>,
        nonce: i64,
    }

    impl Work for Counter {
        fn encode(&self) -> Vec<u8> {
            let mut out = self.nonce.to_le_bytes().to_vec();
            out.extend_from_slice(&self.payload);
            out
        }
        fn increment_nonce(&mut self) {
            self.nonce = self.nonce.wrapping_add(1);
        }
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0x01]), 7);
        assert_eq!(leading_zero_bits(&[0x00, 0x80]), 8);
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x0f]), 20);
        assert_eq!(leading_zero_bits(&[0u8; 32]), 256);
    }

    #[test]
    fn test_zero_difficulty_uses_default() {
        assert_eq!(effective_difficulty(0), DEFAULT_DIFFICULTY);
        assert_eq!(effective_difficulty(8), 8);
    }

    #[test]
    fn test_satisfies_out_of_range() {
        assert!(!satisfies(&[0u8; 32], MAX_DIFFICULTY + 1));
        assert!(satisfies(&[0u8; 32], MAX_DIFFICULTY));
    }

    #[test]
    fn test_solve_and_verify() {
        let mut work = Counter { payload: b"hello".to_vec(), nonce: 0 };
        let cancel = AtomicBool::new(false);

        let found = solve(&mut work, 10, &cancel).unwrap();
        assert!(leading_zero_bits(&found) >= 10);
        assert_eq!(found, digest(&work));
        assert!(verify(&work, 10));
    }

    #[test]
    fn test_solve_returns_none_when_cancelled() {
        let mut work = Counter { payload: b"hello".to_vec(), nonce: 0 };
        let cancel = AtomicBool::new(true);
        assert!(solve(&mut work, 8, &cancel).is_none());
        assert_eq!(work.nonce, 0);
    }

    #[test]
    fn test_solve_can_be_cancelled_from_another_thread() {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            let mut work = Counter { payload: b"unreachable".to_vec(), nonce: 0 };
            solve(&mut work, 200, &flag)
        });

        std::thread::sleep(Duration::from_millis(50));
        cancel.store(true, Ordering::Relaxed);
        assert!(handle.join().unwrap().is_none());
    }
}
