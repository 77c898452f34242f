//! Pickup-code allocation.
//!
//! Codes are 4 characters over `[0-9A-Z]` (36^4 ≈ 1.68M combinations),
//! drawn one byte at a time from the OS RNG.

use rand::Rng;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const CODE_LEN: usize = 4;

/// Draw a single random 4-character code. Not guaranteed unique.
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generate codes until `taken` reports the candidate as free, then return it.
///
/// The caller is responsible for inserting the returned code under the
/// appropriate write lock immediately — this function only guarantees the
/// code was free at the moment it was checked, not that it still is.
pub fn allocate_unique(taken: impl Fn(&str) -> bool) -> String {
    loop {
        let candidate = generate();
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_four_char_alphanumeric_codes() {
        for _ in 0..200 {
            let code = generate();
            assert_eq!(code.len(), 4);
            assert!(code
                .bytes()
                .all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn allocate_unique_retries_past_taken_codes() {
        use std::cell::Cell;
        let seen = Cell::new(0);
        let code = allocate_unique(|_| {
            seen.set(seen.get() + 1);
            seen.get() < 5
        });
        assert_eq!(code.len(), 4);
        assert_eq!(seen.get(), 5);
    }
}
