//! Full-view reductions over stored parameters.
//!
//! The trainer collapses an entire matrix view into one scalar in `[0, N)`
//! (`sum mod N`). Positional information is discarded on purpose; the
//! reduction is what each step feeds into the lookup tables.

use rayon::prelude::*;

use crate::config;

/// `(Σ values) mod n`, accumulated in `u64`.
///
/// `n` is expected in `1..=65536`. `n == 0` has no residue and yields 0.
///
/// Switches to a rayon reduction once the input reaches
/// [`config::PAR_THRESHOLD`] elements.
pub fn sum_mod<I>(values: I, n: usize) -> u16
where
    I: IndexedParallelIterator<Item = u16>,
{
    debug_assert!(n <= config::MAX_DOMAIN_SIZE);
    if n == 0 {
        return 0;
    }
    let len = values.len();
    let total: u64 = if len >= config::PAR_THRESHOLD {
        values.map(u64::from).sum()
    } else {
        values
            .with_min_len(len.max(1))
            .map(u64::from)
            .sum()
    };
    (total % n as u64) as u16
}

/// Sequential `(Σ values) mod n` over a plain slice. `n == 0` yields 0.
pub fn sum_mod_slice(values: &[u16], n: usize) -> u16 {
    if n == 0 {
        return 0;
    }
    let total: u64 = values.iter().map(|&v| u64::from(v)).sum();
    (total % n as u64) as u16
}

/// Order-sensitive FNV-1a fingerprint of a value sequence.
pub fn checksum<I>(values: I) -> u64
where
    I: IntoIterator<Item = u16>,
{
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    values.into_iter().fold(OFFSET, |h, v| {
        let h = (h ^ u64::from(v & 0xff)).wrapping_mul(PRIME);
        (h ^ u64::from(v >> 8)).wrapping_mul(PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_mod_small() {
        let v: Vec<u16> = vec![200, 100, 10];
        assert_eq!(sum_mod(v.par_iter().copied(), 256), 54);
        assert_eq!(sum_mod_slice(&v, 256), 54);
    }

    #[test]
    fn test_sum_mod_parallel_matches_sequential() {
        let v: Vec<u16> = (0..100_000u32).map(|i| (i % 251) as u16).collect();
        let par = sum_mod(v.par_iter().copied(), 256);
        assert_eq!(par, sum_mod_slice(&v, 256));
    }

    #[test]
    fn test_sum_mod_empty_is_zero() {
        let v: Vec<u16> = Vec::new();
        assert_eq!(sum_mod(v.par_iter().copied(), 256), 0);
    }

    #[test]
    fn test_zero_modulus_yields_zero() {
        let v: Vec<u16> = vec![3, 4, 5];
        assert_eq!(sum_mod(v.par_iter().copied(), 0), 0);
        assert_eq!(sum_mod_slice(&v, 0), 0);
    }

    #[test]
    fn test_sum_mod_does_not_overflow() {
        let v = vec![u16::MAX; 1 << 20];
        let expected = ((u16::MAX as u64 * (1u64 << 20)) % 1000) as u16;
        assert_eq!(sum_mod(v.par_iter().copied(), 1000), expected);
    }

    #[test]
    fn test_checksum_is_order_sensitive() {
        let a = checksum([1u16, 2, 3]);
        let b = checksum([3u16, 2, 1]);
        assert_ne!(a, b);
        assert_eq!(a, checksum(vec![1u16, 2, 3]));
    }
}
