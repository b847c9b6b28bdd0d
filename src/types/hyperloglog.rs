//! Probabilistic cardinality registers.
//!
//! A register bank of `m = 2^p` small-integer registers for `p` in [4, 16].
//! Elements are hashed with 64-bit FNV-1a; the low `p` bits select a
//! register and the leading-zero run of the remaining bits (+1) is stored
//! as a max. The harmonic-mean estimate carries the standard small-range
//! (linear counting) and large-range corrections.

use crate::error::{CommandError, Result};
use serde::{Deserialize, Serialize};

/// Default precision when a bank is created implicitly by a write.
pub const DEFAULT_PRECISION: u8 = 14;

/// Minimum allowed precision.
pub const MIN_PRECISION: u8 = 4;

/// Maximum allowed precision.
pub const MAX_PRECISION: u8 = 16;

/// A cardinality register bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperLogLog {
    precision: u8,
    registers: Vec<u8>,
}

impl Default for HyperLogLog {
    fn default() -> Self {
        // Precision is validated by construction
        Self::new(DEFAULT_PRECISION).expect("default precision is valid")
    }
}

impl HyperLogLog {
    /// Create a bank with `m = 2^precision` registers.
    ///
    /// Fails if `precision` is outside [4, 16].
    pub fn new(precision: u8) -> Result<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(CommandError::InvalidPrecision(precision).into());
        }
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// The bank's precision `p`.
    #[inline]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// The number of registers `m = 2^p`.
    #[inline]
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Standard error of the estimate: `1.04 / sqrt(m)`.
    pub fn standard_error(&self) -> f64 {
        1.04 / (self.register_count() as f64).sqrt()
    }

    /// Add an element. Returns true if any register changed.
    pub fn add(&mut self, element: &[u8]) -> bool {
        let hash = fnv1a_64(element);
        let index = (hash & ((1u64 << self.precision) - 1)) as usize;

        // Leading-zero run of the remaining 64-p bits, +1 convention
        let remaining_bits = 64 - u32::from(self.precision);
        let remaining = hash >> self.precision;
        let run = if remaining == 0 {
            remaining_bits as u8 + 1
        } else {
            (remaining.leading_zeros() - (64 - remaining_bits)) as u8 + 1
        };

        if run > self.registers[index] {
            self.registers[index] = run;
            true
        } else {
            false
        }
    }

    /// Estimate the number of distinct elements added.
    pub fn count(&self) -> u64 {
        let m = self.register_count() as f64;
        let mut sum = 0.0f64;
        let mut zero_registers = 0u32;

        for &reg in &self.registers {
            sum += 2.0f64.powi(-i32::from(reg));
            if reg == 0 {
                zero_registers += 1;
            }
        }

        let raw = alpha(self.register_count()) * m * m / sum;

        if raw <= 2.5 * m {
            // Small-range correction: linear counting while empty registers remain
            if zero_registers > 0 {
                (m * (m / f64::from(zero_registers)).ln()) as u64
            } else {
                raw as u64
            }
        } else if raw > (1u64 << 32) as f64 / 30.0 {
            // Large-range correction
            let two_32 = (1u64 << 32) as f64;
            (-two_32 * (1.0 - raw / two_32).ln()) as u64
        } else {
            raw as u64
        }
    }

    /// Merge another bank into this one (element-wise register maximum).
    ///
    /// Fails if the precisions differ.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.precision != other.precision {
            return Err(
                CommandError::PrecisionMismatch(self.precision, other.precision).into(),
            );
        }
        for (reg, &other_reg) in self.registers.iter_mut().zip(&other.registers) {
            if other_reg > *reg {
                *reg = other_reg;
            }
        }
        Ok(())
    }

    /// Reset all registers to zero.
    pub fn reset(&mut self) {
        self.registers.fill(0);
    }
}

/// Bias-correction constant for the harmonic estimate.
fn alpha(m: usize) -> f64 {
    match m {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / m as f64),
    }
}

/// 64-bit FNV-1a hash.
fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_bounds() {
        assert!(HyperLogLog::new(3).is_err());
        assert!(HyperLogLog::new(4).is_ok());
        assert!(HyperLogLog::new(16).is_ok());
        assert!(HyperLogLog::new(17).is_err());
    }

    #[test]
    fn test_empty_bank_counts_zero() {
        let hll = HyperLogLog::new(14).unwrap();
        assert_eq!(hll.count(), 0);
    }

    #[test]
    fn test_small_cardinality_is_exact() {
        // Linear counting makes small distinct counts exact
        let mut hll = HyperLogLog::new(14).unwrap();
        hll.add(b"tx1");
        hll.add(b"tx2");
        hll.add(b"tx3");
        hll.add(b"tx1"); // duplicate
        assert_eq!(hll.count(), 3);
    }

    #[test]
    fn test_duplicate_add_does_not_change_state() {
        let mut hll = HyperLogLog::new(12).unwrap();
        assert!(hll.add(b"hello"));
        assert!(!hll.add(b"hello"));
    }

    #[test]
    fn test_error_bound() {
        let mut hll = HyperLogLog::new(14).unwrap();
        let n = 100_000u64;
        for i in 0..n {
            hll.add(format!("element-{i}").as_bytes());
        }
        let estimate = hll.count();
        let error = (estimate as f64 - n as f64).abs() / n as f64;
        let bound = 3.0 * hll.standard_error();
        assert!(
            error < bound,
            "estimate {estimate} off by {:.2}% (bound {:.2}%)",
            error * 100.0,
            bound * 100.0
        );
    }

    #[test]
    fn test_merge_union() {
        let mut a = HyperLogLog::new(14).unwrap();
        let mut b = HyperLogLog::new(14).unwrap();

        for i in 0..5000 {
            a.add(format!("a-{i}").as_bytes());
        }
        for i in 0..5000 {
            b.add(format!("b-{i}").as_bytes());
        }

        a.merge(&b).unwrap();
        let merged = a.count() as f64;
        let expected = 10_000.0;
        let error = (merged - expected).abs() / expected;
        assert!(error < 3.0 * a.standard_error(), "merged {merged}");
    }

    #[test]
    fn test_merge_is_idempotent_for_same_elements() {
        let mut a = HyperLogLog::new(12).unwrap();
        let mut b = HyperLogLog::new(12).unwrap();
        for i in 0..1000 {
            let e = format!("shared-{i}");
            a.add(e.as_bytes());
            b.add(e.as_bytes());
        }
        let before = a.count();
        a.merge(&b).unwrap();
        assert_eq!(a.count(), before);
    }

    #[test]
    fn test_merge_precision_mismatch() {
        let mut a = HyperLogLog::new(12).unwrap();
        let b = HyperLogLog::new(14).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_reset() {
        let mut hll = HyperLogLog::new(10).unwrap();
        hll.add(b"x");
        assert!(hll.count() > 0);
        hll.reset();
        assert_eq!(hll.count(), 0);
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(fnv1a_64(b"test"), fnv1a_64(b"test"));
        assert_ne!(fnv1a_64(b"hello"), fnv1a_64(b"world"));
    }
}
