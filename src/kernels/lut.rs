//! Precomputed lookup tables over the bounded domain `[0, N)`.
//!
//! Three `N × N` tables replace tensor arithmetic:
//!
//! ```text
//! xor[a][b] = (a ^ b) mod N
//! add[a][b] = (a + b) mod N
//! mul[a][b] = (a * b) mod N
//! ```
//!
//! For power-of-two `N` the xor reduction is the identity, so `xor[a][b]`
//! is exactly `a ^ b`. Tables are row-major, built once, and never mutated,
//! so any number of threads may read them without synchronization.

use std::fmt;
use std::sync::OnceLock;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::LutError;

/// Largest domain accepted by [`LookupTables::build`] (3 × 32 MiB of tables).
pub const MAX_TABLE_DOMAIN: usize = 4096;

/// Which precomputed operation to consult.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Xor,
    Add,
    Mul,
}

impl Table {
    pub const ALL: [Table; 3] = [Table::Xor, Table::Add, Table::Mul];

    /// Direct arithmetic for this operation, reduced into `[0, n)`.
    #[inline]
    pub fn apply(self, a: usize, b: usize, n: usize) -> usize {
        match self {
            Table::Xor => (a ^ b) % n,
            Table::Add => (a + b) % n,
            Table::Mul => ((a as u64 * b as u64) % n as u64) as usize,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Table::Xor => write!(f, "xor"),
            Table::Add => write!(f, "add"),
            Table::Mul => write!(f, "mul"),
        }
    }
}

/// The three immutable `N × N` tables.
pub struct LookupTables {
    domain: usize,
    xor: Box<[u16]>,
    add: Box<[u16]>,
    mul: Box<[u16]>,
}

impl LookupTables {
    /// Build tables for `[0, domain)`.
    pub fn build(domain: usize) -> Result<Self, LutError> {
        if domain == 0 || domain > MAX_TABLE_DOMAIN {
            return Err(LutError::InvalidDomain {
                domain,
                max: MAX_TABLE_DOMAIN,
            });
        }
        Ok(Self::compute(domain))
    }

    fn compute(domain: usize) -> Self {
        let fill = |op: Table| -> Box<[u16]> {
            let mut t = vec![0u16; domain * domain];
            t.par_chunks_mut(domain).enumerate().for_each(|(a, row)| {
                for (b, slot) in row.iter_mut().enumerate() {
                    *slot = op.apply(a, b, domain) as u16;
                }
            });
            t.into_boxed_slice()
        };

        Self {
            domain,
            xor: fill(Table::Xor),
            add: fill(Table::Add),
            mul: fill(Table::Mul),
        }
    }

    /// Domain size `N`.
    #[inline]
    pub fn domain(&self) -> usize {
        self.domain
    }

    #[inline]
    fn raw(&self, table: Table) -> &[u16] {
        match table {
            Table::Xor => &self.xor,
            Table::Add => &self.add,
            Table::Mul => &self.mul,
        }
    }

    #[inline]
    fn check(&self, a: usize, b: usize) -> Result<(), LutError> {
        if a >= self.domain || b >= self.domain {
            return Err(LutError::OutOfDomain {
                a,
                b,
                domain: self.domain,
            });
        }
        Ok(())
    }

    /// O(1) lookup of `table[a][b]`. Operands outside `[0, N)` are rejected,
    /// never wrapped.
    #[inline]
    pub fn lookup(&self, table: Table, a: usize, b: usize) -> Result<u16, LutError> {
        self.check(a, b)?;
        Ok(self.raw(table)[a * self.domain + b])
    }

    /// Row `a` of a table, i.e. `table[a][0..N]`.
    pub fn lookup_row(&self, table: Table, a: usize) -> Result<&[u16], LutError> {
        self.check(a, 0)?;
        let start = a * self.domain;
        Ok(&self.raw(table)[start..start + self.domain])
    }

    /// Batched lookup `table[indices[i]][b]`.
    ///
    /// Fails on the first out-of-domain operand; no partial result is
    /// returned.
    pub fn gather(&self, table: Table, indices: &[usize], b: usize) -> Result<Vec<u16>, LutError> {
        if indices.len() >= config::PAR_THRESHOLD {
            indices
                .par_iter()
                .map(|&a| self.lookup(table, a, b))
                .collect()
        } else {
            indices.iter().map(|&a| self.lookup(table, a, b)).collect()
        }
    }

    /// Bytes held by all three tables.
    pub fn size_bytes(&self) -> usize {
        3 * self.domain * self.domain * std::mem::size_of::<u16>()
    }
}

impl fmt::Debug for LookupTables {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTables")
            .field("domain", &self.domain)
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}

/// Process-wide tables for [`config::DOMAIN_SIZE`], built on first use.
pub fn tables() -> &'static LookupTables {
    static TABLES: OnceLock<LookupTables> = OnceLock::new();
    TABLES.get_or_init(|| LookupTables::compute(config::DOMAIN_SIZE))
}
