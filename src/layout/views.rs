//! Logical matrix views over the flat parameter buffer.
//!
//! A schema `(vocab, embed, hidden, output)` lays three matrices end to end
//! from offset 0:
//!
//! ```text
//! [ embedding: vocab × embed | projection: embed × hidden | output: hidden × output ]
//! 0                          e                            e+p                  required
//! ```
//!
//! Views are borrowed windows; they copy nothing and cannot outlive the
//! store they were derived from.

use std::ops::Range;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::{Result, StoreError};
use crate::storage::store::{ParamStore, ParamView};

/// Dimensions of the three stored matrices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub vocab: usize,
    pub embed: usize,
    pub hidden: usize,
    pub output: usize,
}

impl Default for ParamSchema {
    fn default() -> Self {
        Self {
            vocab: config::VOCAB_SIZE,
            embed: config::EMBED_DIM,
            hidden: config::HIDDEN_DIM,
            output: config::OUTPUT_DIM,
        }
    }
}

impl ParamSchema {
    pub fn new(vocab: usize, embed: usize, hidden: usize, output: usize) -> Self {
        Self {
            vocab,
            embed,
            hidden,
            output,
        }
    }

    /// Shapes in layout order: embedding, projection, output.
    pub fn shapes(&self) -> [(usize, usize); 3] {
        [
            (self.vocab, self.embed),
            (self.embed, self.hidden),
            (self.hidden, self.output),
        ]
    }

    /// `vocab*embed + embed*hidden + hidden*output`, or `None` on overflow.
    pub fn required_params(&self) -> Option<usize> {
        self.shapes()
            .iter()
            .try_fold(0usize, |acc, &(r, c)| acc.checked_add(r.checked_mul(c)?))
    }
}

/// A `rows × cols` row-major window into the store.
#[derive(Clone, Copy)]
pub struct MatrixView<'a> {
    name: &'static str,
    offset: usize,
    rows: usize,
    cols: usize,
    data: ParamView<'a>,
}

impl<'a> MatrixView<'a> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// First element of this view within the store.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element range within the store.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u16> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col)
    }

    pub fn row(&self, row: usize) -> Option<ParamView<'a>> {
        if row >= self.rows {
            return None;
        }
        self.data.slice(row * self.cols..(row + 1) * self.cols)
    }

    /// Flat view over the whole matrix.
    pub fn data(&self) -> ParamView<'a> {
        self.data
    }

    /// Full-view reduction `(Σ elements) mod n`; 0 when `n == 0`.
    pub fn sum_mod(&self, n: usize) -> u16 {
        self.data.sum_mod(n)
    }

    /// Dense copy for consumers that want array math.
    pub fn to_array(&self) -> Array2<u16> {
        Array2::from_shape_vec((self.rows, self.cols), self.data.to_vec())
            .unwrap_or_else(|_| Array2::zeros((self.rows, self.cols)))
    }
}

impl std::fmt::Debug for MatrixView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixView")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("shape", &self.shape())
            .finish()
    }
}

/// The three matrices of a schema.
#[derive(Clone, Copy, Debug)]
pub struct ModelViews<'a> {
    pub embedding: MatrixView<'a>,
    pub projection: MatrixView<'a>,
    pub output: MatrixView<'a>,
}

impl<'a> ModelViews<'a> {
    /// Views in layout order.
    pub fn all(&self) -> [&MatrixView<'a>; 3] {
        [&self.embedding, &self.projection, &self.output]
    }

    /// Elements covered by all three views.
    pub fn required_params(&self) -> usize {
        self.all().iter().map(|v| v.len()).sum()
    }
}

/// Partition the store into embedding, projection and output views.
///
/// Fails with [`StoreError::Capacity`] when the schema needs more elements
/// than the store holds; the store is only read, never modified.
pub fn derive_views<'a>(store: &'a ParamStore, schema: &ParamSchema) -> Result<ModelViews<'a>> {
    let available = store.total_params();
    let required = schema.required_params().ok_or(StoreError::Capacity {
        required: usize::MAX,
        available,
    })?;
    if required > available {
        return Err(StoreError::Capacity {
            required,
            available,
        });
    }

    let whole = store.view()?;
    let names = ["embedding", "projection", "output"];
    let mut offset = 0;
    let mut views = Vec::with_capacity(3);
    for (name, (rows, cols)) in names.into_iter().zip(schema.shapes()) {
        let len = rows * cols;
        let data = whole
            .slice(offset..offset + len)
            .ok_or(StoreError::Capacity {
                required,
                available,
            })?;
        views.push(MatrixView {
            name,
            offset,
            rows,
            cols,
            data,
        });
        offset += len;
    }

    tracing::debug!(required, available, ?schema, "derived views");
    Ok(ModelViews {
        embedding: views[0],
        projection: views[1],
        output: views[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::StoreConfig;
    use tempfile::tempdir;

    fn open(total: usize) -> (tempfile::TempDir, ParamStore) {
        let dir = tempdir().expect("failed to create tempdir");
        let store = ParamStore::open_with(StoreConfig::new(dir.path().join("p.bin"), total).with_seed(11))
            .expect("open should succeed");
        (dir, store)
    }

    #[test]
    fn test_default_scenario_shapes() {
        let (_dir, store) = open(100_000);
        let schema = ParamSchema::new(100, 64, 256, 100);
        assert_eq!(schema.required_params(), Some(48_384));

        let views = derive_views(&store, &schema).expect("views should fit");
        assert_eq!(views.embedding.shape(), (100, 64));
        assert_eq!(views.projection.shape(), (64, 256));
        assert_eq!(views.output.shape(), (256, 100));
        assert_eq!(views.required_params(), 48_384);
    }

    #[test]
    fn test_views_are_contiguous_and_disjoint() {
        let (_dir, store) = open(5000);
        for schema in [
            ParamSchema::new(10, 8, 16, 10),
            ParamSchema::new(1, 1, 1, 1),
            ParamSchema::new(7, 3, 11, 5),
            ParamSchema::new(0, 4, 4, 4),
        ] {
            let views = derive_views(&store, &schema).unwrap();
            let [e, p, o] = views.all();
            assert_eq!(e.range().start, 0);
            assert_eq!(e.range().end, p.range().start);
            assert_eq!(p.range().end, o.range().start);
            assert_eq!(o.range().end, schema.required_params().unwrap());
            assert_eq!(e.len(), schema.vocab * schema.embed);
            assert_eq!(p.len(), schema.embed * schema.hidden);
            assert_eq!(o.len(), schema.hidden * schema.output);
        }
    }

    #[test]
    fn test_views_alias_store_memory() {
        let (_dir, store) = open(1000);
        let schema = ParamSchema::new(4, 5, 6, 7);
        let views = derive_views(&store, &schema).unwrap();

        store
            .update_blocking(vec![42; 6], views.projection.offset() + 6)
            .unwrap();
        assert_eq!(views.projection.get(1, 0), Some(42));
        assert_eq!(views.projection.row(1).unwrap().to_vec(), vec![42; 6]);
        assert_eq!(views.projection.to_array()[[1, 5]], 42);
    }

    #[test]
    fn test_capacity_error_leaves_store_unchanged() {
        let (_dir, store) = open(1000);
        let before = store.view().unwrap().to_vec();

        let err = derive_views(&store, &ParamSchema::new(100, 64, 256, 100)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Capacity {
                required: 48_384,
                available: 1000
            }
        ));
        assert_eq!(store.view().unwrap().to_vec(), before);
    }

    #[test]
    fn test_overflowing_schema_is_capacity_error() {
        let (_dir, store) = open(10);
        let schema = ParamSchema::new(usize::MAX, 2, 1, 1);
        assert_eq!(schema.required_params(), None);
        assert!(matches!(
            derive_views(&store, &schema),
            Err(StoreError::Capacity { .. })
        ));
    }

    #[test]
    fn test_exact_fit() {
        let (_dir, store) = open(48_384);
        assert!(derive_views(&store, &ParamSchema::default()).is_ok());
    }

    #[test]
    fn test_matrix_accessors_bounds() {
        let (_dir, store) = open(100);
        let views = derive_views(&store, &ParamSchema::new(2, 3, 4, 5)).unwrap();
        assert!(views.embedding.get(1, 2).is_some());
        assert!(views.embedding.get(2, 0).is_none());
        assert!(views.embedding.get(0, 3).is_none());
        assert!(views.output.row(4).is_none());
        assert_eq!(views.output.name(), "output");
    }

    #[test]
    fn test_sum_mod_matches_copied_values() {
        let (_dir, store) = open(50_000);
        let views = derive_views(&store, &ParamSchema::default()).unwrap();
        let expected: u64 = views.projection.data().iter().map(u64::from).sum();
        assert_eq!(views.projection.sum_mod(256) as u64, expected % 256);
    }

    #[test]
    fn test_derive_after_close_is_closed() {
        let (_dir, mut store) = open(100);
        store.close().unwrap();
        assert!(derive_views(&store, &ParamSchema::new(1, 1, 1, 1))
            .unwrap_err()
            .is_closed());
    }
}
