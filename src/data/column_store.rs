use std::borrow::Cow;
use std::path::Path;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::compress::{compress_column, decompress_column};
use super::encrypt::{bytes_to_f32, bytes_to_u32, f32_to_bytes, u32_to_bytes, BlockCipher};
use super::loader::load_libsvm_rows;
use super::model::Preview;
use super::normalize::{NormDirection, NormType};
use super::raw::RawMatrix;
use crate::error::{Error, Result};

/// How the trainers read a `(column, minibatch)` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    #[default]
    Plain,
    Compressed,
    Encrypted,
    CompressedEncrypted,
}

/// Delta-compressed blocks, one word stream per column.
#[derive(Debug, Clone)]
struct CompressedColumns {
    minibatch_size: usize,
    scaler: u32,
    words: Vec<Vec<u32>>,
    /// Cumulative end offset into `words[j]` of every minibatch.
    ends: Vec<Vec<usize>>,
}

impl CompressedColumns {
    fn block(&self, j: usize, m: usize) -> &[u32] {
        let start = if m == 0 { 0 } else { self.ends[j][m - 1] };
        &self.words[j][start..self.ends[j][m]]
    }
}

struct EncryptedColumns {
    minibatch_size: usize,
    compressed: bool,
    cipher: BlockCipher,
    /// `blocks[j][m]` is the sealed minibatch `m` of column `j`.
    blocks: Vec<Vec<Vec<u8>>>,
}

// ---------------------------------------------------------------------------
// ColumnStore – column-major f32 samples for the SGD / SCD engine
// ---------------------------------------------------------------------------

/// Column-major training data.
///
/// `columns[j][i]` is feature `j` of sample `i`. When `biased`, column 0 is
/// the constant 1.0 bias and normalization leaves it alone.
pub struct ColumnStore {
    pub num_samples: usize,
    pub num_features: usize,
    pub columns: Vec<Vec<f32>>,
    pub labels: Vec<f32>,
    pub biased: bool,
    /// Per-column (or per-row) stats recorded by [`ColumnStore::normalize_samples`].
    pub mins: Vec<f32>,
    pub ranges: Vec<f32>,
    pub labels_min: f32,
    pub labels_range: f32,
    compressed: Option<CompressedColumns>,
    encrypted: Option<EncryptedColumns>,
}

impl ColumnStore {
    fn new(num_samples: usize, num_features: usize, biased: bool) -> Self {
        let mut columns = vec![vec![0.0f32; num_samples]; num_features];
        if biased {
            if let Some(bias) = columns.first_mut() {
                bias.fill(1.0);
            }
        }
        ColumnStore {
            num_samples,
            num_features,
            columns,
            labels: vec![0.0; num_samples],
            biased,
            mins: Vec::new(),
            ranges: Vec::new(),
            labels_min: 0.0,
            labels_range: 0.0,
            compressed: None,
            encrypted: None,
        }
    }

    /// Column-major copy of a raw matrix with a bias column prepended.
    ///
    /// With `label_present`, raw column 0 is the label; otherwise labels are 0.
    pub fn from_raw(raw: &RawMatrix, label_present: bool) -> Result<Self> {
        let skip = usize::from(label_present);
        if raw.cols <= skip {
            return Err(Error::DimensionMismatch {
                expected: format!("more than {skip} columns"),
                actual: format!("{} columns", raw.cols),
            });
        }
        let mut store = Self::new(raw.rows, raw.cols - skip + 1, true);
        for i in 0..raw.rows {
            let row = raw.row(i);
            if label_present {
                store.labels[i] = row[0] as f32;
            }
            for (j, &v) in row[skip..].iter().enumerate() {
                store.columns[j + 1][i] = v as f32;
            }
        }
        info!(
            "column store: {} samples, {} features (bias included)",
            store.num_samples, store.num_features
        );
        Ok(store)
    }

    /// Load the first `num_samples` lines of a libsvm file.
    ///
    /// Indices are 1-based. When `biased`, index `k` lands in column `k` and
    /// column 0 is the bias; otherwise it lands in column `k - 1`.
    pub fn from_libsvm(path: &Path, num_samples: usize, num_features: usize, biased: bool) -> Result<Self> {
        let rows = load_libsvm_rows(path, num_samples)?;
        if rows.len() < num_samples {
            return Err(Error::DimensionMismatch {
                expected: format!("{num_samples} samples"),
                actual: format!("{} lines in {}", rows.len(), path.display()),
            });
        }
        let width = if biased { num_features + 1 } else { num_features };
        let mut store = Self::new(num_samples, width, biased);
        for (i, row) in rows.iter().enumerate() {
            store.labels[i] = row.label as f32;
            for &(idx, v) in &row.entries {
                let j = if biased { idx } else { idx - 1 };
                if j >= width {
                    return Err(Error::parse(
                        format!("{} sample {i}", path.display()),
                        format!("feature index {idx} exceeds {num_features} features"),
                    ));
                }
                store.columns[j][i] = v as f32;
            }
        }
        info!("libsvm {}: {num_samples} samples, {width} features", path.display());
        Ok(store)
    }

    /// Labels proportional to a hidden vector plus a little noise. Not biased.
    ///
    /// Binary labels are 1 with probability one half, otherwise 0 (or -1 for
    /// [`NormType::MinusOneToOne`]). Non-binary labels are uniform in [0, 1).
    pub fn synthetic(
        num_samples: usize,
        num_features: usize,
        label_binary: bool,
        labels_norm: NormType,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let hidden: Vec<f32> = (0..num_features).map(|_| rng.gen::<f32>()).collect();
        let negative = match labels_norm {
            NormType::ZeroToOne => 0.0,
            NormType::MinusOneToOne => -1.0,
        };

        let mut store = Self::new(num_samples, num_features, false);
        for i in 0..num_samples {
            let label = if label_binary {
                if rng.gen::<f32>() > 0.5 {
                    1.0
                } else {
                    negative
                }
            } else {
                rng.gen::<f32>()
            };
            store.labels[i] = label;
            for (col, &h) in store.columns.iter_mut().zip(&hidden) {
                col[i] = label * h + 0.001 * rng.gen::<f32>();
            }
        }
        debug!("synthetic store: {num_samples} x {num_features}, seed {seed}");
        store
    }

    /// Copy of a contiguous sample range; compressed and encrypted blocks are dropped.
    pub fn slice(&self, first: usize, count: usize) -> Result<Self> {
        if first + count > self.num_samples {
            return Err(Error::DimensionMismatch {
                expected: format!("samples {first}..{}", first + count),
                actual: format!("{} samples", self.num_samples),
            });
        }
        let mut store = Self::new(count, self.num_features, self.biased);
        for (dst, src) in store.columns.iter_mut().zip(&self.columns) {
            dst.copy_from_slice(&src[first..first + count]);
        }
        store.labels.copy_from_slice(&self.labels[first..first + count]);
        Ok(store)
    }

    // -- normalization --

    /// Min-max scale samples by column or by row and record the stats.
    ///
    /// By column, the bias column is skipped with min 0 and range 0. Zero-range
    /// columns (or rows) keep their values.
    pub fn normalize_samples(&mut self, norm: NormType, direction: NormDirection) {
        let scale = |v: f32, min: f32, range: f32| {
            let unit = (v - min) / range;
            match norm {
                NormType::ZeroToOne => unit,
                NormType::MinusOneToOne => unit * 2.0 - 1.0,
            }
        };

        match direction {
            NormDirection::Row => {
                self.mins = vec![0.0; self.num_samples];
                self.ranges = vec![0.0; self.num_samples];
                for i in 0..self.num_samples {
                    let (min, range) = extent(self.columns.iter().map(|c| c[i]));
                    if range > 0.0 {
                        for col in &mut self.columns {
                            col[i] = scale(col[i], min, range);
                        }
                    }
                    self.mins[i] = min;
                    self.ranges[i] = range;
                }
            }
            NormDirection::Column => {
                self.mins = vec![0.0; self.num_features];
                self.ranges = vec![0.0; self.num_features];
                let start = usize::from(self.biased);
                for j in start..self.num_features {
                    let col = &mut self.columns[j];
                    let (min, range) = extent(col.iter().copied());
                    if range > 0.0 {
                        for v in col.iter_mut() {
                            *v = scale(*v, min, range);
                        }
                    }
                    self.mins[j] = min;
                    self.ranges[j] = range;
                }
            }
        }
        debug!("normalized samples ({norm:?}, by {direction:?})");
    }

    /// Min-max scale the labels, or binarize them against `binarize_to`.
    ///
    /// Binarized, a label equal to `binarize_to` becomes 1 and every other
    /// label becomes 0 (or -1 for [`NormType::MinusOneToOne`]).
    pub fn normalize_labels(&mut self, norm: NormType, binarize_to: Option<f32>) {
        match binarize_to {
            None => {
                let (min, range) = extent(self.labels.iter().copied());
                if range > 0.0 {
                    for l in &mut self.labels {
                        let unit = (*l - min) / range;
                        *l = match norm {
                            NormType::ZeroToOne => unit,
                            NormType::MinusOneToOne => unit * 2.0 - 1.0,
                        };
                    }
                }
                self.labels_min = min;
                self.labels_range = range;
            }
            Some(positive) => {
                let (negative, min, range) = match norm {
                    NormType::ZeroToOne => (0.0, 0.0, 1.0),
                    NormType::MinusOneToOne => (-1.0, -1.0, 2.0),
                };
                for l in &mut self.labels {
                    *l = if *l == positive { 1.0 } else { negative };
                }
                self.labels_min = min;
                self.labels_range = range;
            }
        }
    }

    // -- compression / encryption --

    fn num_minibatches(&self, minibatch_size: usize) -> Result<usize> {
        if minibatch_size == 0 {
            return Err(Error::hyperparameter("minibatch_size", 0, "must be positive"));
        }
        let n = self.num_samples / minibatch_size;
        if n == 0 {
            return Err(Error::hyperparameter(
                "minibatch_size",
                minibatch_size,
                "must not exceed the number of samples",
            ));
        }
        debug!(
            "{n} minibatches of {minibatch_size}, rest {}",
            self.num_samples - n * minibatch_size
        );
        Ok(n)
    }

    /// Compress every `(column, minibatch)` block and return the compression
    /// rate: uncompressed values over compressed words.
    pub fn compress(&mut self, minibatch_size: usize, scaler: u32) -> Result<f64> {
        let nmb = self.num_minibatches(minibatch_size)?;
        let mut words = Vec::with_capacity(self.num_features);
        let mut ends = Vec::with_capacity(self.num_features);
        for col in &self.columns {
            let mut col_words = Vec::new();
            let mut col_ends = Vec::with_capacity(nmb);
            for block in col.chunks_exact(minibatch_size).take(nmb) {
                col_words.extend(compress_column(block, scaler)?);
                col_ends.push(col_words.len());
            }
            words.push(col_words);
            ends.push(col_ends);
        }

        let total_words: usize = words.iter().map(Vec::len).sum();
        let rate = (nmb * minibatch_size * self.num_features) as f64 / total_words as f64;
        info!("compressed {} columns, rate {rate:.3}", self.num_features);
        self.compressed = Some(CompressedColumns {
            minibatch_size,
            scaler,
            words,
            ends,
        });
        Ok(rate)
    }

    /// Seal every `(column, minibatch)` block, plain or compressed.
    pub fn encrypt(&mut self, minibatch_size: usize, use_compressed: bool, key: &[u8; 32]) -> Result<()> {
        let nmb = self.num_minibatches(minibatch_size)?;
        let cipher = BlockCipher::new(key);
        let mut blocks = Vec::with_capacity(self.num_features);

        for j in 0..self.num_features {
            let mut sealed = Vec::with_capacity(nmb);
            for m in 0..nmb {
                let bytes = if use_compressed {
                    let c = self.compressed_for(minibatch_size)?;
                    u32_to_bytes(c.block(j, m))
                } else {
                    f32_to_bytes(&self.columns[j][m * minibatch_size..(m + 1) * minibatch_size])
                };
                sealed.push(cipher.seal(j, m, &bytes)?);
            }
            blocks.push(sealed);
        }

        info!(
            "encrypted {} columns x {nmb} blocks ({})",
            self.num_features,
            if use_compressed { "compressed" } else { "plain" }
        );
        self.encrypted = Some(EncryptedColumns {
            minibatch_size,
            compressed: use_compressed,
            cipher,
            blocks,
        });
        Ok(())
    }

    fn compressed_for(&self, minibatch_size: usize) -> Result<&CompressedColumns> {
        match &self.compressed {
            Some(c) if c.minibatch_size == minibatch_size => Ok(c),
            Some(c) => Err(Error::DimensionMismatch {
                expected: format!("minibatch size {}", c.minibatch_size),
                actual: format!("minibatch size {minibatch_size}"),
            }),
            None => Err(Error::hyperparameter("storage", "compressed", "samples were never compressed")),
        }
    }

    fn encrypted_for(&self, minibatch_size: usize, compressed: bool) -> Result<&EncryptedColumns> {
        match &self.encrypted {
            Some(e) if e.minibatch_size == minibatch_size && e.compressed == compressed => Ok(e),
            Some(e) => Err(Error::DimensionMismatch {
                expected: format!(
                    "minibatch size {} ({})",
                    e.minibatch_size,
                    if e.compressed { "compressed" } else { "plain" }
                ),
                actual: format!("minibatch size {minibatch_size}"),
            }),
            None => Err(Error::hyperparameter("storage", "encrypted", "samples were never encrypted")),
        }
    }

    /// Values of column `j` for minibatch `m`, read through `storage`.
    pub fn column_block(&self, j: usize, m: usize, minibatch_size: usize, storage: Storage) -> Result<Cow<'_, [f32]>> {
        match storage {
            Storage::Plain => {
                let start = m * minibatch_size;
                Ok(Cow::Borrowed(&self.columns[j][start..start + minibatch_size]))
            }
            Storage::Compressed => {
                let c = self.compressed_for(minibatch_size)?;
                let mut out = Vec::with_capacity(minibatch_size);
                decompress_column(c.block(j, m), c.scaler, &mut out)?;
                Ok(Cow::Owned(out))
            }
            Storage::Encrypted => {
                let e = self.encrypted_for(minibatch_size, false)?;
                let bytes = e.cipher.open(j, m, &e.blocks[j][m])?;
                Ok(Cow::Owned(bytes_to_f32(&bytes)?))
            }
            Storage::CompressedEncrypted => {
                let e = self.encrypted_for(minibatch_size, true)?;
                let scaler = self.compressed_for(minibatch_size)?.scaler;
                let words = bytes_to_u32(&e.cipher.open(j, m, &e.blocks[j][m])?)?;
                let mut out = Vec::with_capacity(minibatch_size);
                decompress_column(&words, scaler, &mut out)?;
                Ok(Cow::Owned(out))
            }
        }
    }

    // -- access --

    /// `x · a_i`
    pub fn dot(&self, x: &[f32], i: usize) -> f32 {
        self.columns.iter().zip(x).map(|(col, &w)| w * col[i]).sum()
    }

    /// Sample `i` as a row.
    pub fn sample(&self, i: usize) -> Vec<f32> {
        self.columns.iter().map(|col| col[i]).collect()
    }

    /// Debug-log the first `n` samples.
    pub fn log_samples(&self, n: usize) {
        for i in 0..n.min(self.num_samples) {
            let row: Vec<f64> = self.sample(i).into_iter().map(f64::from).collect();
            debug!("sample {i}: label {} {}", self.labels[i], Preview(&row));
        }
    }
}

fn extent(values: impl Iterator<Item = f32>) -> (f32, f32) {
    let (min, range) = super::normalize::extent(values.map(f64::from));
    (min as f32, range as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::encrypt::DEFAULT_KEY;
    use approx::assert_abs_diff_eq;

    fn raw() -> RawMatrix {
        RawMatrix::from_rows(vec![
            vec![1.0, 2.0, 10.0],
            vec![0.0, 4.0, 10.0],
            vec![1.0, 6.0, 10.0],
            vec![0.0, 8.0, 10.0],
        ])
        .unwrap()
    }

    #[test]
    fn raw_rows_become_biased_columns() {
        let s = ColumnStore::from_raw(&raw(), true).unwrap();
        assert_eq!(s.num_features, 3);
        assert_eq!(s.columns[0], vec![1.0; 4]);
        assert_eq!(s.columns[1], vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(s.labels, vec![1.0, 0.0, 1.0, 0.0]);

        let unlabelled = ColumnStore::from_raw(&raw(), false).unwrap();
        assert_eq!(unlabelled.num_features, 4);
        assert_eq!(unlabelled.labels, vec![0.0; 4]);
        assert_eq!(unlabelled.columns[1], vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn column_normalization_skips_bias_and_constant_columns() {
        let mut s = ColumnStore::from_raw(&raw(), true).unwrap();
        s.normalize_samples(NormType::ZeroToOne, NormDirection::Column);
        assert_eq!(s.columns[0], vec![1.0; 4]);
        assert_eq!((s.mins[0], s.ranges[0]), (0.0, 0.0));
        assert_abs_diff_eq!(s.columns[1][1], 1.0 / 3.0, epsilon = 1e-6);
        assert_eq!(s.columns[2], vec![10.0; 4]);
        assert_eq!((s.mins[1], s.ranges[1]), (2.0, 6.0));

        let mut s = ColumnStore::from_raw(&raw(), true).unwrap();
        s.normalize_samples(NormType::MinusOneToOne, NormDirection::Column);
        assert_eq!(s.columns[1][0], -1.0);
        assert_eq!(s.columns[1][3], 1.0);
    }

    #[test]
    fn row_normalization_records_per_sample_stats() {
        let mut s = ColumnStore::from_raw(&raw(), true).unwrap();
        s.normalize_samples(NormType::ZeroToOne, NormDirection::Row);
        assert_eq!(s.mins.len(), 4);
        assert_eq!((s.mins[0], s.ranges[0]), (1.0, 9.0));
        assert_eq!(s.sample(0)[2], 1.0);
    }

    #[test]
    fn labels_binarize_to_target() {
        let mut s = ColumnStore::from_raw(&raw(), true).unwrap();
        s.labels = vec![3.0, 5.0, 3.0, 1.0];
        s.normalize_labels(NormType::MinusOneToOne, Some(3.0));
        assert_eq!(s.labels, vec![1.0, -1.0, 1.0, -1.0]);
        assert_eq!((s.labels_min, s.labels_range), (-1.0, 2.0));

        s.labels = vec![2.0, 4.0, 6.0, 4.0];
        s.normalize_labels(NormType::ZeroToOne, None);
        assert_eq!(s.labels, vec![0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn synthetic_is_seeded_and_unbiased() {
        let a = ColumnStore::synthetic(50, 4, true, NormType::MinusOneToOne, 7);
        let b = ColumnStore::synthetic(50, 4, true, NormType::MinusOneToOne, 7);
        assert!(!a.biased);
        assert_eq!(a.columns, b.columns);
        assert!(a.labels.iter().all(|&l| l == 1.0 || l == -1.0));
    }

    #[test]
    fn every_storage_reads_the_same_block() {
        let mut s = ColumnStore::synthetic(40, 3, false, NormType::ZeroToOne, 1);
        let scaler = 20;
        s.compress(16, scaler).unwrap();
        s.encrypt(16, true, &DEFAULT_KEY).unwrap();

        for j in 0..3 {
            for m in 0..2 {
                let plain = s.column_block(j, m, 16, Storage::Plain).unwrap();
                let comp = s.column_block(j, m, 16, Storage::Compressed).unwrap();
                let both = s.column_block(j, m, 16, Storage::CompressedEncrypted).unwrap();
                assert_eq!(comp, both);
                for (a, b) in plain.iter().zip(comp.iter()) {
                    assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
                }
            }
        }
        assert!(s.column_block(0, 0, 16, Storage::Encrypted).is_err());

        s.encrypt(16, false, &DEFAULT_KEY).unwrap();
        let enc = s.column_block(2, 1, 16, Storage::Encrypted).unwrap();
        assert_eq!(enc.as_ref(), &s.columns[2][16..32]);
    }

    #[test]
    fn compression_needs_a_whole_minibatch() {
        let mut s = ColumnStore::synthetic(10, 2, true, NormType::ZeroToOne, 1);
        assert!(s.compress(0, 10).is_err());
        assert!(s.compress(11, 10).is_err());
        let rate = s.compress(8, 10).unwrap();
        assert!(rate > 0.0);
        assert!(s.column_block(0, 0, 4, Storage::Compressed).is_err());
    }

    #[test]
    fn libsvm_indices_are_one_based() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.svm");
        std::fs::write(&path, "1 1:0.5 3:2\n0 2:1.5\nextra line ignored\n").unwrap();

        let s = ColumnStore::from_libsvm(&path, 2, 3, true).unwrap();
        assert_eq!(s.num_features, 4);
        assert_eq!(s.columns[0], vec![1.0, 1.0]);
        assert_eq!(s.columns[1], vec![0.5, 0.0]);
        assert_eq!(s.columns[3], vec![2.0, 0.0]);

        let s = ColumnStore::from_libsvm(&path, 2, 3, false).unwrap();
        assert_eq!(s.columns[0], vec![0.5, 0.0]);
        assert_eq!(s.columns[1], vec![0.0, 1.5]);
        assert_eq!(s.labels, vec![1.0, 0.0]);

        assert!(ColumnStore::from_libsvm(&path, 2, 2, false).is_err());
    }

    #[test]
    fn slice_copies_a_range() {
        let s = ColumnStore::from_raw(&raw(), true).unwrap();
        let t = s.slice(1, 2).unwrap();
        assert_eq!(t.columns[1], vec![4.0, 6.0]);
        assert_eq!(t.labels, vec![0.0, 1.0]);
        assert!(s.slice(3, 2).is_err());
        assert_eq!(s.dot(&[1.0, 0.5, 0.25], 0), 4.5);
    }
}
