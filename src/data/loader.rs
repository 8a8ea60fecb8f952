use std::fs;
use std::path::Path;
use std::str::FromStr;

use arrow::array::{Array, ArrayRef, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::datatypes::DataType;
use log::{debug, info};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use rand::seq::SliceRandom;
use rand::Rng;

use super::raw::RawMatrix;
use crate::error::{Error, Result};

/// Features per line in the CNN dumps.
pub const DEFAULT_NUM_FEATURES: usize = 2048;

/// Feature dump file numbers of the cat classes (label 0).
pub const CATS: [u32; 4] = [281, 282, 283, 284];
/// Feature dump file numbers of the dog classes (label 1).
pub const DOGS: [u32; 4] = [153, 235, 230, 238];

// ---------------------------------------------------------------------------
// Feature dumps
// ---------------------------------------------------------------------------

/// One `features<N>` file and the label its samples get.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassSpec {
    pub file_number: u32,
    pub label: f64,
}

impl FromStr for ClassSpec {
    type Err = String;

    /// `N:LABEL`, e.g. `281:0`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (n, l) = s
            .split_once(':')
            .ok_or_else(|| format!("'{s}' is not of the form N:LABEL"))?;
        let file_number = n
            .trim()
            .parse()
            .map_err(|_| format!("'{n}' is not a file number"))?;
        let label = l
            .trim()
            .parse()
            .map_err(|_| format!("'{l}' is not a numeric label"))?;
        Ok(ClassSpec { file_number, label })
    }
}

/// Cats as 0, dogs as 1.
pub fn default_classes() -> Vec<ClassSpec> {
    let cats = CATS.iter().map(|&file_number| ClassSpec { file_number, label: 0.0 });
    let dogs = DOGS.iter().map(|&file_number| ClassSpec { file_number, label: 1.0 });
    cats.chain(dogs).collect()
}

fn is_header(line: &str) -> bool {
    line.contains("synset_id") || line.contains("label")
}

/// Parse the feature vector out of one dump line.
///
/// The line is split on `;`, field 2 is split on single spaces, and tokens
/// `1..=num_features` are returned.
pub fn parse_feature_line(line: &str, num_features: usize, location: &str) -> Result<Vec<f64>> {
    let field = line
        .split(';')
        .nth(2)
        .ok_or_else(|| Error::parse(location, "expected at least three ';'-separated fields"))?;
    let tokens: Vec<&str> = field.split(' ').skip(1).take(num_features).collect();
    if tokens.len() < num_features {
        return Err(Error::parse(
            location,
            format!("expected {num_features} features, found {}", tokens.len()),
        ));
    }
    tokens
        .iter()
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .map_err(|_| Error::parse(location, format!("feature {j}: '{tok}' is not a number")))
        })
        .collect()
}

/// All sample rows of one dump file, header lines skipped.
pub fn load_feature_dump(path: &Path, num_features: usize) -> Result<Vec<Vec<f64>>> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() || is_header(line) {
            continue;
        }
        let location = format!("{}:{}", path.display(), line_no + 1);
        rows.push(parse_feature_line(line, num_features, &location)?);
    }
    debug!("{}: {} samples", path.display(), rows.len());
    Ok(rows)
}

/// Load `features<N>` for every class into labelled rows `[label, features...]`.
///
/// Rows come out grouped by class, in the order of `classes`.
pub fn load_feature_dumps(dir: &Path, classes: &[ClassSpec], num_features: usize) -> Result<RawMatrix> {
    let mut rows = Vec::new();
    for class in classes {
        let path = dir.join(format!("features{}", class.file_number));
        let samples = load_feature_dump(&path, num_features)?;
        info!(
            "class {} (label {}): {} samples",
            class.file_number,
            class.label,
            samples.len()
        );
        for features in samples {
            let mut row = Vec::with_capacity(num_features + 1);
            row.push(class.label);
            row.extend(features);
            rows.push(row);
        }
    }
    if rows.is_empty() {
        return Err(Error::EmptyDataset);
    }
    RawMatrix::from_rows(rows)
}

/// Shuffle whole rows in place.
pub fn shuffle_rows<R: Rng + ?Sized>(matrix: &mut RawMatrix, rng: &mut R) {
    let mut order: Vec<usize> = (0..matrix.rows).collect();
    order.shuffle(rng);
    let mut values = Vec::with_capacity(matrix.values.len());
    for i in order {
        values.extend_from_slice(matrix.row(i));
    }
    matrix.values = values;
}

// ---------------------------------------------------------------------------
// Tables (CSV / Parquet)
// ---------------------------------------------------------------------------

/// Load a numeric table and move column `label_index` to column 0.
///
/// Dispatch by extension:
/// * `.csv`             – header row, then comma-separated floats
/// * `.parquet` / `.pq` – every numeric column in schema order, nulls as NaN
pub fn load_table(path: &Path, label_index: usize) -> Result<RawMatrix> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let mut rows = match ext.as_str() {
        "csv" => load_csv(path)?,
        "parquet" | "pq" => load_parquet(path)?,
        other => return Err(Error::UnsupportedFormat(other.to_string())),
    };
    if rows.is_empty() {
        return Err(Error::EmptyDataset);
    }
    for row in &mut rows {
        if label_index >= row.len() {
            return Err(Error::DimensionMismatch {
                expected: format!("more than {label_index} columns"),
                actual: format!("{} columns", row.len()),
            });
        }
        row.swap(0, label_index);
    }
    RawMatrix::from_rows(rows)
}

fn load_csv(path: &Path) -> Result<Vec<Vec<f64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (row_no, record) in reader.records().enumerate() {
        let record = record?;
        let location = format!("{} row {}", path.display(), row_no + 1);
        let row = record
            .iter()
            .enumerate()
            .map(|(j, tok)| {
                tok.parse::<f64>()
                    .map_err(|_| Error::parse(&location, format!("column {j}: '{tok}' is not a number")))
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

fn load_parquet(path: &Path) -> Result<Vec<Vec<f64>>> {
    let file = fs::File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let schema = batch.schema();

        let mut columns = Vec::new();
        for (field, col) in schema.fields().iter().zip(batch.columns()) {
            match numeric_column(col) {
                Some(values) => columns.push(values),
                None => debug!("skipping non-numeric column '{}' ({:?})", field.name(), col.data_type()),
            }
        }
        if columns.is_empty() {
            return Err(Error::parse(path.display().to_string(), "no numeric columns"));
        }

        for i in 0..batch.num_rows() {
            rows.push(columns.iter().map(|c| c[i]).collect());
        }
    }
    Ok(rows)
}

/// Values of a numeric Arrow column as f64, or `None` for other types.
fn numeric_column(col: &ArrayRef) -> Option<Vec<f64>> {
    let any = col.as_any();
    let values = match col.data_type() {
        DataType::Float64 => {
            let arr = any.downcast_ref::<Float64Array>()?;
            arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
        }
        DataType::Float32 => {
            let arr = any.downcast_ref::<Float32Array>()?;
            arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect()
        }
        DataType::Int32 => {
            let arr = any.downcast_ref::<Int32Array>()?;
            arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect()
        }
        DataType::Int64 => {
            let arr = any.downcast_ref::<Int64Array>()?;
            arr.iter().map(|v| v.map_or(f64::NAN, |v| v as f64)).collect()
        }
        _ => return None,
    };
    Some(values)
}

// ---------------------------------------------------------------------------
// libsvm
// ---------------------------------------------------------------------------

/// One parsed `label idx:val idx:val ...` line. Indices stay 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRow {
    pub label: f64,
    pub entries: Vec<(usize, f64)>,
}

pub fn parse_libsvm_line(line: &str, location: &str) -> Result<SparseRow> {
    let mut tokens = line.split_whitespace();
    let label = tokens
        .next()
        .ok_or_else(|| Error::parse(location, "empty line"))?
        .parse::<f64>()
        .map_err(|_| Error::parse(location, "label is not a number"))?;

    let entries = tokens
        .map(|tok| {
            let (idx, val) = tok
                .split_once(':')
                .ok_or_else(|| Error::parse(location, format!("'{tok}' is not idx:value")))?;
            let idx = idx
                .parse::<usize>()
                .ok()
                .filter(|&i| i >= 1)
                .ok_or_else(|| Error::parse(location, format!("'{idx}' is not a 1-based index")))?;
            let val = val
                .parse::<f64>()
                .map_err(|_| Error::parse(location, format!("'{val}' is not a number")))?;
            Ok((idx, val))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SparseRow { label, entries })
}

/// Read up to `max_rows` libsvm lines, skipping blank ones.
pub fn load_libsvm_rows(path: &Path, max_rows: usize) -> Result<Vec<SparseRow>> {
    let text = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if rows.len() == max_rows {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let location = format!("{}:{}", path.display(), line_no + 1);
        rows.push(parse_libsvm_line(line, &location)?);
    }
    Ok(rows)
}
