//! Feature-dump conversion and linear model training for a cats-vs-dogs
//! image classification task.
//!
//! * [`data`] – raw matrix files, feature dumps, tables, libsvm, scaling and
//!   the compressed / encrypted [`ColumnStore`](data::ColumnStore)
//! * [`train`] – row-major script trainers and the column-store SGD / SCD engine
//! * [`config`] – JSON engine configuration for `train`
//! * [`ase`] – RTL simulation environment generation

pub mod ase;
pub mod config;
pub mod data;
pub mod error;
pub mod train;

pub use error::{Error, Result};
