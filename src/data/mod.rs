/// Data layer: file formats, loading, scaling and block storage.
///
/// Architecture:
/// ```text
///  features<N> / .csv / .parquet / libsvm
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse → RawMatrix rows
///   └──────────┘
///        │  raw   (<stem>_<rows>_<cols>, f64 LE)
///        ▼
///   ┌──────────┐            ┌─────────────┐
///   │  Samples  │ row-major  │ ColumnStore │ column-major f32
///   └──────────┘            └─────────────┘
///        │ normalize               │ normalize / compress / encrypt
///        ▼                         ▼
///   script trainers           SGD / SCD engine
/// ```

pub mod column_store;
pub mod compress;
pub mod encrypt;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod raw;

pub use column_store::{ColumnStore, Storage};
pub use model::Samples;
pub use normalize::{NormDirection, NormType};
pub use raw::RawMatrix;
