//! Dataset preparation: loading, synthesis, preprocessing, splitting,
//! and batch streaming.

mod batch;
mod dataset;
pub mod idx;
mod split;
mod synthetic;
mod transform;

pub use batch::{assemble_batch, Batch, BatchStream};
pub use dataset::{class_names_from_file, Dataset, Sample};
pub use idx::load_idx_dataset;
pub use split::{split_dataset, DatasetSplit};
pub use synthetic::{generate, SyntheticSpec};
pub use transform::Preprocess;

pub(crate) use split::lcg_shuffle;
