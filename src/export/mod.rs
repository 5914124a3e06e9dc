//! Export: the visualization data contract and activation collection.

mod bundle;
mod collect;

pub use bundle::{
    load_json, save_json, DatasetActivity, LayerInfo, ModelDescription, FORMAT_VERSION,
};
pub use collect::{collect_activity, describe_model, CollectOptions};
