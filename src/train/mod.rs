//! Fine-tuning: loss, the epoch loop, and checkpoints.
//!
//! # Example
//!
//! ```no_run
//! use afinar::data::{generate, split_dataset, Preprocess, SyntheticSpec};
//! use afinar::model::{ConvNet, NetConfig};
//! use afinar::optim::Sgd;
//! use afinar::train::{FineTuner, TrainOptions};
//!
//! # fn main() -> afinar::Result<()> {
//! let dataset = generate(&SyntheticSpec::default());
//! let split = split_dataset(&dataset, 0.2, 42)?;
//! let preprocess = Preprocess::new(1, (16, 16), vec![0.5], vec![0.5])?;
//!
//! let config = NetConfig { in_channels: 1, input_hw: (16, 16), ..NetConfig::default() };
//! let net = ConvNet::seeded(config)?.with_head(dataset.num_classes())?;
//!
//! let mut tuner = FineTuner::new(net, Box::new(Sgd::new(0.01, 0.9)), TrainOptions::default())?;
//! let result = tuner.run(&split, &preprocess)?;
//! println!("eval accuracy {:.3}", result.final_eval_accuracy);
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
mod loss;
mod tuner;

pub use loss::cross_entropy;
pub use tuner::{EpochMetrics, FineTuner, TrainOptions, TrainResult};
