pub mod prediction;

pub use prediction::{PredictionConv, PredictionConvConfig};
