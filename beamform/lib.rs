#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod io;
pub mod kernel;
pub mod pipeline;
pub mod postprocess;
pub mod types;

pub use io::{Dataset, DatasetError, DatasetManifest, write_results};
pub use kernel::{PointAmplitude, sum_point_nearest};
pub use pipeline::{
    DEFAULT_CHUNK_SIZE, DelayAndSumOptions, delay_and_sum_nearest, delay_and_sum_nearest_into,
};
pub use postprocess::apply_fillvalue;
pub use types::{
    BeamformError, DelayAndSumInputs, DelayAndSumOutput, ElementTable, ScanlinePairs, Scanlines,
    TimeAxis,
};
