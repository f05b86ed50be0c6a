// ========================================================================================
//
//                       The parallel reconstruction engine
//
// ========================================================================================
//
// This module fans the per-point kernel out over the imaging grid. The output buffers
// are split into disjoint chunks of `chunk_size` points; rayon's work-stealing scheduler
// hands chunks to idle workers, so no locks or atomics are needed. Inputs are shared,
// read-only borrows for the whole call.

use crate::kernel;
use crate::types::{BeamformError, COMPLEX_STRIDE, DelayAndSumInputs, DelayAndSumOutput};
use log::{debug, warn};
use ndarray::{ArrayViewMut1, ArrayViewMut2};
use rayon::prelude::*;
use std::time::Instant;

// --- Scheduling Defaults ---

/// The number of consecutive points handed to a worker as one unit of work.
/// Large enough to amortize dispatch overhead, small enough to balance load when some
/// regions of the grid see many more valid lookups than others.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

// ========================================================================================
//                                Configuration
// ========================================================================================

/// Tuning knobs for a reconstruction call. None of them affect the numerical result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayAndSumOptions {
    /// Points per scheduling chunk. Must be non-zero.
    pub chunk_size: usize,
    /// `None` runs on rayon's global pool. `Some(n)` builds a dedicated pool of `n`
    /// threads for this call.
    pub num_threads: Option<usize>,
}

impl Default for DelayAndSumOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_threads: None,
        }
    }
}

impl DelayAndSumOptions {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    fn validate(&self) -> Result<(), BeamformError> {
        if self.chunk_size == 0 {
            return Err(BeamformError::InvalidParameter {
                name: "chunk_size",
                message: "must be at least 1".to_string(),
            });
        }
        if let Some(threads) = self.num_threads {
            if threads == 0 {
                return Err(BeamformError::InvalidParameter {
                    name: "num_threads",
                    message: "must be at least 1".to_string(),
                });
            }
            let cores = num_cpus::get();
            if threads > cores {
                warn!("Requested {threads} threads on a machine with {cores} logical cores.");
            }
        }
        Ok(())
    }
}

// ========================================================================================
//                                 Public entry points
// ========================================================================================

/// Reconstructs every point into freshly allocated output arrays.
pub fn delay_and_sum_nearest(
    inputs: &DelayAndSumInputs,
    options: &DelayAndSumOptions,
) -> Result<DelayAndSumOutput, BeamformError> {
    let mut output = DelayAndSumOutput::zeros(inputs.num_points());
    delay_and_sum_nearest_into(
        inputs,
        output.result.view_mut(),
        output.mask.view_mut(),
        options,
    )?;
    Ok(output)
}

/// Reconstructs every point into caller-owned buffers.
///
/// `result` must be `[num_points x 2]` and `mask` `[num_points]`, both in standard
/// layout. Both are fully overwritten; nothing from a previous call survives.
pub fn delay_and_sum_nearest_into(
    inputs: &DelayAndSumInputs,
    mut result: ArrayViewMut2<f32>,
    mut mask: ArrayViewMut1<i32>,
    options: &DelayAndSumOptions,
) -> Result<(), BeamformError> {
    options.validate()?;

    let num_points = inputs.num_points();
    if result.dim() != (num_points, COMPLEX_STRIDE) {
        let (rows, cols) = result.dim();
        return Err(BeamformError::DimensionMismatch {
            name: "result",
            expected: vec![num_points, COMPLEX_STRIDE],
            found: vec![rows, cols],
        });
    }
    if mask.len() != num_points {
        return Err(BeamformError::DimensionMismatch {
            name: "mask",
            expected: vec![num_points],
            found: vec![mask.len()],
        });
    }
    let result = result
        .as_slice_mut()
        .ok_or(BeamformError::NonContiguous("result"))?;
    let mask = mask
        .as_slice_mut()
        .ok_or(BeamformError::NonContiguous("mask"))?;

    debug!(
        "Delay-and-sum: {} points, {} scanlines x {} samples, {} elements, chunk size {}",
        num_points,
        inputs.num_scanlines(),
        inputs.num_samples(),
        inputs.num_elements(),
        options.chunk_size
    );
    let start = Instant::now();

    // A chunk never needs to span more than the whole image.
    let chunk_size = options.chunk_size.min(num_points.max(1));
    match options.num_threads {
        None => fill_points(inputs, result, mask, chunk_size),
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| BeamformError::ThreadPool(e.to_string()))?;
            pool.install(|| fill_points(inputs, result, mask, chunk_size));
        }
    }

    debug!(
        "Delay-and-sum finished in {:.2?} on {} threads",
        start.elapsed(),
        options.num_threads.unwrap_or_else(rayon::current_num_threads)
    );
    Ok(())
}

// ========================================================================================
//                                 Parallel dispatch
// ========================================================================================

/// Splits the outputs into chunks of `chunk_size` points and runs the kernel on each
/// chunk in parallel. Chunk `i` owns points `i * chunk_size ..`, so writes are disjoint.
fn fill_points(inputs: &DelayAndSumInputs, result: &mut [f32], mask: &mut [i32], chunk_size: usize) {
    result
        .par_chunks_mut(chunk_size * COMPLEX_STRIDE)
        .zip(mask.par_chunks_mut(chunk_size))
        .enumerate()
        .for_each(|(chunk_idx, (result_chunk, mask_chunk))| {
            let first_point = chunk_idx * chunk_size;
            for (offset, (value, flag)) in result_chunk
                .chunks_exact_mut(COMPLEX_STRIDE)
                .zip(mask_chunk.iter_mut())
                .enumerate()
            {
                let amplitude = kernel::sum_point_nearest(inputs, first_point + offset);
                value[0] = amplitude.real;
                value[1] = amplitude.imag;
                *flag = amplitude.mask_value();
            }
        });
}
