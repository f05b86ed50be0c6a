// ========================================================================================
//
//                 The kernel: nearest-sample delay-and-sum for one point
//
// ========================================================================================
//
// This module contains the innermost loop of the reconstruction engine. It is pure and
// allocation-free: it reads the validated input views for a single imaging point and
// returns that point's accumulated amplitude. Scheduling lives in `pipeline`.

use crate::types::DelayAndSumInputs;

/// The reconstructed amplitude of one imaging point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointAmplitude {
    pub real: f32,
    pub imag: f32,
    /// `false` if at least one scanline's lookup fell outside the recorded window.
    pub valid: bool,
}

impl PointAmplitude {
    #[inline(always)]
    pub fn mask_value(&self) -> i32 {
        i32::from(self.valid)
    }
}

/// Sums the nearest recorded sample of every scanline for imaging point `point`.
///
/// Scanlines are visited in order `0..num_scanlines`, so the floating-point result is
/// identical no matter how points are distributed over threads. A scanline whose
/// lookup lands outside `[0, num_samples)` contributes nothing and clears `valid`; the
/// remaining scanlines are still summed.
///
/// The caller must pass `point < inputs.num_points()`.
#[inline]
pub fn sum_point_nearest(inputs: &DelayAndSumInputs, point: usize) -> PointAmplitude {
    let times_tx = inputs.lookup_times_tx().row(point);
    let times_rx = inputs.lookup_times_rx().row(point);
    let amps_tx = inputs.amplitudes_tx().row(point);
    let amps_rx = inputs.amplitudes_rx().row(point);
    let scanlines = inputs.scanlines();
    let time_axis = inputs.time_axis();
    let num_samples = scanlines.num_samples();

    let mut real = 0.0f32;
    let mut imag = 0.0f32;
    let mut valid = true;

    for (scan, (tx, rx)) in inputs.pairs().iter().enumerate() {
        let travel_time = times_tx[tx] + times_rx[rx];
        match time_axis.nearest_sample(travel_time, num_samples) {
            Some(sample) => {
                let amp_corr = amps_tx[tx] * amps_rx[rx];
                let (re, im) = scanlines.sample(scan, sample);
                real += amp_corr * re;
                imag += amp_corr * im;
            }
            None => valid = false,
        }
    }

    PointAmplitude { real, imag, valid }
}
