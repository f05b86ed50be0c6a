// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ndarray::{Array1, Array2, ArrayView2, ArrayView3};
use thiserror::Error;

/// The number of `f32` values that make up one interleaved complex sample.
pub const COMPLEX_STRIDE: usize = 2;

// ========================================================================================
//                                   Error contract
// ========================================================================================

/// Structural problems with the arguments of a reconstruction.
///
/// A lookup time that lands outside the recorded window is NOT an error; it is a data
/// condition reported through the output mask.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BeamformError {
    #[error("{name} has shape {found:?}, expected {expected:?}")]
    DimensionMismatch {
        name: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error("{name}[{position}] = {value} is out of range for a probe with {num_elements} elements")]
    IndexOutOfRange {
        name: &'static str,
        position: usize,
        value: u32,
        num_elements: usize,
    },
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter {
        name: &'static str,
        message: String,
    },
    #[error("{0} must be a contiguous row-major array")]
    NonContiguous(&'static str),
    #[error("failed to build the worker thread pool: {0}")]
    ThreadPool(String),
}

fn mismatch(name: &'static str, expected: &[usize], found: &[usize]) -> BeamformError {
    BeamformError::DimensionMismatch {
        name,
        expected: expected.to_vec(),
        found: found.to_vec(),
    }
}

// ========================================================================================
//                                 Acquisition layout
// ========================================================================================

/// The transmit/receive element pair of every scanline, in scanline order.
///
/// Every element index is checked against `num_elements` at construction, so the
/// kernel can index the element-point tables without further checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanlinePairs {
    tx: Vec<u32>,
    rx: Vec<u32>,
    num_elements: usize,
}

impl ScanlinePairs {
    pub fn new(tx: Vec<u32>, rx: Vec<u32>, num_elements: usize) -> Result<Self, BeamformError> {
        if tx.len() != rx.len() {
            return Err(mismatch("rx", &[tx.len()], &[rx.len()]));
        }
        for (name, indices) in [("tx", &tx), ("rx", &rx)] {
            if let Some((position, &value)) = indices
                .iter()
                .enumerate()
                .find(|&(_, &e)| e as usize >= num_elements)
            {
                return Err(BeamformError::IndexOutOfRange {
                    name,
                    position,
                    value,
                    num_elements,
                });
            }
        }
        Ok(Self {
            tx,
            rx,
            num_elements,
        })
    }

    /// Full Matrix Capture: every element transmits, every element receives.
    /// Scanlines are transmitter-major, giving `n * n` scanlines.
    pub fn fmc(num_elements: usize) -> Self {
        let n = num_elements as u32;
        let (tx, rx): (Vec<u32>, Vec<u32>) =
            (0..n).flat_map(|t| (0..n).map(move |r| (t, r))).unzip();
        Self {
            tx,
            rx,
            num_elements,
        }
    }

    /// Half Matrix Capture: only pairs with `rx >= tx`, giving `n * (n + 1) / 2` scanlines.
    pub fn hmc(num_elements: usize) -> Self {
        let n = num_elements as u32;
        let (tx, rx): (Vec<u32>, Vec<u32>) =
            (0..n).flat_map(|t| (t..n).map(move |r| (t, r))).unzip();
        Self {
            tx,
            rx,
            num_elements,
        }
    }

    #[inline(always)]
    pub fn tx(&self) -> &[u32] {
        &self.tx
    }

    #[inline(always)]
    pub fn rx(&self) -> &[u32] {
        &self.rx
    }

    #[inline(always)]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// `(tx, rx)` element indices in scanline order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.tx
            .iter()
            .zip(&self.rx)
            .map(|(&t, &r)| (t as usize, r as usize))
    }
}

// ========================================================================================
//                                 Validated array views
// ========================================================================================

/// A validated, zero-cost view over a `[num_points x num_elements]` table of
/// element-point values (lookup times or amplitude factors).
///
/// The constructor guarantees the backing slice is contiguous and row-major, so a
/// point's row is a plain slice indexed by element.
#[derive(Debug, Clone, Copy)]
pub struct ElementTable<'a> {
    slice: &'a [f32],
    num_points: usize,
    num_elements: usize,
}

impl<'a> ElementTable<'a> {
    pub fn new(view: ArrayView2<'a, f32>, name: &'static str) -> Result<Self, BeamformError> {
        let (num_points, num_elements) = view.dim();
        let slice = view.to_slice().ok_or(BeamformError::NonContiguous(name))?;
        Ok(Self {
            slice,
            num_points,
            num_elements,
        })
    }

    /// Wraps a flat buffer laid out as `point * num_elements + element`.
    pub fn from_slice(
        slice: &'a [f32],
        num_points: usize,
        num_elements: usize,
        name: &'static str,
    ) -> Result<Self, BeamformError> {
        if num_points.checked_mul(num_elements) != Some(slice.len()) {
            return Err(mismatch(name, &[num_points, num_elements], &[slice.len()]));
        }
        Ok(Self {
            slice,
            num_points,
            num_elements,
        })
    }

    #[inline(always)]
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    #[inline(always)]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// All element values for one imaging point.
    #[inline(always)]
    pub fn row(&self, point: usize) -> &'a [f32] {
        let start = point * self.num_elements;
        &self.slice[start..start + self.num_elements]
    }

    #[inline(always)]
    pub fn get(&self, point: usize, element: usize) -> f32 {
        self.row(point)[element]
    }
}

/// A validated view over `[num_scanlines x num_samples x 2]` interleaved complex samples.
#[derive(Debug, Clone, Copy)]
pub struct Scanlines<'a> {
    slice: &'a [f32],
    num_scanlines: usize,
    num_samples: usize,
}

impl<'a> Scanlines<'a> {
    pub fn new(view: ArrayView3<'a, f32>) -> Result<Self, BeamformError> {
        let (num_scanlines, num_samples, parts) = view.dim();
        if parts != COMPLEX_STRIDE {
            return Err(mismatch(
                "scanlines",
                &[num_scanlines, num_samples, COMPLEX_STRIDE],
                &[num_scanlines, num_samples, parts],
            ));
        }
        let slice = view
            .to_slice()
            .ok_or(BeamformError::NonContiguous("scanlines"))?;
        Ok(Self {
            slice,
            num_scanlines,
            num_samples,
        })
    }

    pub fn from_slice(
        slice: &'a [f32],
        num_scanlines: usize,
        num_samples: usize,
    ) -> Result<Self, BeamformError> {
        let expected = num_scanlines
            .checked_mul(num_samples)
            .and_then(|n| n.checked_mul(COMPLEX_STRIDE));
        if expected != Some(slice.len()) {
            return Err(mismatch(
                "scanlines",
                &[num_scanlines, num_samples, COMPLEX_STRIDE],
                &[slice.len()],
            ));
        }
        Ok(Self {
            slice,
            num_scanlines,
            num_samples,
        })
    }

    #[inline(always)]
    pub fn num_scanlines(&self) -> usize {
        self.num_scanlines
    }

    #[inline(always)]
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// The `(real, imag)` pair of one time sample.
    #[inline(always)]
    pub fn sample(&self, scanline: usize, index: usize) -> (f32, f32) {
        let offset = (scanline * self.num_samples + index) * COMPLEX_STRIDE;
        (self.slice[offset], self.slice[offset + 1])
    }
}

// ========================================================================================
//                                     Time axis
// ========================================================================================

/// The sampling grid of the scanlines: sample `i` was recorded at `t0 + i / invdt`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeAxis {
    invdt: f32,
    rounding_origin: f32,
}

impl TimeAxis {
    pub fn new(invdt: f32, t0: f32) -> Result<Self, BeamformError> {
        if !invdt.is_finite() || invdt == 0.0 {
            return Err(BeamformError::InvalidParameter {
                name: "invdt",
                message: format!("expected a finite, non-zero inverse sample period, got {invdt}"),
            });
        }
        // Half a sample before t0, evaluated in double precision and narrowed once.
        let rounding_origin = (f64::from(t0) - 0.5 / f64::from(invdt)) as f32;
        Ok(Self {
            invdt,
            rounding_origin,
        })
    }

    /// `t0` shifted back by half a sample period.
    #[inline(always)]
    pub fn rounding_origin(&self) -> f32 {
        self.rounding_origin
    }

    /// The fractional sample position of `travel_time`, offset by half a sample so
    /// that truncation lands on the nearest sample.
    #[inline(always)]
    pub fn raw_index(&self, travel_time: f32) -> f32 {
        (travel_time - self.rounding_origin) * self.invdt
    }

    /// Maps a travel time to the nearest recorded sample, or `None` if it falls outside
    /// `[0, num_samples)`.
    ///
    /// Truncation is toward zero, so raw positions in `(-1, 0)` resolve to sample 0.
    /// Out-of-range casts saturate and NaN positions are treated as out of range.
    #[inline(always)]
    pub fn nearest_sample(&self, travel_time: f32, num_samples: usize) -> Option<usize> {
        let raw = self.raw_index(travel_time);
        if raw.is_nan() {
            return None;
        }
        let index = raw as i32;
        if index < 0 || index as usize >= num_samples {
            None
        } else {
            Some(index as usize)
        }
    }
}

// ========================================================================================
//                              Reconstruction blueprint
// ========================================================================================

/// A "proof token" for one delay-and-sum call: every array has been checked against
/// every other, so the kernel can run without further validation.
#[derive(Debug, Clone, Copy)]
pub struct DelayAndSumInputs<'a> {
    scanlines: Scanlines<'a>,
    pairs: &'a ScanlinePairs,
    lookup_times_tx: ElementTable<'a>,
    lookup_times_rx: ElementTable<'a>,
    amplitudes_tx: ElementTable<'a>,
    amplitudes_rx: ElementTable<'a>,
    time_axis: TimeAxis,
    /// Carried for callers that post-process masked points; the kernel never reads it.
    fillvalue: f32,
}

impl<'a> DelayAndSumInputs<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scanlines: Scanlines<'a>,
        pairs: &'a ScanlinePairs,
        lookup_times_tx: ElementTable<'a>,
        lookup_times_rx: ElementTable<'a>,
        amplitudes_tx: ElementTable<'a>,
        amplitudes_rx: ElementTable<'a>,
        time_axis: TimeAxis,
        fillvalue: f32,
    ) -> Result<Self, BeamformError> {
        if scanlines.num_scanlines() != pairs.len() {
            return Err(mismatch(
                "scanlines",
                &[pairs.len(), scanlines.num_samples(), COMPLEX_STRIDE],
                &[
                    scanlines.num_scanlines(),
                    scanlines.num_samples(),
                    COMPLEX_STRIDE,
                ],
            ));
        }

        let expected = [lookup_times_tx.num_points(), pairs.num_elements()];
        for (name, table) in [
            ("lookup_times_tx", &lookup_times_tx),
            ("lookup_times_rx", &lookup_times_rx),
            ("amplitudes_tx", &amplitudes_tx),
            ("amplitudes_rx", &amplitudes_rx),
        ] {
            let found = [table.num_points(), table.num_elements()];
            if found != expected {
                return Err(mismatch(name, &expected, &found));
            }
        }

        Ok(Self {
            scanlines,
            pairs,
            lookup_times_tx,
            lookup_times_rx,
            amplitudes_tx,
            amplitudes_rx,
            time_axis,
            fillvalue,
        })
    }

    /// Validates ndarray views in one step.
    #[allow(clippy::too_many_arguments)]
    pub fn from_views(
        scanlines: ArrayView3<'a, f32>,
        pairs: &'a ScanlinePairs,
        lookup_times_tx: ArrayView2<'a, f32>,
        lookup_times_rx: ArrayView2<'a, f32>,
        amplitudes_tx: ArrayView2<'a, f32>,
        amplitudes_rx: ArrayView2<'a, f32>,
        invdt: f32,
        t0: f32,
        fillvalue: f32,
    ) -> Result<Self, BeamformError> {
        Self::new(
            Scanlines::new(scanlines)?,
            pairs,
            ElementTable::new(lookup_times_tx, "lookup_times_tx")?,
            ElementTable::new(lookup_times_rx, "lookup_times_rx")?,
            ElementTable::new(amplitudes_tx, "amplitudes_tx")?,
            ElementTable::new(amplitudes_rx, "amplitudes_rx")?,
            TimeAxis::new(invdt, t0)?,
            fillvalue,
        )
    }

    #[inline(always)]
    pub fn scanlines(&self) -> &Scanlines<'a> {
        &self.scanlines
    }

    #[inline(always)]
    pub fn pairs(&self) -> &'a ScanlinePairs {
        self.pairs
    }

    #[inline(always)]
    pub fn lookup_times_tx(&self) -> &ElementTable<'a> {
        &self.lookup_times_tx
    }

    #[inline(always)]
    pub fn lookup_times_rx(&self) -> &ElementTable<'a> {
        &self.lookup_times_rx
    }

    #[inline(always)]
    pub fn amplitudes_tx(&self) -> &ElementTable<'a> {
        &self.amplitudes_tx
    }

    #[inline(always)]
    pub fn amplitudes_rx(&self) -> &ElementTable<'a> {
        &self.amplitudes_rx
    }

    #[inline(always)]
    pub fn time_axis(&self) -> &TimeAxis {
        &self.time_axis
    }

    #[inline(always)]
    pub fn fillvalue(&self) -> f32 {
        self.fillvalue
    }

    #[inline(always)]
    pub fn num_points(&self) -> usize {
        self.lookup_times_tx.num_points()
    }

    #[inline(always)]
    pub fn num_elements(&self) -> usize {
        self.pairs.num_elements()
    }

    #[inline(always)]
    pub fn num_samples(&self) -> usize {
        self.scanlines.num_samples()
    }

    #[inline(always)]
    pub fn num_scanlines(&self) -> usize {
        self.pairs.len()
    }
}

/// Owned reconstruction output: `result` is `[num_points x 2]` (real, imag) and `mask`
/// holds 1 for points where every scanline contributed, 0 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayAndSumOutput {
    pub result: Array2<f32>,
    pub mask: Array1<i32>,
}

impl DelayAndSumOutput {
    pub fn zeros(num_points: usize) -> Self {
        Self {
            result: Array2::zeros((num_points, COMPLEX_STRIDE)),
            mask: Array1::zeros(num_points),
        }
    }

    #[inline]
    pub fn num_points(&self) -> usize {
        self.mask.len()
    }

    /// The reconstructed `(real, imag)` amplitude of one point.
    #[inline]
    pub fn point(&self, point: usize) -> (f32, f32) {
        (self.result[[point, 0]], self.result[[point, 1]])
    }

    /// The share of points with a complete set of contributions. An empty image counts
    /// as fully valid.
    pub fn valid_fraction(&self) -> f64 {
        if self.mask.is_empty() {
            return 1.0;
        }
        let valid = self.mask.iter().filter(|&&m| m != 0).count();
        valid as f64 / self.mask.len() as f64
    }
}
