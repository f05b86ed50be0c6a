// ========================================================================================
//                          Caller-side output post-processing
// ========================================================================================
//
// The kernel leaves masked points at whatever partial sum the in-range scanlines
// produced. Imaging front-ends usually want those points replaced by a sentinel before
// display; that is the only place `fillvalue` is consumed.

use crate::types::{BeamformError, COMPLEX_STRIDE, DelayAndSumOutput};
use log::debug;
use ndarray::{ArrayView1, ArrayViewMut2, Zip};

/// Replaces the amplitude of every masked point (`mask == 0`) with `(fillvalue, 0)`.
/// Returns the number of points that were filled.
pub fn apply_fillvalue(
    mut result: ArrayViewMut2<f32>,
    mask: ArrayView1<i32>,
    fillvalue: f32,
) -> Result<usize, BeamformError> {
    let (rows, cols) = result.dim();
    if cols != COMPLEX_STRIDE || rows != mask.len() {
        return Err(BeamformError::DimensionMismatch {
            name: "result",
            expected: vec![mask.len(), COMPLEX_STRIDE],
            found: vec![rows, cols],
        });
    }

    let mut filled = 0;
    Zip::from(result.rows_mut())
        .and(&mask)
        .for_each(|mut value, &flag| {
            if flag == 0 {
                value[0] = fillvalue;
                value[1] = 0.0;
                filled += 1;
            }
        });

    debug!("Filled {filled} of {rows} points with {fillvalue}");
    Ok(filled)
}

impl DelayAndSumOutput {
    /// See [`apply_fillvalue`].
    pub fn apply_fillvalue(&mut self, fillvalue: f32) -> Result<usize, BeamformError> {
        apply_fillvalue(self.result.view_mut(), self.mask.view(), fillvalue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn only_masked_points_are_replaced() {
        let mut result = array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mask = array![1, 0, 1];

        let filled = apply_fillvalue(result.view_mut(), mask.view(), -1.0).unwrap();
        assert_eq!(filled, 1);
        assert_eq!(result, array![[1.0f32, 2.0], [-1.0, 0.0], [5.0, 6.0]]);
    }

    #[test]
    fn nan_fill_marks_masked_points() {
        let mut output = DelayAndSumOutput {
            result: Array2::from_elem((2, 2), 0.25),
            mask: Array1::from(vec![0, 1]),
        };
        assert_eq!(output.apply_fillvalue(f32::NAN).unwrap(), 1);
        assert!(output.result[[0, 0]].is_nan());
        assert_eq!(output.result[[0, 1]], 0.0);
        assert_eq!(output.point(1), (0.25, 0.25));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let mut result = Array2::<f32>::zeros((3, 2));
        let mask = Array1::<i32>::zeros(2);
        assert!(apply_fillvalue(result.view_mut(), mask.view(), 0.0).is_err());
    }
}
