//! Histogram rebinning onto coarser bin-edge grids.
//!
//! Two flavours are provided:
//!
//! - **by bin edge**: every destination bin is the arithmetic mean of the source
//!   values whose bin *center* falls inside the destination interval. The
//!   interval is `[left, right)` by default, `(left, right]` with
//!   [`EdgeSide::Right`].
//! - **by group**: the source is partitioned into equal contiguous groups of
//!   `factor` bins which are summed (or averaged). Used when the destination
//!   grid is an exact integer coarsening of the source grid.
//!
//! Matrices follow the crate convention: rows are energy bins, columns are
//! off-axis channels. Both flavours work along either axis.

use nalgebra::{DMatrix, DVector};

use crate::error::{FluxFitError, FluxResult};

/// Which end of a destination interval is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgeSide {
    /// `[left, right)`
    #[default]
    Left,
    /// `(left, right]`
    Right,
}

impl EdgeSide {
    fn contains(self, left: f64, right: f64, x: f64) -> bool {
        match self {
            EdgeSide::Left => left <= x && x < right,
            EdgeSide::Right => left < x && x <= right,
        }
    }
}

/// Matrix axis to reduce along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Rows,
    Columns,
}

impl Axis {
    fn len(self, m: &DMatrix<f64>) -> usize {
        match self {
            Axis::Rows => m.nrows(),
            Axis::Columns => m.ncols(),
        }
    }
}

/// One reduction step of a 2-D rebin: source centers and destination edges
/// along a single axis.
#[derive(Debug, Clone, Copy)]
pub struct AxisRebin<'a> {
    pub axis: Axis,
    pub centers: &'a [f64],
    pub edges: &'a [f64],
}

/// Check that `edges` describes at least one bin and is strictly increasing.
pub fn validate_edges(edges: &[f64]) -> FluxResult<()> {
    if edges.len() < 2 {
        return Err(FluxFitError::shape(format!(
            "bin edges need at least 2 entries, got {}",
            edges.len()
        )));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(FluxFitError::input("bin edges must be finite"));
    }
    if let Some(i) = edges.windows(2).position(|w| w[1] <= w[0]) {
        return Err(FluxFitError::input(format!(
            "bin edges must be strictly increasing (edge {} = {} >= edge {} = {})",
            i,
            edges[i],
            i + 1,
            edges[i + 1]
        )));
    }
    Ok(())
}

/// Source indices contributing to each destination bin.
///
/// Fails with [`FluxFitError::EmptyBinGroup`] as soon as a destination bin has
/// no source center inside it.
pub fn bin_membership(centers: &[f64], edges: &[f64], side: EdgeSide) -> FluxResult<Vec<Vec<usize>>> {
    validate_edges(edges)?;
    if centers.iter().any(|c| !c.is_finite()) {
        return Err(FluxFitError::input("source bin centers must be finite"));
    }

    let mut groups = Vec::with_capacity(edges.len() - 1);
    for (bin, w) in edges.windows(2).enumerate() {
        let members: Vec<usize> = centers
            .iter()
            .enumerate()
            .filter(|&(_, &c)| side.contains(w[0], w[1], c))
            .map(|(i, _)| i)
            .collect();
        if members.is_empty() {
            return Err(FluxFitError::EmptyBinGroup {
                bin,
                left: w[0],
                right: w[1],
            });
        }
        groups.push(members);
    }
    Ok(groups)
}

/// Rebin a 1-D array by destination bin edges (mean of contained centers).
pub fn average_by_bin_edge(
    values: &DVector<f64>,
    centers: &[f64],
    edges: &[f64],
    side: EdgeSide,
) -> FluxResult<DVector<f64>> {
    if values.len() != centers.len() {
        return Err(FluxFitError::shape(format!(
            "array has {} bins but {} source centers were given",
            values.len(),
            centers.len()
        )));
    }
    let groups = bin_membership(centers, edges, side)?;
    Ok(DVector::from_iterator(
        groups.len(),
        groups.iter().map(|members| {
            let sum: f64 = members.iter().map(|&i| values[i]).sum();
            sum / members.len() as f64
        }),
    ))
}

/// Rebin a 2-D array by destination bin edges along one axis.
pub fn average_by_bin_edge_along(
    values: &DMatrix<f64>,
    centers: &[f64],
    edges: &[f64],
    axis: Axis,
    side: EdgeSide,
) -> FluxResult<DMatrix<f64>> {
    if axis.len(values) != centers.len() {
        return Err(FluxFitError::shape(format!(
            "matrix has {} entries along {axis:?} but {} source centers were given",
            axis.len(values),
            centers.len()
        )));
    }
    let groups = bin_membership(centers, edges, side)?;

    let out = match axis {
        Axis::Rows => DMatrix::from_fn(groups.len(), values.ncols(), |g, j| {
            let members = &groups[g];
            members.iter().map(|&i| values[(i, j)]).sum::<f64>() / members.len() as f64
        }),
        Axis::Columns => DMatrix::from_fn(values.nrows(), groups.len(), |i, g| {
            let members = &groups[g];
            members.iter().map(|&j| values[(i, j)]).sum::<f64>() / members.len() as f64
        }),
    };
    Ok(out)
}

/// Rebin a 2-D array along each requested axis, in the order given.
///
/// The reductions only commute when bin boundaries line up with the source
/// partitioning; callers pick the order.
pub fn average_by_bin_edges_2d(
    values: &DMatrix<f64>,
    steps: &[AxisRebin<'_>],
    side: EdgeSide,
) -> FluxResult<DMatrix<f64>> {
    let mut out = values.clone();
    for step in steps {
        out = average_by_bin_edge_along(&out, step.centers, step.edges, step.axis, side)?;
    }
    Ok(out)
}

fn check_factor(len: usize, factor: usize) -> FluxResult<()> {
    if factor == 0 {
        return Err(FluxFitError::input("rebin factor must be >= 1"));
    }
    if len % factor != 0 {
        return Err(FluxFitError::shape(format!(
            "{len} bins cannot be split into groups of {factor}"
        )));
    }
    Ok(())
}

/// Sum contiguous groups of `factor` bins.
pub fn sum_groups(values: &DVector<f64>, factor: usize) -> FluxResult<DVector<f64>> {
    check_factor(values.len(), factor)?;
    let n = values.len() / factor;
    Ok(DVector::from_fn(n, |g, _| values.rows(g * factor, factor).sum()))
}

/// Average contiguous groups of `factor` bins (`sum / factor`).
pub fn average_groups(values: &DVector<f64>, factor: usize) -> FluxResult<DVector<f64>> {
    Ok(sum_groups(values, factor)? / factor as f64)
}

/// Sum contiguous groups of `factor` bins along one matrix axis.
pub fn sum_groups_along(values: &DMatrix<f64>, factor: usize, axis: Axis) -> FluxResult<DMatrix<f64>> {
    check_factor(axis.len(values), factor)?;
    let out = match axis {
        Axis::Rows => DMatrix::from_fn(values.nrows() / factor, values.ncols(), |g, j| {
            (g * factor..(g + 1) * factor).map(|i| values[(i, j)]).sum()
        }),
        Axis::Columns => DMatrix::from_fn(values.nrows(), values.ncols() / factor, |i, g| {
            (g * factor..(g + 1) * factor).map(|j| values[(i, j)]).sum()
        }),
    };
    Ok(out)
}

/// Average contiguous groups of `factor` bins along one matrix axis.
pub fn average_groups_along(values: &DMatrix<f64>, factor: usize, axis: Axis) -> FluxResult<DMatrix<f64>> {
    Ok(sum_groups_along(values, factor, axis)? / factor as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn averages_centers_inside_each_destination_bin() {
        let values = DVector::from_row_slice(&[1.0, 3.0, 5.0, 7.0]);
        let centers = [0.5, 1.5, 2.5, 3.5];
        let edges = [0.0, 2.0, 4.0];

        let out = average_by_bin_edge(&values, &centers, &edges, EdgeSide::Left).unwrap();
        assert_eq!(out.len(), 2);
        assert!(close(out[0], 2.0));
        assert!(close(out[1], 6.0));
    }

    #[test]
    fn edge_side_decides_boundary_membership() {
        // Center 2.0 sits exactly on the shared edge.
        let values = DVector::from_row_slice(&[1.0, 2.0, 4.0]);
        let centers = [1.0, 2.0, 3.0];
        let edges = [0.5, 2.0, 3.5];

        let left = average_by_bin_edge(&values, &centers, &edges, EdgeSide::Left).unwrap();
        assert!(close(left[0], 1.0));
        assert!(close(left[1], 3.0));

        let right = average_by_bin_edge(&values, &centers, &edges, EdgeSide::Right).unwrap();
        assert!(close(right[0], 1.5));
        assert!(close(right[1], 4.0));
    }

    #[test]
    fn empty_destination_bin_is_an_error() {
        let values = DVector::from_row_slice(&[1.0, 2.0]);
        let centers = [0.5, 0.7];
        let edges = [0.0, 1.0, 2.0];

        let err = average_by_bin_edge(&values, &centers, &edges, EdgeSide::Left).unwrap_err();
        assert!(matches!(err, FluxFitError::EmptyBinGroup { bin: 1, .. }));
    }

    #[test]
    fn rebinning_onto_own_grid_is_identity() {
        let values = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let row_edges = [0.0, 1.0, 2.0, 3.0];
        let row_centers = [0.5, 1.5, 2.5];
        let col_edges = [-1.0, 0.0, 1.0];
        let col_centers = [-0.5, 0.5];

        let out = average_by_bin_edges_2d(
            &values,
            &[
                AxisRebin { axis: Axis::Rows, centers: &row_centers, edges: &row_edges },
                AxisRebin { axis: Axis::Columns, centers: &col_centers, edges: &col_edges },
            ],
            EdgeSide::Left,
        )
        .unwrap();
        assert_eq!(out, values);
    }

    #[test]
    fn two_dimensional_rebin_reduces_both_axes() {
        #[rustfmt::skip]
        let values = DMatrix::from_row_slice(4, 2, &[
            1.0, 10.0,
            3.0, 30.0,
            5.0, 50.0,
            7.0, 70.0,
        ]);
        let row_centers = [0.5, 1.5, 2.5, 3.5];
        let col_centers = [0.0, 1.0];

        let out = average_by_bin_edges_2d(
            &values,
            &[
                AxisRebin { axis: Axis::Rows, centers: &row_centers, edges: &[0.0, 2.0, 4.0] },
                AxisRebin { axis: Axis::Columns, centers: &col_centers, edges: &[-0.5, 1.5] },
            ],
            EdgeSide::Left,
        )
        .unwrap();
        assert_eq!(out.shape(), (2, 1));
        assert!(close(out[(0, 0)], 11.0));
        assert!(close(out[(1, 0)], 33.0));
    }

    #[test]
    fn center_count_must_match_array() {
        let values = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        let err = average_by_bin_edge(&values, &[0.5, 1.5], &[0.0, 2.0], EdgeSide::Left).unwrap_err();
        assert!(matches!(err, FluxFitError::ShapeMismatch(_)));
    }

    #[test]
    fn group_sum_is_linear() {
        let a = DVector::from_row_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = DVector::from_row_slice(&[0.5, -1.0, 2.0, 0.0, 3.5, 1.0]);

        let lhs = sum_groups(&(&a + &b), 3).unwrap();
        let rhs = sum_groups(&a, 3).unwrap() + sum_groups(&b, 3).unwrap();
        assert!((lhs - rhs).amax() < 1e-12);

        let avg = average_groups(&a, 2).unwrap();
        assert_eq!(avg.as_slice(), &[1.5, 3.5, 5.5]);
    }

    #[test]
    fn group_rebin_requires_divisible_length() {
        let a = DVector::from_row_slice(&[1.0, 2.0, 3.0]);
        assert!(matches!(sum_groups(&a, 2), Err(FluxFitError::ShapeMismatch(_))));
        assert!(matches!(sum_groups(&a, 0), Err(FluxFitError::InvalidInput(_))));
    }

    #[test]
    fn group_average_along_columns() {
        let m = DMatrix::from_row_slice(2, 4, &[1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0]);
        let out = average_groups_along(&m, 2, Axis::Columns).unwrap();
        assert_eq!(out, DMatrix::from_row_slice(2, 2, &[2.0, 6.0, 3.0, 7.0]));
    }

    #[test]
    fn rejects_non_increasing_edges() {
        assert!(validate_edges(&[0.0, 1.0, 1.0]).is_err());
        assert!(validate_edges(&[0.0]).is_err());
        assert!(validate_edges(&[0.0, 0.5, 2.0]).is_ok());
    }
}
