//! Geometric primitives shared across the engine.
//!
//! Provides the 2D affine transform type used by the content-stream
//! interpreter (composition, point application, inversion) plus the point
//! and rectangle aliases that flow through layout and span handling.

/// Small epsilon for floating-point comparisons.
pub const EPSILON: f64 = 1e-9;

/// A 2D point (x, y).
pub type Point = (f64, f64);

/// A rectangle defined by (x0, y0, x1, y1) where (x0, y0) is bottom-left
/// and (x1, y1) is top-right.
pub type Rect = (f64, f64, f64, f64);

/// A 6-element affine transformation matrix (a, b, c, d, e, f).
/// Transforms point (x, y) to (ax + cy + e, bx + dy + f).
pub type Matrix = (f64, f64, f64, f64, f64, f64);

/// Identity transformation matrix.
pub const MATRIX_IDENTITY: Matrix = (1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

/// Compares two floats for approximate equality.
#[inline]
pub fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

/// Multiplies two matrices: applying the result is equivalent to
/// applying m1 first, then m0.
pub fn mult_matrix(m1: Matrix, m0: Matrix) -> Matrix {
    let (a1, b1, c1, d1, e1, f1) = m1;
    let (a0, b0, c0, d0, e0, f0) = m0;
    (
        a0 * a1 + c0 * b1,
        b0 * a1 + d0 * b1,
        a0 * c1 + c0 * d1,
        b0 * c1 + d0 * d1,
        a0 * e1 + c0 * f1 + e0,
        b0 * e1 + d0 * f1 + f0,
    )
}

/// Translates a matrix by (x, y) inside the projection.
///
/// The matrix is changed so that its origin is at the specified point in its
/// own coordinate system, not in the outer coordinate system.
pub fn translate_matrix(m: Matrix, v: Point) -> Matrix {
    let (a, b, c, d, e, f) = m;
    let (x, y) = v;
    (a, b, c, d, x * a + y * c + e, x * b + y * d + f)
}

/// Applies a matrix to a point.
pub fn apply_matrix_pt(m: Matrix, v: Point) -> Point {
    let (a, b, c, d, e, f) = m;
    let (x, y) = v;
    (a * x + c * y + e, b * x + d * y + f)
}

/// Applies matrix transformation to a vector, ignoring translation.
/// Equivalent to apply_matrix_pt(m, (p, q)) - apply_matrix_pt(m, (0, 0)).
pub fn apply_matrix_norm(m: Matrix, v: Point) -> Point {
    let (a, b, c, d, _e, _f) = m;
    let (p, q) = v;
    (a * p + c * q, b * p + d * q)
}

/// Inverts an affine matrix, or returns `None` when it is singular.
///
/// Prefixing a rewritten form stream with the inverse of the composed
/// transform cancels the transform the form invocation applies, so the
/// rewritten operators can carry absolute page-space coordinates.
pub fn invert_matrix(m: Matrix) -> Option<Matrix> {
    let (a, b, c, d, e, f) = m;
    let det = a * d - b * c;
    if det.abs() < EPSILON {
        return None;
    }
    let ia = d / det;
    let ib = -b / det;
    let ic = -c / det;
    let id = a / det;
    let ie = (c * f - d * e) / det;
    let i_f = (b * e - a * f) / det;
    Some((ia, ib, ic, id, ie, i_f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mult_matrix_identity() {
        let m = (2.0, 0.0, 0.0, 3.0, 5.0, 7.0);
        assert_eq!(mult_matrix(m, MATRIX_IDENTITY), m);
        assert_eq!(mult_matrix(MATRIX_IDENTITY, m), m);
    }

    #[test]
    fn test_apply_matrix_pt() {
        let m = (2.0, 0.0, 0.0, 2.0, 10.0, 20.0);
        assert_eq!(apply_matrix_pt(m, (5.0, 5.0)), (20.0, 30.0));
    }

    #[test]
    fn test_invert_matrix_round_trip() {
        let m = (2.0, 1.0, -1.0, 3.0, 10.0, -4.0);
        let inv = invert_matrix(m).unwrap();
        let (x, y) = apply_matrix_pt(inv, apply_matrix_pt(m, (3.5, -2.25)));
        assert!(approx_eq(x, 3.5, 1e-9));
        assert!(approx_eq(y, -2.25, 1e-9));
    }

    #[test]
    fn test_invert_matrix_singular() {
        assert!(invert_matrix((1.0, 2.0, 2.0, 4.0, 0.0, 0.0)).is_none());
        assert!(invert_matrix((0.0, 0.0, 0.0, 0.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn test_translate_matrix() {
        let m = (2.0, 0.0, 0.0, 2.0, 1.0, 1.0);
        let t = translate_matrix(m, (3.0, 4.0));
        assert_eq!(t, (2.0, 0.0, 0.0, 2.0, 7.0, 9.0));
    }
}
