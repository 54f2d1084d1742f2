// 2D similarity fit between landmark shapes, after the orthogonal Procrustes
// solution used for face geometry.

use nalgebra::{Matrix2, Matrix2xX, Vector2};

const ABSOLUTE_ERROR_EPS: f32 = 1e-6;

/// Least-squares rotation and uniform scale (no translation) that maps the
/// centred `sources` onto the centred `targets`.
///
/// Returns the identity when the problem is degenerate, e.g. when every
/// source point coincides.
pub fn similarity_matrix(sources: &Matrix2xX<f32>, targets: &Matrix2xX<f32>) -> Matrix2<f32> {
    if sources.ncols() == 0 || sources.ncols() != targets.ncols() {
        return Matrix2::identity();
    }

    let centered_sources = center(sources);
    let centered_targets = center(targets);

    let Some(rotation) = compute_optimal_rotation(&(&centered_targets * centered_sources.transpose()))
    else {
        return Matrix2::identity();
    };

    match compute_optimal_scale(&centered_sources, &centered_targets, &rotation) {
        Some(scale) => rotation * scale,
        None => Matrix2::identity(),
    }
}

fn center(points: &Matrix2xX<f32>) -> Matrix2xX<f32> {
    let center_of_mass: Vector2<f32> = points.column_mean();
    let mut centered = points.clone();
    for mut column in centered.column_iter_mut() {
        column -= center_of_mass;
    }
    centered
}

fn compute_optimal_rotation(design_matrix: &Matrix2<f32>) -> Option<Matrix2<f32>> {
    if design_matrix.norm() <= ABSOLUTE_ERROR_EPS {
        return None;
    }

    let svd = design_matrix.svd(true, true);
    let mut post_rotation = svd.u?;
    let pre_rotation = svd.v_t?;

    // no reflections
    if post_rotation.determinant() * pre_rotation.determinant() < 0.0 {
        let mut column = post_rotation.column_mut(1);
        column *= -1.0;
    }

    Some(post_rotation * pre_rotation)
}

fn compute_optimal_scale(
    centered_sources: &Matrix2xX<f32>,
    centered_targets: &Matrix2xX<f32>,
    rotation: &Matrix2<f32>,
) -> Option<f32> {
    let numerator = (rotation * centered_sources).dot(centered_targets);
    let denominator = centered_sources.dot(centered_sources);

    if denominator <= f32::EPSILON {
        return None;
    }
    Some(numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Matrix2xX<f32> {
        Matrix2xX::from_column_slice(&[0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0])
    }

    #[test]
    fn identical_shapes_give_identity() {
        let m = similarity_matrix(&square(), &square());
        assert!((m - Matrix2::identity()).norm() < 1e-5);
    }

    #[test]
    fn recovers_rotation_and_scale() {
        let angle = std::f32::consts::FRAC_PI_6;
        let expected = Matrix2::new(angle.cos(), -angle.sin(), angle.sin(), angle.cos()) * 2.5;

        let sources = square();
        let mut targets = &expected * &sources;
        // translation must not leak into the result
        for mut column in targets.column_iter_mut() {
            column += Vector2::new(10.0, -4.0);
        }

        let m = similarity_matrix(&sources, &targets);
        assert!((m - expected).norm() < 1e-4, "got {m}");
    }

    #[test]
    fn collapsed_shape_falls_back_to_identity() {
        let sources = Matrix2xX::from_column_slice(&[1.0, 1.0, 1.0, 1.0]);
        let targets = Matrix2xX::from_column_slice(&[0.0, 0.0, 3.0, 4.0]);
        assert_eq!(similarity_matrix(&sources, &targets), Matrix2::identity());
    }
}
