//! Garment placement: which body keypoints the garment corners go to, and the
//! perspective warp that puts them there.

use image::{Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use log::debug;
use nalgebra::{Matrix3, Point2, SMatrix, SVector};

use crate::error::{Error, Result};
use crate::pose::{BodyKeypoint, PoseKeypoints};

/// Four points in (top-left, top-right, bottom-right, bottom-left) order.
pub type Quad = [Point2<f32>; 4];

/// Chooses where the garment's corners land on the body.
pub trait CorrespondencePolicy {
    /// Target positions, in person-image pixels, for the garment corners in
    /// (top-left, top-right, bottom-right, bottom-left) order.
    fn target_quad(&self, pose: &PoseKeypoints, width: u32, height: u32) -> Result<Quad>;
}

/// Upright, front-facing garment spanning shoulders to hips. The garment's
/// top-left corner goes to the subject's left shoulder, which for a
/// camera-facing subject is on the right of the picture.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontalTorso;

impl CorrespondencePolicy for FrontalTorso {
    fn target_quad(&self, pose: &PoseKeypoints, width: u32, height: u32) -> Result<Quad> {
        let corner = |kp| {
            let p = pose.to_pixels(kp, width, height);
            Point2::new(p.x as f32, p.y as f32)
        };

        Ok([
            corner(BodyKeypoint::LeftShoulder),
            corner(BodyKeypoint::RightShoulder),
            corner(BodyKeypoint::RightHip),
            corner(BodyKeypoint::LeftHip),
        ])
    }
}

/// Corners of a `width` x `height` garment image.
pub fn source_quad(width: u32, height: u32) -> Quad {
    let (w, h) = (width as f32, height as f32);
    [
        Point2::new(0.0, 0.0),
        Point2::new(w, 0.0),
        Point2::new(w, h),
        Point2::new(0.0, h),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveTransform {
    matrix: Matrix3<f32>,
}

impl PerspectiveTransform {
    /// Solve for the homography taking each `from` corner to the matching `to`
    /// corner, with the bottom-right entry fixed at 1.
    pub fn from_quads(from: &Quad, to: &Quad) -> Result<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for (i, (src, dst)) in from.iter().zip(to.iter()).enumerate() {
            let (x, y) = (src.x as f64, src.y as f64);
            let (u, v) = (dst.x as f64, dst.y as f64);

            let r = 2 * i;
            a[(r, 0)] = x;
            a[(r, 1)] = y;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -x * u;
            a[(r, 7)] = -y * u;
            b[r] = u;

            a[(r + 1, 3)] = x;
            a[(r + 1, 4)] = y;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -x * v;
            a[(r + 1, 7)] = -y * v;
            b[r + 1] = v;
        }

        let h = a.lu().solve(&b).ok_or_else(|| {
            Error::DegenerateTransform(format!("corners {:?} -> {:?} are collinear", from, to))
        })?;
        if h.iter().any(|v| !v.is_finite()) {
            return Err(Error::DegenerateTransform(
                "homography has non-finite entries".to_string(),
            ));
        }

        let matrix = Matrix3::new(
            h[0] as f32, h[1] as f32, h[2] as f32,
            h[3] as f32, h[4] as f32, h[5] as f32,
            h[6] as f32, h[7] as f32, 1.0,
        );
        if matrix.determinant().abs() < f32::EPSILON {
            return Err(Error::DegenerateTransform(format!(
                "corners {:?} -> {:?} collapse the garment",
                from, to
            )));
        }
        debug!("Perspective transform {:?}", matrix);
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> &Matrix3<f32> {
        &self.matrix
    }

    pub fn apply(&self, p: Point2<f32>) -> Point2<f32> {
        let v = self.matrix * p.to_homogeneous();
        Point2::new(v.x / v.z, v.y / v.z)
    }

    /// Warp `image` into a `width` x `height` canvas. Pixels that map from
    /// outside the source are fully transparent.
    pub fn warp_rgba(&self, image: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage> {
        let m = &self.matrix;
        let row_major = [
            m[(0, 0)], m[(0, 1)], m[(0, 2)],
            m[(1, 0)], m[(1, 1)], m[(1, 2)],
            m[(2, 0)], m[(2, 1)], m[(2, 2)],
        ];
        let projection = Projection::from_matrix(row_major).ok_or_else(|| {
            Error::DegenerateTransform("perspective transform is not invertible".to_string())
        })?;

        let mut out = RgbaImage::new(width, height);
        warp_into(
            image,
            &projection,
            Interpolation::Bilinear,
            Rgba([0, 0, 0, 0]),
            &mut out,
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Point3;

    use super::*;
    use crate::pose::NUM_POSE_LANDMARKS;

    fn assert_close(a: Point2<f32>, b: Point2<f32>) {
        assert!((a - b).norm() < 1e-2, "{:?} != {:?}", a, b);
    }

    #[test]
    fn transform_maps_corners() {
        let from = source_quad(100, 200);
        let to = [
            Point2::new(60.0, 30.0),
            Point2::new(20.0, 32.0),
            Point2::new(25.0, 90.0),
            Point2::new(55.0, 88.0),
        ];
        let transform = PerspectiveTransform::from_quads(&from, &to).unwrap();
        for (src, dst) in from.iter().zip(to.iter()) {
            assert_close(transform.apply(*src), *dst);
        }
        assert_eq!(transform.matrix()[(2, 2)], 1.0);
    }

    #[test]
    fn collapsed_target_is_degenerate() {
        let from = source_quad(10, 10);
        let to = [Point2::new(5.0, 5.0); 4];
        assert!(PerspectiveTransform::from_quads(&from, &to).is_err());
    }

    #[test]
    fn frontal_torso_uses_shoulders_then_hips() {
        let mut points = vec![Point3::new(0.0, 0.0, 1.0); NUM_POSE_LANDMARKS];
        points[11] = Point3::new(0.75, 0.25, 1.0);
        points[12] = Point3::new(0.25, 0.25, 1.0);
        points[23] = Point3::new(0.75, 0.75, 1.0);
        points[24] = Point3::new(0.25, 0.75, 1.0);
        let pose = PoseKeypoints::new(points).unwrap();

        let quad = FrontalTorso.target_quad(&pose, 100, 100).unwrap();
        assert_eq!(
            quad,
            [
                Point2::new(75.0, 25.0),
                Point2::new(25.0, 25.0),
                Point2::new(25.0, 75.0),
                Point2::new(75.0, 75.0),
            ]
        );
    }

    #[test]
    fn warp_fills_outside_with_transparency() {
        let garment = RgbaImage::from_pixel(10, 10, Rgba([200, 100, 50, 255]));
        let to = [
            Point2::new(10.0, 10.0),
            Point2::new(30.0, 10.0),
            Point2::new(30.0, 30.0),
            Point2::new(10.0, 30.0),
        ];
        let transform = PerspectiveTransform::from_quads(&source_quad(10, 10), &to).unwrap();
        let warped = transform.warp_rgba(&garment, 40, 40).unwrap();

        assert_eq!(warped.dimensions(), (40, 40));
        let inside = warped.get_pixel(20, 20);
        for (c, expected) in inside.0.iter().zip([200u8, 100, 50, 255]) {
            assert!((*c as i32 - expected as i32).abs() <= 1);
        }
        assert_eq!(warped.get_pixel(2, 2)[3], 0);
        assert_eq!(warped.get_pixel(37, 37)[3], 0);
    }
}
