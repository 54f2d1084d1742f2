//! Outfit compositing: place a garment on the person's torso, blend it in
//! with a soft shadow and cut the result out along the person's silhouette.

use image::{DynamicImage, RgbImage};
use log::{debug, info};

use crate::compositing;
use crate::config::BlendSettings;
use crate::error::{Error, Result};
use crate::geometry::{source_quad, CorrespondencePolicy, FrontalTorso, PerspectiveTransform};
use crate::pose::PoseEstimationModel;
use crate::segmentation::SegmentationModel;

pub struct OutfitCompositor<P, S, C = FrontalTorso> {
    pose: P,
    segmentation: S,
    policy: C,
    blend: BlendSettings,
    mask_threshold: f32,
}

impl<P, S> OutfitCompositor<P, S, FrontalTorso>
where
    P: PoseEstimationModel,
    S: SegmentationModel,
{
    pub fn new(pose: P, segmentation: S, blend: BlendSettings, mask_threshold: f32) -> Self {
        Self::with_policy(pose, segmentation, FrontalTorso, blend, mask_threshold)
    }
}

impl<P, S, C> OutfitCompositor<P, S, C>
where
    P: PoseEstimationModel,
    S: SegmentationModel,
    C: CorrespondencePolicy,
{
    pub fn with_policy(
        pose: P,
        segmentation: S,
        policy: C,
        blend: BlendSettings,
        mask_threshold: f32,
    ) -> Self {
        Self {
            pose,
            segmentation,
            policy,
            blend,
            mask_threshold,
        }
    }

    /// Dress `person` in `clothing`. Fails with [`Error::NoPoseDetected`]
    /// when the pose model finds nobody.
    pub fn composite(&self, person: &DynamicImage, clothing: &DynamicImage) -> Result<RgbImage> {
        let mut result = person.to_rgb8();
        let (width, height) = result.dimensions();

        let pose = self.pose.run(&result)?.ok_or(Error::NoPoseDetected)?;
        let mask = self.segmentation.run(&result)?;

        // garments without an alpha channel become fully opaque
        let garment = clothing.to_rgba8();
        let target = self.policy.target_quad(&pose, width, height)?;
        let transform =
            PerspectiveTransform::from_quads(&source_quad(garment.width(), garment.height()), &target)?;
        let warped = transform.warp_rgba(&garment, width, height)?;
        debug!("Garment corners placed at {:?}", target);

        compositing::composite(&mut result, &warped, &self.blend);

        let silhouette = mask.to_binary(width, height, self.mask_threshold);
        compositing::apply_mask(&mut result, &silhouette);

        info!("Composited {}x{} garment onto {}x{} image", garment.width(), garment.height(), width, height);
        Ok(result)
    }
}
