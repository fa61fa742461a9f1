//! Active image tier derived from the user scale factor and the device pixel ratio.

use crate::domain::Tier;

/// Anything holding images that must follow the active tier.
pub trait ImageTarget {
    fn reselect_images(&mut self, tier: Tier);
}

/// Single owner of the active tier.
#[derive(Clone, Debug)]
pub struct DisplayScaleController {
    tier: Tier,
    user_scale: f64,
    device_pixel_ratio: f64,
}

impl Default for DisplayScaleController {
    fn default() -> Self {
        Self {
            tier: Tier::BASE,
            user_scale: 1.0,
            device_pixel_ratio: 1.0,
        }
    }
}

/// `ceil(user_scale * device_pixel_ratio)`, never below 1. `None` for unusable inputs.
pub fn tier_for(user_scale: f64, device_pixel_ratio: f64) -> Option<Tier> {
    let product = user_scale * device_pixel_ratio;
    if !product.is_finite() || product <= 0.0 || user_scale <= 0.0 {
        return None;
    }
    let tier = product.ceil().min(u32::MAX as f64) as u32;
    Some(Tier(tier.max(1)))
}

impl DisplayScaleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn user_scale(&self) -> f64 {
        self.user_scale
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    /// Recompute the tier and re-select images on `target` if it changed.
    ///
    /// Returns whether the active tier changed.
    pub fn recompute(
        &mut self,
        user_scale: f64,
        device_pixel_ratio: f64,
        target: &mut dyn ImageTarget,
    ) -> bool {
        let Some(tier) = tier_for(user_scale, device_pixel_ratio) else {
            tracing::warn!(user_scale, device_pixel_ratio, "ignoring invalid display scale");
            return false;
        };
        self.user_scale = user_scale;
        self.device_pixel_ratio = device_pixel_ratio;

        if tier == self.tier {
            return false;
        }
        tracing::info!(from = %self.tier, to = %tier, "image tier changed");
        self.tier = tier;
        target.reselect_images(tier);
        true
    }

    /// User-controlled scale changed (config / query parameter).
    pub fn set_user_scale(&mut self, user_scale: f64, target: &mut dyn ImageTarget) -> bool {
        self.recompute(user_scale, self.device_pixel_ratio, target)
    }

    /// Viewport / DPI changed.
    pub fn set_device_pixel_ratio(
        &mut self,
        device_pixel_ratio: f64,
        target: &mut dyn ImageTarget,
    ) -> bool {
        self.recompute(self.user_scale, device_pixel_ratio, target)
    }
}
