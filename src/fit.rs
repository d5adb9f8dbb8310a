//! Scaled-fit: the single uniform, non-upscaling factor that maps a content box into a
//! fixed page box.

/// Content or page boxes smaller than this (in either axis) are treated as degenerate.
pub const MIN_DIMENSION: f32 = 1.0;

/// `min(page_w / content_w, page_h / content_h, 1)`.
///
/// Degenerate content (non-finite, zero, negative, or below [`MIN_DIMENSION`]) yields `1.0`.
/// The page box is floored to [`MIN_DIMENSION`], so the result is always finite and in
/// `(0, 1]`.
pub fn fit(content_w: f32, content_h: f32, page_w: f32, page_h: f32) -> f32 {
    if is_degenerate(content_w) || is_degenerate(content_h) {
        return 1.0;
    }
    let page_w = floor_page(page_w);
    let page_h = floor_page(page_h);
    let factor = (page_w / content_w).min(page_h / content_h).min(1.0);
    if factor.is_finite() && factor > 0.0 {
        factor
    } else {
        1.0
    }
}

fn is_degenerate(value: f32) -> bool {
    !value.is_finite() || value < MIN_DIMENSION
}

fn floor_page(value: f32) -> f32 {
    if value.is_finite() {
        value.max(MIN_DIMENSION)
    } else {
        MIN_DIMENSION
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginPolicy {
    #[default]
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    pub factor: f32,
    pub origin: OriginPolicy,
}

impl ScaleTransform {
    pub fn compute(content_w: f32, content_h: f32, page_w: f32, page_h: f32) -> Self {
        Self {
            factor: fit(content_w, content_h, page_w, page_h),
            origin: OriginPolicy::Center,
        }
    }

    /// Scaled content box inside the page, in the same unit as the inputs.
    pub fn place(&self, content_w: f32, content_h: f32, page_w: f32, page_h: f32) -> Placement {
        let width = content_w.max(0.0) * self.factor;
        let height = content_h.max(0.0) * self.factor;
        match self.origin {
            OriginPolicy::Center => Placement {
                x: (page_w - width) / 2.0,
                y: (page_h - height) / 2.0,
                width,
                height,
            },
        }
    }
}
