use crate::error::ExportError;
use crate::types::{Pt, Size};
use serde::{Deserialize, Serialize};

/// Resolution of the host's logical pixel grid (CSS pixels).
pub const CSS_PX_PER_INCH: f32 = 96.0;
pub const PT_PER_INCH: f32 = 72.0;
pub const MM_PER_INCH: f32 = 25.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentClass {
    #[default]
    A3Landscape,
    A4Landscape,
    A4Portrait,
}

impl DocumentClass {
    pub fn dimensions_mm(self) -> (f32, f32) {
        match self {
            DocumentClass::A3Landscape => (420.0, 297.0),
            DocumentClass::A4Landscape => (297.0, 210.0),
            DocumentClass::A4Portrait => (210.0, 297.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentClass::A3Landscape => "a3_landscape",
            DocumentClass::A4Landscape => "a4_landscape",
            DocumentClass::A4Portrait => "a4_portrait",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub width: u32,
    pub height: u32,
}

/// Physical page size shared by every page of one document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    width_mm: f32,
    height_mm: f32,
}

impl PageGeometry {
    pub fn from_mm(width_mm: f32, height_mm: f32) -> Result<Self, ExportError> {
        let valid = |v: f32| v.is_finite() && v > 0.0;
        if !valid(width_mm) || !valid(height_mm) {
            return Err(ExportError::InvalidConfiguration(format!(
                "page size must be positive, got {width_mm}mm x {height_mm}mm"
            )));
        }
        Ok(Self {
            width_mm,
            height_mm,
        })
    }

    pub fn for_class(class: DocumentClass) -> Self {
        let (width_mm, height_mm) = class.dimensions_mm();
        Self {
            width_mm,
            height_mm,
        }
    }

    pub fn width_mm(&self) -> f32 {
        self.width_mm
    }

    pub fn height_mm(&self) -> f32 {
        self.height_mm
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width_mm / self.height_mm
    }

    /// Page box in host pixels at [`CSS_PX_PER_INCH`], rounded to whole pixels.
    pub fn pixel_box(&self) -> PixelBox {
        let to_px = |mm: f32| (mm / MM_PER_INCH * CSS_PX_PER_INCH).round().max(1.0) as u32;
        PixelBox {
            width: to_px(self.width_mm),
            height: to_px(self.height_mm),
        }
    }

    pub fn point_size(&self) -> Size {
        Size::from_mm(self.width_mm, self.height_mm)
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::for_class(DocumentClass::default())
    }
}

pub fn px_to_pt(px: f32) -> Pt {
    Pt::from_f32(px * PT_PER_INCH / CSS_PX_PER_INCH)
}
