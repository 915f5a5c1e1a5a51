use serde::{Deserialize, Serialize};

use crate::errors::{LeafSamError, Result};

/// Axis-aligned box prompt in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_finite(&self) -> bool {
        self.as_array().iter().all(|v| v.is_finite())
    }

    pub fn is_well_formed(&self) -> bool {
        self.is_finite() && self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Rejects boxes the oracle cannot give a meaningful answer for.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in ["x1", "y1", "x2", "y2"].into_iter().zip(self.as_array()) {
            if !value.is_finite() {
                return Err(LeafSamError::validation(field, "must be a finite number"));
            }
        }
        if self.x1 >= self.x2 {
            return Err(LeafSamError::validation(
                "x1",
                format!("must be less than x2 (got {} >= {})", self.x1, self.x2),
            ));
        }
        if self.y1 >= self.y2 {
            return Err(LeafSamError::validation(
                "y1",
                format!("must be less than y2 (got {} >= {})", self.y1, self.y2),
            ));
        }
        Ok(())
    }

    pub const fn as_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(
            self.x1 * factor,
            self.y1 * factor,
            self.x2 * factor,
            self.y2 * factor,
        )
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}
