//! Operator-facing appearance and signing options.

use crate::domain::constants::CUSTOM_TEXT_MAX_CHARS;
use crate::infra::error::{SigningError, SigningResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// What later modifications the document still allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationLevel {
    /// Approval signature, no DocMDP transform.
    #[default]
    NotCertified,
    NoChangesAllowed,
    FormFilling,
    FormFillingAndAnnotations,
}

impl CertificationLevel {
    /// DocMDP `/P` value, or `None` for an approval signature.
    #[must_use]
    pub fn docmdp_permission(&self) -> Option<u8> {
        match self {
            CertificationLevel::NotCertified => None,
            CertificationLevel::NoChangesAllowed => Some(1),
            CertificationLevel::FormFilling => Some(2),
            CertificationLevel::FormFillingAndAnnotations => Some(3),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CertificationLevel::NotCertified => "Not certified",
            CertificationLevel::NoChangesAllowed => "No changes allowed",
            CertificationLevel::FormFilling => "Form filling",
            CertificationLevel::FormFillingAndAnnotations => "Form filling and annotations",
        }
    }
}

impl FromStr for CertificationLevel {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "none" | "not_certified" => Ok(CertificationLevel::NotCertified),
            "no_changes" | "no_changes_allowed" => Ok(CertificationLevel::NoChangesAllowed),
            "form_filling" => Ok(CertificationLevel::FormFilling),
            "form_filling_and_annotations" | "form_filling_and_annotation" => {
                Ok(CertificationLevel::FormFillingAndAnnotations)
            }
            other => Err(SigningError::InvalidInput(format!(
                "unknown certification level: {other}"
            ))),
        }
    }
}

/// Widget rectangle in PDF user space (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl PlacementRect {
    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Zero or negative extent, or non-finite coordinates.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    /// `[llx lly urx ury]`
    #[must_use]
    pub fn corners(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }
}

impl FromStr for PlacementRect {
    type Err = SigningError;

    /// `x,y,width,height`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f32> = s
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .map_err(|_| SigningError::InvalidInput(format!("invalid rectangle: {s}")))?;
        match values.as_slice() {
            [x, y, w, h] => Ok(PlacementRect::new(*x, *y, *w, *h)),
            _ => Err(SigningError::InvalidInput(format!(
                "rectangle needs four values x,y,width,height: {s}"
            ))),
        }
    }
}

/// Everything the operator chose about how the signature looks and what it carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppearanceConfiguration {
    pub show_graphic: bool,
    pub graphic_path: Option<PathBuf>,
    pub show_entire_subject: bool,
    pub include_organization: bool,
    pub certification_level: CertificationLevel,
    pub reason: Option<String>,
    pub location: Option<String>,
    pub custom_text: Option<String>,
    pub enable_ltv: bool,
    pub enable_timestamp: bool,
    /// Legacy layered appearance with a validity status layer.
    pub enable_visual_ok_mark: bool,
    /// 1-based page number.
    pub page: u32,
    pub rect: Option<PlacementRect>,
    pub watermark_path: Option<PathBuf>,
}

impl AppearanceConfiguration {
    #[must_use]
    pub fn new(page: u32, rect: Option<PlacementRect>) -> Self {
        Self {
            page,
            rect,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SigningResult<()> {
        if self.page == 0 {
            return Err(SigningError::InvalidInput(
                "page numbers start at 1".to_string(),
            ));
        }
        if let Some(text) = &self.custom_text {
            let count = text.chars().count();
            if count > CUSTOM_TEXT_MAX_CHARS {
                return Err(SigningError::InvalidInput(format!(
                    "custom text is {count} characters, at most {CUSTOM_TEXT_MAX_CHARS} allowed"
                )));
            }
        }
        if self.show_graphic && self.graphic_path.is_none() {
            log::warn!("Graphic requested without an image; falling back to name and description");
        }
        Ok(())
    }

    /// Rectangle usable for a visible widget.
    #[must_use]
    pub fn visible_rect(&self) -> Option<PlacementRect> {
        self.rect.filter(|r| !r.is_degenerate())
    }

    /// Graphic image to render, when enabled and supplied.
    #[must_use]
    pub fn graphic(&self) -> Option<&PathBuf> {
        if self.show_graphic {
            self.graphic_path.as_ref()
        } else {
            None
        }
    }
}
