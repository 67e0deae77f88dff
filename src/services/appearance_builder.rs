//! Turns the operator's appearance choices and the signer certificate into a
//! rendering plan: widget placement, rendering mode, DocMDP level and the
//! descriptive text layer.

use crate::domain::appearance::{AppearanceConfiguration, PlacementRect};
use crate::domain::certificate::SigningCertificate;
use crate::domain::constants::{APP_NAME, FIELD_NAME_RANDOM_BOUND, LAYER_DATE_FORMAT};
use crate::domain::dn::DistinguishedName;
use crate::infra::error::SigningResult;
use chrono::{DateTime, FixedOffset};
use rand::Rng;
use std::collections::HashSet;
use std::path::PathBuf;

/// What the visible signature shows besides text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderingMode {
    NameAndDescription,
    GraphicAndDescription,
}

/// Where the widget goes.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetPlacement {
    pub page: u32,
    pub rect: PlacementRect,
}

/// Everything the document writer needs to draw and describe the signature.
#[derive(Debug, Clone, PartialEq)]
pub struct AppearancePlan {
    /// `None` produces an invisible signature.
    pub placement: Option<WidgetPlacement>,
    pub field_name: String,
    pub rendering_mode: RenderingMode,
    pub graphic: Option<PathBuf>,
    pub watermark: Option<PathBuf>,
    /// DocMDP `/P`, `None` for an approval signature.
    pub docmdp_permission: Option<u8>,
    pub reason: Option<String>,
    pub location: Option<String>,
    /// Signer common name recorded as `/Name`.
    pub signer_name: Option<String>,
    pub layer_text: String,
    pub creator: String,
    /// Legacy n0..n4 layers with a validity status layer.
    pub legacy_layers: bool,
    pub signing_time: DateTime<FixedOffset>,
}

pub struct AppearanceBuilder<'a> {
    config: &'a AppearanceConfiguration,
    author: String,
}

impl<'a> AppearanceBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a AppearanceConfiguration, author: impl Into<String>) -> Self {
        Self {
            config,
            author: author.into(),
        }
    }

    /// Build the plan for `cert`, picking a field name not in `existing_fields`.
    pub fn build(
        &self,
        cert: &SigningCertificate,
        existing_fields: &HashSet<String>,
        now: DateTime<FixedOffset>,
    ) -> SigningResult<AppearancePlan> {
        self.config.validate()?;

        let placement = self.config.visible_rect().map(|rect| WidgetPlacement {
            page: self.config.page,
            rect,
        });
        if placement.is_none() {
            log::info!("No usable rectangle; the signature will be invisible");
        }

        let graphic = self.config.graphic().cloned();
        let rendering_mode = if graphic.is_some() {
            RenderingMode::GraphicAndDescription
        } else {
            RenderingMode::NameAndDescription
        };

        let subject = DistinguishedName::from_name(&cert.x509().tbs_certificate.subject);
        let field_name =
            generate_field_name(self.config.page, existing_fields, &mut rand::thread_rng());

        Ok(AppearancePlan {
            watermark: placement
                .as_ref()
                .and(self.config.watermark_path.clone()),
            placement,
            field_name,
            rendering_mode,
            graphic,
            docmdp_permission: self.config.certification_level.docmdp_permission(),
            reason: non_blank(self.config.reason.as_deref()),
            location: non_blank(self.config.location.as_deref()),
            signer_name: subject.common_name().map(str::to_string),
            layer_text: layer_text(&subject, self.config, now),
            creator: format!("{} ({APP_NAME})", self.author),
            legacy_layers: self.config.enable_visual_ok_mark,
            signing_time: now,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Descriptive text drawn in the signature rectangle.
#[must_use]
pub fn layer_text(
    subject: &DistinguishedName,
    config: &AppearanceConfiguration,
    now: DateTime<FixedOffset>,
) -> String {
    let mut text = String::new();
    if config.show_entire_subject {
        let full = subject
            .attributes()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        text.push_str(&full);
        text.push_str("\n\n");
    } else {
        text.push_str(&format!(
            "Signed by: {}\n",
            subject.common_name().unwrap_or_default()
        ));
        if config.include_organization {
            text.push_str(&format!(
                "ORG: {}\n",
                subject.organization().unwrap_or_default()
            ));
        }
    }
    if let Some(reason) = non_blank(config.reason.as_deref()) {
        text.push_str(&format!("Reason: {reason}\n"));
    }
    if let Some(location) = non_blank(config.location.as_deref()) {
        text.push_str(&format!("Location: {location}\n"));
    }
    if let Some(note) = non_blank(config.custom_text.as_deref()) {
        text.push_str(&note);
        text.push('\n');
    }
    text.push_str(&format!("Date: {}", now.format(LAYER_DATE_FORMAT)));
    text
}

/// `{APP}__P_{page}_{random}`, redrawn until it does not clash.
pub fn generate_field_name(page: u32, existing: &HashSet<String>, rng: &mut impl Rng) -> String {
    loop {
        let name = format!(
            "{APP_NAME}__P_{page}_{}",
            rng.gen_range(0..FIELD_NAME_RANDOM_BOUND)
        );
        if !existing.contains(&name) {
            return name;
        }
        log::debug!("Field name {name} already taken, drawing another");
    }
}

/// Uniform scale-to-fit, centred. Returns `(x, y, width, height)` relative to
/// the box origin.
#[must_use]
pub fn fit_centered(image_w: f32, image_h: f32, box_w: f32, box_h: f32) -> (f32, f32, f32, f32) {
    if image_w <= 0.0 || image_h <= 0.0 || box_w <= 0.0 || box_h <= 0.0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let scale = (box_w / image_w).min(box_h / image_h);
    let (w, h) = (image_w * scale, image_h * scale);
    ((box_w - w) / 2.0, (box_h - h) / 2.0, w, h)
}
