//! Appearance stream rendering for the signature widget.
//!
//! Produces the form XObjects behind `/AP /N`: a background layer `n0`
//! (optional watermark), the description layer `n2` (text, plus the graphic
//! in graphic mode) and, for the legacy layout, the status layers `n1`, `n3`
//! and `n4`.

use crate::domain::appearance::PlacementRect;
use crate::domain::constants::WATERMARK_OPACITY;
use crate::domain::pdf::filters::flate_encode;
use crate::domain::pdf::serializer::format_real;
use crate::domain::pdf::{dict, Dictionary, IncrementalWriter, Object, ObjectRef};
use crate::infra::error::{SigningError, SigningResult};
use crate::services::appearance_builder::{fit_centered, AppearancePlan, RenderingMode};
use std::path::Path;

const MARGIN: f32 = 2.0;
const MAX_FONT_SIZE: f32 = 12.0;
const MIN_FONT_SIZE: f32 = 3.0;
const LEADING: f32 = 1.15;

/// Decoded raster ready to embed as an image XObject.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub width: u32,
    pub height: u32,
    rgb: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl EmbeddedImage {
    pub fn from_file(path: &Path) -> SigningResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            SigningError::DocumentError(format!("Failed to read image {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> SigningResult<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in rgba.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }
        let opaque = alpha.iter().all(|a| *a == u8::MAX);
        Ok(Self {
            width,
            height,
            rgb,
            alpha: (!opaque).then_some(alpha),
        })
    }

    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Queue the image (and its soft mask) and return the image reference.
    pub fn embed(&self, writer: &mut IncrementalWriter) -> SigningResult<ObjectRef> {
        let mut image_dict = self.image_dict("DeviceRGB");
        if let Some(alpha) = &self.alpha {
            let mask_ref = writer.allocate();
            writer.put(
                mask_ref,
                &Object::Stream {
                    dict: self.image_dict("DeviceGray"),
                    data: flate_encode(alpha)?,
                },
            );
            image_dict.insert("SMask".into(), mask_ref.into());
        }
        let image_ref = writer.allocate();
        writer.put(
            image_ref,
            &Object::Stream {
                dict: image_dict,
                data: flate_encode(&self.rgb)?,
            },
        );
        Ok(image_ref)
    }

    fn image_dict(&self, color_space: &str) -> Dictionary {
        dict([
            ("Type", Object::name("XObject")),
            ("Subtype", Object::name("Image")),
            ("Width", Object::Integer(i64::from(self.width))),
            ("Height", Object::Integer(i64::from(self.height))),
            ("ColorSpace", Object::name(color_space)),
            ("BitsPerComponent", Object::Integer(8)),
            ("Filter", Object::name("FlateDecode")),
        ])
    }
}

/// Wrapped text at the chosen size.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub font_size: f32,
    pub lines: Vec<String>,
}

/// Largest font size (in half-point steps) at which `text` fits the box.
/// At the minimum size, lines that do not fit are dropped.
#[must_use]
pub fn layout_text(text: &str, width: f32, height: f32) -> TextLayout {
    let mut size = MAX_FONT_SIZE;
    loop {
        let lines = wrap(text, width, size);
        let needed = lines.len() as f32 * size * LEADING;
        if needed <= height || size <= MIN_FONT_SIZE {
            let fitting = ((height / (size * LEADING)).floor() as usize).max(1);
            let lines = lines.into_iter().take(fitting).collect();
            return TextLayout {
                font_size: size,
                lines,
            };
        }
        size -= 0.5;
    }
}

fn wrap(text: &str, width: f32, size: f32) -> Vec<String> {
    let mut out = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        for word in paragraph.split(' ') {
            let candidate = if line.is_empty() {
                word.to_string()
            } else {
                format!("{line} {word}")
            };
            if text_width(&candidate, size) <= width {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            // words wider than the box are split by character
            for ch in word.chars() {
                let mut next = line.clone();
                next.push(ch);
                if text_width(&next, size) > width && !line.is_empty() {
                    out.push(std::mem::take(&mut line));
                    line.push(ch);
                } else {
                    line = next;
                }
            }
        }
        out.push(line);
    }
    out
}

/// Width in points of `text` set in Helvetica.
#[must_use]
pub fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(|c| f32::from(helvetica_width(c))).sum::<f32>() * size / 1000.0
}

fn helvetica_width(c: char) -> u16 {
    match c {
        ' ' | '!' | ',' | '.' | '/' | ':' | ';' | '[' | '\\' | ']' | 'I' | 'f' | 't' => 278,
        '"' => 355,
        '#' | '$' | '0'..='9' | '?' | '_' | 'L' | 'a' | 'b' | 'd' | 'e' | 'g' | 'h' | 'n'
        | 'o' | 'p' | 'q' | 'u' => 556,
        '%' => 889,
        '&' | 'A' | 'B' | 'E' | 'K' | 'P' | 'S' | 'V' | 'X' | 'Y' => 667,
        '\'' => 191,
        '(' | ')' | '-' | '`' | 'r' => 333,
        '*' => 389,
        '+' | '<' | '=' | '>' | '~' => 584,
        '@' => 1015,
        'C' | 'D' | 'H' | 'N' | 'R' | 'U' | 'w' => 722,
        'F' | 'T' | 'Z' => 611,
        'G' | 'O' | 'Q' => 778,
        'J' | 'c' | 'k' | 's' | 'v' | 'x' | 'y' | 'z' => 500,
        'M' | 'm' => 833,
        'W' => 944,
        '^' => 469,
        'i' | 'j' | 'l' => 222,
        '{' | '}' => 334,
        '|' => 260,
        _ => 556,
    }
}

/// WinAnsi literal string; characters outside Latin-1 become `?`.
fn pdf_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('(');
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out.push(')');
    out
}

fn text_ops(layout: &TextLayout, x: f32, top: f32) -> String {
    let size = layout.font_size;
    let mut ops = format!("BT\n/F1 {} Tf\n0 g\n", format_real(f64::from(size)));
    let mut y = top - size;
    for line in &layout.lines {
        ops.push_str(&format!(
            "1 0 0 1 {} {} Tm\n{} Tj\n",
            format_real(f64::from(x)),
            format_real(f64::from(y)),
            pdf_literal(line)
        ));
        y -= size * LEADING;
    }
    ops.push_str("ET\n");
    ops
}

fn image_ops(name: &str, x: f32, y: f32, w: f32, h: f32) -> String {
    format!(
        "q {} 0 0 {} {} {} cm /{name} Do Q\n",
        format_real(f64::from(w)),
        format_real(f64::from(h)),
        format_real(f64::from(x)),
        format_real(f64::from(y))
    )
}

fn form(bbox: (f32, f32), resources: Dictionary, content: String) -> Object {
    Object::Stream {
        dict: dict([
            ("Type", Object::name("XObject")),
            ("Subtype", Object::name("Form")),
            ("FormType", Object::Integer(1)),
            (
                "BBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    bbox.0.into(),
                    bbox.1.into(),
                ]),
            ),
            ("Resources", Object::Dictionary(resources)),
        ]),
        data: content.into_bytes(),
    }
}

fn xobjects(entries: Vec<(&str, ObjectRef)>) -> Dictionary {
    let names = entries
        .into_iter()
        .map(|(name, r)| (name.to_string(), Object::Reference(r)))
        .collect();
    dict([("XObject", Object::Dictionary(names))])
}

/// Render the widget appearance and return the `/AP /N` stream reference.
pub fn render_appearance(
    plan: &AppearancePlan,
    rect: &PlacementRect,
    writer: &mut IncrementalWriter,
) -> SigningResult<ObjectRef> {
    let bbox = (rect.width, rect.height);

    let font_ref = writer.allocate();
    writer.put(
        font_ref,
        &Object::Dictionary(dict([
            ("Type", Object::name("Font")),
            ("Subtype", Object::name("Type1")),
            ("BaseFont", Object::name("Helvetica")),
            ("Encoding", Object::name("WinAnsiEncoding")),
        ])),
    );
    let font_resources = || {
        dict([(
            "Font",
            Object::Dictionary(dict([("F1", Object::Reference(font_ref))])),
        )])
    };

    // n0: background, optionally watermarked
    let mut n0_content = String::from("% DSBlank\n");
    let mut n0_resources = Dictionary::new();
    if let Some(path) = &plan.watermark {
        let image = EmbeddedImage::from_file(path)?;
        let image_ref = image.embed(writer)?;
        let (x, y, w, h) =
            fit_centered(image.width as f32, image.height as f32, rect.width, rect.height);
        n0_content.push_str("q /GS0 gs\n");
        n0_content.push_str(&image_ops("Wm", x, y, w, h));
        n0_content.push_str("Q\n");
        n0_resources = xobjects(vec![("Wm", image_ref)]);
        n0_resources.insert(
            "ExtGState".into(),
            Object::Dictionary(dict([(
                "GS0",
                Object::Dictionary(dict([
                    ("Type", Object::name("ExtGState")),
                    ("ca", WATERMARK_OPACITY.into()),
                ])),
            )])),
        );
        log::debug!("Watermark placed at {x},{y} size {w}x{h}");
    }
    let n0 = writer.allocate();
    writer.put(n0, &form(bbox, n0_resources, n0_content));

    // n2: description, with the graphic on the left half in graphic mode
    let mut n2_resources = font_resources();
    let mut n2_content = String::new();
    let text_x = match (plan.rendering_mode, &plan.graphic) {
        (RenderingMode::GraphicAndDescription, Some(path)) => {
            let image = EmbeddedImage::from_file(path)?;
            let image_ref = image.embed(writer)?;
            let half = rect.width / 2.0;
            let (x, y, w, h) = fit_centered(
                image.width as f32,
                image.height as f32,
                half - 2.0 * MARGIN,
                rect.height - 2.0 * MARGIN,
            );
            n2_content.push_str(&image_ops("Img0", x + MARGIN, y + MARGIN, w, h));
            n2_resources.insert(
                "XObject".into(),
                Object::Dictionary(dict([("Img0", Object::Reference(image_ref))])),
            );
            half + MARGIN
        }
        _ => MARGIN,
    };
    let layout = layout_text(
        &plan.layer_text,
        rect.width - text_x - MARGIN,
        rect.height - 2.0 * MARGIN,
    );
    n2_content.push_str(&text_ops(&layout, text_x, rect.height - MARGIN));
    let n2 = writer.allocate();
    writer.put(n2, &form(bbox, n2_resources, n2_content));

    let draw = |name: &str| format!("q 1 0 0 1 0 0 cm /{name} Do Q\n");
    let normal = writer.allocate();
    if plan.legacy_layers {
        let n1 = writer.allocate();
        let q_size = (rect.height * 0.5).min(rect.width * 0.5);
        let mark = TextLayout {
            font_size: q_size,
            lines: vec!["?".to_string()],
        };
        let n1_content = format!(
            "% DSUnknown\n{}",
            text_ops(&mark, (rect.width - text_width("?", q_size)) / 2.0, rect.height * 0.75)
        );
        writer.put(n1, &form(bbox, font_resources(), n1_content));
        let n3 = writer.allocate();
        writer.put(n3, &form(bbox, Dictionary::new(), "% DSBlank\n".to_string()));
        let n4 = writer.allocate();
        writer.put(n4, &form(bbox, Dictionary::new(), "% DSBlank\n".to_string()));

        let frm = writer.allocate();
        writer.put(
            frm,
            &form(
                bbox,
                xobjects(vec![("n0", n0), ("n1", n1), ("n2", n2), ("n3", n3)]),
                ["n0", "n1", "n2", "n3"].iter().map(|n| draw(n)).collect(),
            ),
        );
        writer.put(
            normal,
            &form(
                bbox,
                xobjects(vec![("FRM", frm), ("n4", n4)]),
                format!("{}{}", draw("FRM"), draw("n4")),
            ),
        );
    } else {
        let frm = writer.allocate();
        writer.put(
            frm,
            &form(
                bbox,
                xobjects(vec![("n0", n0), ("n2", n2)]),
                format!("{}{}", draw("n0"), draw("n2")),
            ),
        );
        writer.put(
            normal,
            &form(bbox, xobjects(vec![("FRM", frm)]), draw("FRM")),
        );
    }
    log::debug!(
        "Rendered appearance {}x{} at font size {} ({} line(s), legacy layers: {})",
        rect.width,
        rect.height,
        layout.font_size,
        layout.lines.len(),
        plan.legacy_layers
    );
    Ok(normal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_metrics() {
        assert!((text_width("Hello", 10.0) - 22.78).abs() < 0.01);
        assert_eq!(text_width("", 12.0), 0.0);
    }

    #[test]
    fn layout_shrinks_to_fit() {
        let text = "Signed by: Someone With A Long Name\nReason: Approval\nDate: 2024.01.01 00:00:00 +00:00";
        let roomy = layout_text(text, 400.0, 200.0);
        assert_eq!(roomy.font_size, MAX_FONT_SIZE);
        assert_eq!(roomy.lines.len(), 3);

        let tight = layout_text(text, 120.0, 40.0);
        assert!(tight.font_size < MAX_FONT_SIZE);
        let height = tight.lines.len() as f32 * tight.font_size * LEADING;
        assert!(height <= 40.0);
        for line in &tight.lines {
            assert!(text_width(line, tight.font_size) <= 120.0);
        }
    }

    #[test]
    fn empty_lines_are_kept() {
        let layout = layout_text("A\n\nB", 100.0, 100.0);
        assert_eq!(layout.lines, vec!["A", "", "B"]);
    }

    #[test]
    fn literals_escape_and_encode() {
        assert_eq!(pdf_literal("a(b)\\"), "(a\\(b\\)\\\\)");
        assert_eq!(pdf_literal("é"), "(\\351)");
        assert_eq!(pdf_literal("日"), "(?)");
    }

    #[test]
    fn png_with_alpha_gets_soft_mask() {
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 128]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageOutputFormat::Png)
            .unwrap();
        let decoded = EmbeddedImage::from_bytes(&png).unwrap();
        assert_eq!((decoded.width, decoded.height), (2, 2));
        assert!(decoded.has_alpha());
        assert!(EmbeddedImage::from_bytes(b"not an image").is_err());
    }
}
