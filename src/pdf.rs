//! PDF serialization of an assembled [`Document`].
//!
//! Pages are written in a top-left coordinate space: every content stream starts with a
//! flip matrix, text uses a flipped text matrix and images a flipped placement matrix.

use crate::canvas::{Command, Document, FontKey};
use crate::error::ExportError;
use crate::font::{FontFace, FontFormat, RegisteredFonts};
use crate::types::{Color, Pt};
use lopdf::content::{Content, Operation};
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject,
    ObjectId as LoObjectId, Stream as LoStream, StringFormat, dictionary,
};
use std::collections::BTreeMap;
use tracing::debug;

pub const CREATOR: &str = "deckprint";
const PRODUCER: &str = concat!("deckprint ", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    /// JPEG bytes passed through untouched.
    Dct,
    /// Uncompressed 8-bit samples; deflated at save time.
    Raw,
}

/// A decoded capture ready to become an image XObject.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub encoding: ImageEncoding,
    pub data: Vec<u8>,
    pub alpha: Option<Vec<u8>>,
}

/// Decodes PNG or JPEG capture bytes.
pub fn decode_image_bytes(data: &[u8]) -> Result<ImageData, String> {
    let format = image::guess_format(data).map_err(|err| format!("unrecognized image: {err}"))?;
    let decoded = image::load_from_memory_with_format(data, format)
        .map_err(|err| format!("undecodable {format:?} image: {err}"))?;
    let (width, height) = (decoded.width(), decoded.height());
    if width == 0 || height == 0 {
        return Err(format!("image has zero area ({width}x{height})"));
    }

    if format == image::ImageFormat::Jpeg {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "DeviceGray",
            _ => "DeviceRGB",
        };
        return Ok(ImageData {
            width,
            height,
            color_space,
            encoding: ImageEncoding::Dct,
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width as usize) * (height as usize) * 3);
    let mut alpha = Vec::with_capacity((width as usize) * (height as usize));
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    Ok(ImageData {
        width,
        height,
        color_space: "DeviceRGB",
        encoding: ImageEncoding::Raw,
        data: rgb,
        alpha: has_alpha.then_some(alpha),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EmbeddedSlot {
    Regular,
    Bold,
}

#[derive(Default)]
struct FontUsage {
    helvetica: bool,
    helvetica_bold: bool,
    embedded: BTreeMap<EmbeddedSlot, BTreeMap<u16, String>>,
}

impl FontUsage {
    fn resource_name(key: FontKey, slot: Option<EmbeddedSlot>) -> &'static str {
        match (key, slot) {
            (FontKey::Helvetica, _) => "F1",
            (FontKey::HelveticaBold, _) => "F2",
            (_, Some(EmbeddedSlot::Bold)) => "F4",
            _ => "F3",
        }
    }
}

fn embedded_slot(fonts: &RegisteredFonts, key: FontKey) -> Option<EmbeddedSlot> {
    match key {
        FontKey::EmbeddedRegular => Some(EmbeddedSlot::Regular),
        FontKey::EmbeddedBold if fonts.bold.is_some() => Some(EmbeddedSlot::Bold),
        FontKey::EmbeddedBold => Some(EmbeddedSlot::Regular),
        FontKey::Helvetica | FontKey::HelveticaBold => None,
    }
}

fn slot_face(fonts: &RegisteredFonts, slot: EmbeddedSlot) -> &FontFace {
    match slot {
        EmbeddedSlot::Regular => &fonts.regular,
        EmbeddedSlot::Bold => fonts.bold.as_ref().unwrap_or(&fonts.regular),
    }
}

pub fn document_to_pdf(document: &Document) -> Result<Vec<u8>, ExportError> {
    let mut doc = LoDocument::with_version("1.7");
    let pages_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let size = document.geometry.point_size();
    let page_height = size.height;

    let mut usage = FontUsage::default();
    let mut kids = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let content = page_content(&page.commands, page_height, document, &mut usage)?;
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                size.width.to_f32().into(),
                size.height.to_f32().into(),
            ],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let mut font_dict = LoDictionary::new();
    if usage.helvetica {
        font_dict.set("F1", doc.add_object(base14_font("Helvetica")));
    }
    if usage.helvetica_bold {
        font_dict.set("F2", doc.add_object(base14_font("Helvetica-Bold")));
    }
    if let Some(fonts) = document.fonts.as_deref() {
        for (slot, glyphs) in &usage.embedded {
            let face = slot_face(fonts, *slot);
            let font_id = add_embedded_font(&mut doc, face, glyphs)?;
            let name = match slot {
                EmbeddedSlot::Regular => "F3",
                EmbeddedSlot::Bold => "F4",
            };
            font_dict.set(name, font_id);
        }
    }

    let mut xobjects = LoDictionary::new();
    for (name, image) in &document.images {
        xobjects.set(name.as_str(), add_image(&mut doc, image));
    }

    doc.objects.insert(
        resources_id,
        LoObject::Dictionary(dictionary! {
            "Font" => font_dict,
            "XObject" => xobjects,
        }),
    );
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Creator" => LoObject::string_literal(CREATOR),
        "Producer" => LoObject::string_literal(PRODUCER),
    };
    if let Some(title) = document.title.as_deref() {
        info.set("Title", text_string(title));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    debug!(pages = count, bytes = out.len(), "pdf serialized");
    Ok(out)
}

#[derive(Clone, Copy)]
struct TextState {
    font: Option<(FontKey, Pt)>,
}

fn page_content(
    commands: &[Command],
    page_height: Pt,
    document: &Document,
    usage: &mut FontUsage,
) -> Result<Content, ExportError> {
    let mut ops = Vec::with_capacity(commands.len() + 1);
    ops.push(Operation::new(
        "cm",
        vec![
            1.into(),
            0.into(),
            0.into(),
            (-1).into(),
            0.into(),
            page_height.to_f32().into(),
        ],
    ));

    let mut state = TextState { font: None };
    let mut stack: Vec<TextState> = Vec::new();
    for command in commands {
        match command {
            Command::SaveState => {
                stack.push(state);
                ops.push(Operation::new("q", vec![]));
            }
            Command::RestoreState => {
                if let Some(saved) = stack.pop() {
                    state = saved;
                    ops.push(Operation::new("Q", vec![]));
                }
            }
            Command::ConcatMatrix { a, b, c, d, e, f } => ops.push(Operation::new(
                "cm",
                vec![
                    (*a).into(),
                    (*b).into(),
                    (*c).into(),
                    (*d).into(),
                    e.to_f32().into(),
                    f.to_f32().into(),
                ],
            )),
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => ops.push(Operation::new("rg", color_operands(*color))),
            Command::SetStrokeColor(color) => {
                ops.push(Operation::new("RG", color_operands(*color)))
            }
            Command::SetLineWidth(width) => {
                ops.push(Operation::new("w", vec![width.to_f32().into()]))
            }
            Command::SetFont { font, size } => state.font = Some((*font, *size)),
            Command::MoveTo { x, y } => ops.push(Operation::new(
                "m",
                vec![x.to_f32().into(), y.to_f32().into()],
            )),
            Command::LineTo { x, y } => ops.push(Operation::new(
                "l",
                vec![x.to_f32().into(), y.to_f32().into()],
            )),
            Command::Stroke => ops.push(Operation::new("S", vec![])),
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                ops.push(rect_op(*x, *y, *width, *height));
                ops.push(Operation::new("f", vec![]));
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                ops.push(rect_op(*x, *y, *width, *height));
                ops.push(Operation::new("S", vec![]));
            }
            Command::DrawString { x, y, text } => {
                let (key, size) = state.font.unwrap_or((FontKey::Helvetica, Pt::from_f32(12.0)));
                let (name, encoded) = encode_text(document, usage, key, text)?;
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new(
                    "Tf",
                    vec![LoObject::Name(name.as_bytes().to_vec()), size.to_f32().into()],
                ));
                ops.push(Operation::new(
                    "Tm",
                    vec![
                        1.into(),
                        0.into(),
                        0.into(),
                        (-1).into(),
                        x.to_f32().into(),
                        y.to_f32().into(),
                    ],
                ));
                ops.push(Operation::new("Tj", vec![encoded]));
                ops.push(Operation::new("ET", vec![]));
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                if !document.images.contains_key(resource_id) {
                    return Err(ExportError::Serialization(format!(
                        "page references unknown image {resource_id}"
                    )));
                }
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new(
                    "cm",
                    vec![
                        width.to_f32().into(),
                        0.into(),
                        0.into(),
                        (-height.to_f32()).into(),
                        x.to_f32().into(),
                        (*y + *height).to_f32().into(),
                    ],
                ));
                ops.push(Operation::new(
                    "Do",
                    vec![LoObject::Name(resource_id.as_bytes().to_vec())],
                ));
                ops.push(Operation::new("Q", vec![]));
            }
        }
    }
    Ok(Content { operations: ops })
}

fn rect_op(x: Pt, y: Pt, width: Pt, height: Pt) -> Operation {
    Operation::new(
        "re",
        vec![
            x.to_f32().into(),
            y.to_f32().into(),
            width.to_f32().into(),
            height.to_f32().into(),
        ],
    )
}

fn color_operands(color: Color) -> Vec<LoObject> {
    vec![color.r.into(), color.g.into(), color.b.into()]
}

fn encode_text(
    document: &Document,
    usage: &mut FontUsage,
    key: FontKey,
    text: &str,
) -> Result<(&'static str, LoObject), ExportError> {
    if !key.is_embedded() {
        match key {
            FontKey::HelveticaBold => usage.helvetica_bold = true,
            _ => usage.helvetica = true,
        }
        return Ok((
            FontUsage::resource_name(key, None),
            LoObject::String(win_ansi_bytes(text), StringFormat::Literal),
        ));
    }

    let fonts = document.fonts.as_deref().ok_or_else(|| {
        ExportError::Serialization("page draws with an embedded font but none is registered".to_string())
    })?;
    let slot = embedded_slot(fonts, key).unwrap_or(EmbeddedSlot::Regular);
    let face = slot_face(fonts, slot);
    let glyphs = usage.embedded.entry(slot).or_default();
    let gids = face.glyph_ids(text);
    let mut bytes = Vec::with_capacity(gids.len() * 2);
    for (gid, ch) in gids.iter().zip(text.chars()) {
        bytes.extend_from_slice(&gid.to_be_bytes());
        if *gid != 0 {
            glyphs.entry(*gid).or_insert_with(|| ch.to_string());
        }
    }
    Ok((
        FontUsage::resource_name(key, Some(slot)),
        LoObject::String(bytes, StringFormat::Hexadecimal),
    ))
}

/// WinAnsi bytes for the base-14 fonts; characters outside Latin-1 become `?`.
fn win_ansi_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch as u32 {
            0x20..=0x7e | 0xa0..=0xff => ch as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn text_string(text: &str) -> LoObject {
    if text.is_ascii() {
        return LoObject::string_literal(text);
    }
    let mut bytes = vec![0xfe, 0xff];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

fn base14_font(base: &str) -> LoDictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => base,
        "Encoding" => "WinAnsiEncoding",
    }
}

fn add_embedded_font(
    doc: &mut LoDocument,
    face: &FontFace,
    glyphs: &BTreeMap<u16, String>,
) -> Result<LoObjectId, ExportError> {
    let base = sanitize_font_name(&face.postscript_name);
    let metrics = &face.metrics;

    let (file_key, file_dict, cid_subtype) = match face.format {
        FontFormat::TrueType => (
            "FontFile2",
            dictionary! { "Length1" => face.bytes().len() as i64 },
            "CIDFontType2",
        ),
        FontFormat::OpenTypeCff => (
            "FontFile3",
            dictionary! { "Subtype" => "OpenType" },
            "CIDFontType0",
        ),
    };
    let file_id = doc.add_object(LoStream::new(file_dict, face.bytes().to_vec()));

    let mut flags = 32i64;
    if metrics.is_fixed_pitch {
        flags |= 1;
    }
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => base.as_str(),
        "Flags" => flags,
        "FontBBox" => vec![
            i64::from(metrics.bbox.0).into(),
            i64::from(metrics.bbox.1).into(),
            i64::from(metrics.bbox.2).into(),
            i64::from(metrics.bbox.3).into(),
        ],
        "ItalicAngle" => i64::from(metrics.italic_angle),
        "Ascent" => i64::from(metrics.ascent),
        "Descent" => i64::from(metrics.descent),
        "CapHeight" => i64::from(metrics.cap_height),
        "StemV" => i64::from(metrics.stem_v),
        "MissingWidth" => i64::from(metrics.missing_width),
        file_key => file_id,
    });

    let mut widths = Vec::with_capacity(glyphs.len() * 2);
    for gid in glyphs.keys() {
        widths.push(i64::from(*gid).into());
        widths.push(LoObject::Array(vec![i64::from(face.glyph_advance(*gid)).into()]));
    }
    let mut cid_font = dictionary! {
        "Type" => "Font",
        "Subtype" => cid_subtype,
        "BaseFont" => base.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => LoObject::string_literal("Adobe"),
            "Ordering" => LoObject::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => i64::from(metrics.missing_width),
        "W" => widths,
    };
    if face.format == FontFormat::TrueType {
        cid_font.set("CIDToGIDMap", "Identity");
    }
    let cid_font_id = doc.add_object(cid_font);

    let to_unicode_id = doc.add_object(LoStream::new(
        dictionary! {},
        to_unicode_cmap(glyphs).into_bytes(),
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => base.as_str(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font_id.into()],
        "ToUnicode" => to_unicode_id,
    }))
}

fn add_image(doc: &mut LoDocument, image: &ImageData) -> LoObjectId {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(image.width),
        "Height" => i64::from(image.height),
        "ColorSpace" => image.color_space,
        "BitsPerComponent" => 8,
    };
    if let Some(alpha) = &image.alpha {
        let smask_id = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(image.width),
                "Height" => i64::from(image.height),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha.clone(),
        ));
        dict.set("SMask", smask_id);
    }
    match image.encoding {
        ImageEncoding::Dct => {
            dict.set("Filter", "DCTDecode");
            doc.add_object(LoStream::new(dict, image.data.clone()).with_compression(false))
        }
        ImageEncoding::Raw => doc.add_object(LoStream::new(dict, image.data.clone())),
    }
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(&u16, &String)> = glyphs.iter().collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");
    for block in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", block.len()));
        for (gid, text) in block {
            let mut units = String::new();
            for unit in text.encode_utf16() {
                units.push_str(&format!("{unit:04X}"));
            }
            out.push_str(&format!("<{gid:04X}> <{units}>\n"));
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn sanitize_font_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            out.push(ch);
        } else if ch == ' ' {
            out.push('-');
        }
    }
    if out.is_empty() {
        "Embedded".to_string()
    } else {
        out
    }
}
