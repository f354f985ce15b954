//! In-process PDF rendering with `lopdf`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::encryption::{EncryptionState, EncryptionVersion, Permissions};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use rand::RngCore;
use tracemark_mark::watermark::AVG_GLYPH_WIDTH;
use tracemark_mark::{DocumentMetadata, OverlaySpec, PageGeometry, Placement};
use tracing::{debug, info};

use crate::error::ToolError;
use crate::traits::DocumentRenderer;

/// Page key pointing at the overlay content stream, so a second overlay
/// replaces the first.
const OVERLAY_KEY: &str = "TracemarkOverlay";
const FONT_NAME: &str = "TMF";
const GSTATE_NAME: &str = "TMgs";
/// Gray level of visible watermark text.
const WATERMARK_GRAY: f64 = 0.5;
const NATIVE_KEY_LENGTH: usize = 256;
const CRYPT_FILTER: &[u8] = b"StdCF";

/// [`DocumentRenderer`] implemented on top of `lopdf`.
#[derive(Clone, Debug, Default)]
pub struct LopdfRenderer;

impl LopdfRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl DocumentRenderer for LopdfRenderer {
    fn page_geometry(&self, pdf: &Path) -> Result<Vec<PageGeometry>, ToolError> {
        let doc = load(pdf)?;
        Ok(doc
            .get_pages()
            .values()
            .map(|&id| media_box(&doc, id))
            .collect())
    }

    fn apply_overlay(&self, pdf: &Path, overlay: &OverlaySpec) -> Result<(), ToolError> {
        let mut doc = load(pdf)?;
        let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        if pages.len() != overlay.pages.len() {
            return Err(ToolError::Pdf(format!(
                "overlay covers {} pages but document has {}",
                overlay.pages.len(),
                pages.len()
            )));
        }

        let alpha = Object::from(overlay.alpha as f32);
        let gstate = dictionary! {
            "Type" => "ExtGState",
            "ca" => alpha.clone(),
            "CA" => alpha,
        };
        let (font_id, gstate_id) = match installed_resources(&doc, &pages) {
            Some((font_id, gstate_id)) => {
                doc.objects.insert(gstate_id, Object::Dictionary(gstate));
                (font_id, gstate_id)
            }
            None => {
                let font_id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => "Helvetica",
                    "Encoding" => "WinAnsiEncoding",
                });
                (font_id, doc.add_object(gstate))
            }
        };

        for (page_id, placements) in pages.iter().zip(&overlay.pages) {
            let content = overlay_content(overlay, placements);
            let resources = page_resources(&doc, *page_id, font_id, gstate_id);
            let (existing, contents) = {
                let page = doc.get_dictionary(*page_id).map_err(ToolError::pdf)?;
                (
                    page.get(OVERLAY_KEY.as_bytes())
                        .and_then(Object::as_reference)
                        .ok(),
                    page.get(b"Contents").ok().cloned(),
                )
            };

            let stream = Object::Stream(Stream::new(Dictionary::new(), content.into_bytes()));
            let new_contents = match existing {
                Some(overlay_id) => {
                    doc.objects.insert(overlay_id, stream);
                    None
                }
                None => {
                    let prefix_id =
                        doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
                    let overlay_id = doc.add_object(stream);
                    let mut parts = vec![Object::Reference(prefix_id)];
                    match contents {
                        Some(Object::Array(items)) => parts.extend(items),
                        Some(other) => parts.push(other),
                        None => {}
                    }
                    parts.push(Object::Reference(overlay_id));
                    Some((overlay_id, parts))
                }
            };

            let page = doc
                .get_object_mut(*page_id)
                .and_then(Object::as_dict_mut)
                .map_err(ToolError::pdf)?;
            page.set("Resources", Object::Dictionary(resources));
            if let Some((overlay_id, parts)) = new_contents {
                page.set("Contents", Object::Array(parts));
                page.set(OVERLAY_KEY, Object::Reference(overlay_id));
            }
        }

        save(&mut doc, pdf)?;
        debug!(pdf = %pdf.display(), pages = pages.len(), "overlay applied");
        Ok(())
    }

    fn embed_metadata(&self, pdf: &Path, metadata: &DocumentMetadata) -> Result<(), ToolError> {
        let mut doc = load(pdf)?;
        let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
            Ok(id) => id,
            Err(_) => {
                let inline = doc
                    .trailer
                    .get(b"Info")
                    .ok()
                    .and_then(|o| o.as_dict().ok())
                    .cloned()
                    .unwrap_or_default();
                let id = doc.add_object(inline);
                doc.trailer.set("Info", Object::Reference(id));
                id
            }
        };
        let info = doc
            .get_object_mut(info_id)
            .and_then(Object::as_dict_mut)
            .map_err(ToolError::pdf)?;
        for (key, value) in metadata.iter() {
            info.set(key, text_string(value));
        }
        save(&mut doc, pdf)?;
        debug!(pdf = %pdf.display(), keys = metadata.len(), "metadata embedded");
        Ok(())
    }

    fn read_metadata(&self, pdf: &Path) -> Result<DocumentMetadata, ToolError> {
        let doc = load(pdf)?;
        let info = match doc.trailer.get(b"Info") {
            Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
            Ok(Object::Dictionary(d)) => Some(d),
            _ => None,
        };
        let Some(info) = info else {
            return Ok(DocumentMetadata::new());
        };
        Ok(info
            .iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Object::String(bytes, _) => decode_text(bytes),
                    Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
                    _ => return None,
                };
                Some((String::from_utf8_lossy(key).into_owned(), value))
            })
            .collect())
    }

    fn write_encrypted(
        &self,
        input: &Path,
        output: &Path,
        password: &str,
    ) -> Result<(), ToolError> {
        let bytes = fs::read(input)?;
        let mut doc = Document::load_mem(&bytes).map_err(ToolError::pdf)?;
        if doc.trailer.get(b"ID").is_err() {
            let digest = blake3::hash(&bytes);
            let id = digest.as_bytes()[..16].to_vec();
            doc.trailer.set(
                "ID",
                Object::Array(vec![
                    Object::String(id.clone(), StringFormat::Hexadecimal),
                    Object::String(id, StringFormat::Hexadecimal),
                ]),
            );
        }

        let mut rng = rand::thread_rng();
        let mut owner = [0u8; 16];
        rng.fill_bytes(&mut owner);
        let owner = hex::encode(owner);
        let mut file_key = [0u8; NATIVE_KEY_LENGTH / 8];
        rng.fill_bytes(&mut file_key);
        let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
        let version = EncryptionVersion::V5 {
            encrypt_metadata: true,
            crypt_filters: BTreeMap::from([(CRYPT_FILTER.to_vec(), filter)]),
            file_encryption_key: &file_key,
            stream_filter: CRYPT_FILTER.to_vec(),
            string_filter: CRYPT_FILTER.to_vec(),
            owner_password: &owner,
            user_password: password,
            permissions: Permissions::all(),
        };
        let state = EncryptionState::try_from(version).map_err(ToolError::pdf)?;
        doc.encrypt(&state).map_err(ToolError::pdf)?;
        save(&mut doc, output)?;
        info!(output = %output.display(), bits = NATIVE_KEY_LENGTH, "protected natively");
        Ok(())
    }

    fn write_decrypted(
        &self,
        input: &Path,
        output: &Path,
        password: &str,
    ) -> Result<(), ToolError> {
        let mut doc = load(input)?;
        if !doc.is_encrypted() {
            return Err(ToolError::Pdf(format!(
                "{} is not password protected",
                input.display()
            )));
        }
        doc.decrypt(password).map_err(|_| {
            ToolError::Pdf(format!("password does not open {}", input.display()))
        })?;
        save(&mut doc, output)?;
        info!(output = %output.display(), "protection removed");
        Ok(())
    }

    fn is_password_gated(&self, pdf: &Path, password: &str) -> Result<bool, ToolError> {
        let bytes = fs::read(pdf)?;
        // A file that does not parse protects nothing.
        let Ok(doc) = Document::load_mem(&bytes) else {
            return Ok(false);
        };
        if !doc.is_encrypted() {
            return Ok(false);
        }
        Ok(doc.authenticate_password("").is_err() && doc.authenticate_password(password).is_ok())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load(pdf: &Path) -> Result<Document, ToolError> {
    let bytes = fs::read(pdf)?;
    Document::load_mem(&bytes).map_err(ToolError::pdf)
}

/// Save through a temp file in the target directory and rename over it.
fn save(doc: &mut Document, path: &Path) -> Result<(), ToolError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    doc.save_to(&mut tmp).map_err(ToolError::pdf)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ToolError::Io(e.error))?;
    Ok(())
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// The page's MediaBox, following `Parent` links for inherited values.
/// Falls back to A4 when no box is present.
fn media_box(doc: &Document, page_id: ObjectId) -> PageGeometry {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        let rect = dict
            .get(b"MediaBox")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .map(|items| items.iter().filter_map(number).collect::<Vec<_>>());
        if let Some([x0, y0, x1, y1]) = rect.as_deref() {
            return PageGeometry::new((x1 - x0).abs(), (y1 - y0).abs());
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    PageGeometry::A4
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    resolve(doc, obj).as_dict().ok().cloned()
}

/// Effective resources of a page (own or inherited), copied and extended
/// with the overlay font and graphics state. Copying keeps shared resource
/// dictionaries of other pages untouched.
fn page_resources(doc: &Document, page_id: ObjectId, font: ObjectId, gstate: ObjectId) -> Dictionary {
    let mut resources = Dictionary::new();
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        if let Some(found) = dict.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o)) {
            resources = found;
            break;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }

    let mut fonts = resources
        .get(b"Font")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .unwrap_or_default();
    fonts.set(FONT_NAME, Object::Reference(font));
    resources.set("Font", Object::Dictionary(fonts));

    let mut states = resources
        .get(b"ExtGState")
        .ok()
        .and_then(|o| resolve_dict(doc, o))
        .unwrap_or_default();
    states.set(GSTATE_NAME, Object::Reference(gstate));
    resources.set("ExtGState", Object::Dictionary(states));
    resources
}

/// Content stream drawing every placement, plus the invisible hidden text.
/// Starts with `Q` to close the `q` prefixed before the page's own content.
fn overlay_content(overlay: &OverlaySpec, placements: &[Placement]) -> String {
    let mut out = String::from("Q\nq\n");
    let text = pdf_literal(&overlay.text);
    let (sin, cos) = overlay.angle.to_radians().sin_cos();
    let width = overlay.text.chars().count() as f64 * AVG_GLYPH_WIDTH * overlay.font_size;

    if overlay.alpha > 0.0 {
        let _ = writeln!(out, "/{GSTATE_NAME} gs {WATERMARK_GRAY:.2} g");
        for p in placements {
            // Shift the baseline origin so the rotated box is centred on p.
            let (dx, dy) = (-width / 2.0, -overlay.font_size * 0.35);
            let x = p.x + dx * cos - dy * sin;
            let y = p.y + dx * sin + dy * cos;
            let _ = writeln!(
                out,
                "BT /{FONT_NAME} {:.2} Tf {cos:.4} {sin:.4} {:.4} {cos:.4} {x:.2} {y:.2} Tm ({text}) Tj ET",
                overlay.font_size, -sin
            );
        }
    }
    if let Some(hidden) = &overlay.hidden_text {
        let _ = writeln!(
            out,
            "BT /{FONT_NAME} 1 Tf 3 Tr 2 2 Td ({}) Tj ET",
            pdf_literal(hidden)
        );
    }
    out.push_str("Q\n");
    out
}

/// Escape text for a PDF literal string. Characters outside Latin-1 become
/// `?` since the overlay font uses a single-byte encoding.
fn pdf_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 => out.push(' '),
            c if c.is_ascii() => out.push(c),
            c if (c as u32) <= 0xFF => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            _ => out.push('?'),
        }
    }
    out
}

/// A document information text string: literal for ASCII, UTF-16BE with a
/// byte order mark otherwise.
fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        Object::string_literal(value)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in value.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Font and graphics state installed by an earlier overlay, found through
/// the resources of the first page that carries one.
fn installed_resources(doc: &Document, pages: &[ObjectId]) -> Option<(ObjectId, ObjectId)> {
    pages.iter().find_map(|&page_id| {
        let page = doc.get_dictionary(page_id).ok()?;
        page.get(OVERLAY_KEY.as_bytes()).ok()?;
        let resources = resolve_dict(doc, page.get(b"Resources").ok()?)?;
        let fonts = resolve_dict(doc, resources.get(b"Font").ok()?)?;
        let states = resolve_dict(doc, resources.get(b"ExtGState").ok()?)?;
        let font = fonts.get(FONT_NAME.as_bytes()).and_then(Object::as_reference).ok()?;
        let gstate = states.get(GSTATE_NAME.as_bytes()).and_then(Object::as_reference).ok()?;
        Some((font, gstate))
    })
}
