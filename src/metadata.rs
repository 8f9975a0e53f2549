//! Interpreted BAG metadata and the provider that parses it.
//!
//! The XML metadata block is owned by an external provider; the engine only
//! needs the handful of interpreted values below (grid shape, georeferencing,
//! CRS descriptions). [EmbeddedXmlProvider] round-trips the XML this crate
//! itself emits; embedders with full ISO metadata plug in their own
//! [MetadataProvider] implementation.

use crate::{Error, Result};

/// The interpreted georeferencing and identification metadata of a BAG.
#[derive(Clone, Debug, PartialEq)]
pub struct Metadata {
    rows: u32,
    cols: u32,
    origin_x: f64,
    origin_y: f64,
    spacing_x: f64,
    spacing_y: f64,
    horizontal_crs: String,
    vertical_crs: String,
    xml: Option<Vec<u8>>,
}

impl Metadata {
    /// Creates metadata for a grid with the given shape and georeferencing.
    ///
    /// # Examples
    ///
    /// ```
    /// # use bag::Metadata;
    /// let metadata = Metadata::new(3, 4, (0., 0.), (1., 1.));
    /// assert_eq!((0., 0., 3., 2.), metadata.projected_cover());
    /// ```
    pub fn new(rows: u32, cols: u32, origin: (f64, f64), spacing: (f64, f64)) -> Metadata {
        Metadata {
            rows,
            cols,
            origin_x: origin.0,
            origin_y: origin.1,
            spacing_x: spacing.0,
            spacing_y: spacing.1,
            horizontal_crs: String::new(),
            vertical_crs: String::new(),
            xml: None,
        }
    }

    /// Sets the horizontal CRS description.
    pub fn with_horizontal_crs(mut self, crs: &str) -> Metadata {
        self.horizontal_crs = crs.to_string();
        self
    }

    /// Sets the vertical CRS description.
    pub fn with_vertical_crs(mut self, crs: &str) -> Metadata {
        self.vertical_crs = crs.to_string();
        self
    }

    /// Attaches a pre-serialized XML block, written verbatim on create.
    pub fn with_xml(mut self, xml: Vec<u8>) -> Metadata {
        self.xml = Some(xml);
        self
    }

    /// Returns the grid dimensions `(rows, cols)`.
    pub fn dims(&self) -> (u32, u32) {
        (self.rows, self.cols)
    }

    /// Returns the grid origin `(x0, y0)`.
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_x, self.origin_y)
    }

    /// Returns the node spacing `(dx, dy)`.
    pub fn spacing(&self) -> (f64, f64) {
        (self.spacing_x, self.spacing_y)
    }

    /// Returns the horizontal CRS description.
    pub fn horizontal_crs(&self) -> &str {
        &self.horizontal_crs
    }

    /// Returns the vertical CRS description.
    pub fn vertical_crs(&self) -> &str {
        &self.vertical_crs
    }

    /// Returns the node-centered projected cover `(llx, lly, urx, ury)`.
    pub fn projected_cover(&self) -> (f64, f64, f64, f64) {
        (
            self.origin_x,
            self.origin_y,
            self.origin_x + f64::from(self.cols.saturating_sub(1)) * self.spacing_x,
            self.origin_y + f64::from(self.rows.saturating_sub(1)) * self.spacing_y,
        )
    }

    /// Serializes this metadata as the XML written to `/BAG_root/metadata`.
    ///
    /// A pre-attached XML block is returned verbatim; otherwise the engine's
    /// own template is emitted, which [EmbeddedXmlProvider] can parse back.
    pub fn to_xml(&self) -> Vec<u8> {
        if let Some(xml) = &self.xml {
            return xml.clone();
        }
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<bag:Metadata xmlns:bag=\"http://www.opennavsurf.org/schema/bag\">\n");
        push_element(&mut out, "rows", &self.rows.to_string());
        push_element(&mut out, "cols", &self.cols.to_string());
        push_element(&mut out, "originX", &format_f64(self.origin_x));
        push_element(&mut out, "originY", &format_f64(self.origin_y));
        push_element(&mut out, "spacingX", &format_f64(self.spacing_x));
        push_element(&mut out, "spacingY", &format_f64(self.spacing_y));
        push_element(&mut out, "horizontalCrs", &self.horizontal_crs);
        push_element(&mut out, "verticalCrs", &self.vertical_crs);
        out.push_str("</bag:Metadata>\n");
        out.into_bytes()
    }
}

fn format_f64(value: f64) -> String {
    // `{}` prints integral floats without a fraction; keep one so the
    // element always reads as a float.
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn push_element(out: &mut String, tag: &str, text: &str) {
    out.push_str("  <bag:");
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(text));
    out.push_str("</bag:");
    out.push_str(tag);
    out.push_str(">\n");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parses the file's XML metadata block into interpreted [Metadata].
pub trait MetadataProvider {
    /// Parses the raw bytes of `/BAG_root/metadata`.
    fn parse(&self, xml: &[u8]) -> Result<Metadata>;
}

/// A provider for the XML template this crate emits.
///
/// It scans for the engine's own elements and ignores everything else, so
/// files created by this crate always reopen without an external parser.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbeddedXmlProvider;

impl MetadataProvider for EmbeddedXmlProvider {
    fn parse(&self, xml: &[u8]) -> Result<Metadata> {
        let text = std::str::from_utf8(xml)
            .map_err(|_| Error::CorruptContainer("metadata is not utf-8".to_string()))?;
        let rows = parse_element(text, "rows")?;
        let cols = parse_element(text, "cols")?;
        let origin_x = parse_element(text, "originX")?;
        let origin_y = parse_element(text, "originY")?;
        let spacing_x = parse_element(text, "spacingX")?;
        let spacing_y = parse_element(text, "spacingY")?;
        let mut metadata = Metadata::new(rows, cols, (origin_x, origin_y), (spacing_x, spacing_y));
        if let Some(crs) = element_text(text, "horizontalCrs") {
            metadata.horizontal_crs = unescape(crs);
        }
        if let Some(crs) = element_text(text, "verticalCrs") {
            metadata.vertical_crs = unescape(crs);
        }
        metadata.xml = Some(xml.to_vec());
        Ok(metadata)
    }
}

fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<bag:{tag}>");
    let close = format!("</bag:{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

fn parse_element<T: std::str::FromStr>(xml: &str, tag: &str) -> Result<T> {
    element_text(xml, tag)
        .and_then(|text| text.trim().parse().ok())
        .ok_or_else(|| Error::CorruptContainer(format!("metadata element {tag} is unusable")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_round_trip() {
        let metadata = Metadata::new(120, 240, (500_000.5, 4_000_000.25), (2., 2.))
            .with_horizontal_crs("PROJCS[\"UTM zone 19N\"]")
            .with_vertical_crs("VERT_CS[\"MLLW\"]");
        let xml = metadata.to_xml();
        let parsed = EmbeddedXmlProvider.parse(&xml).unwrap();
        assert_eq!(metadata.dims(), parsed.dims());
        assert_eq!(metadata.origin(), parsed.origin());
        assert_eq!(metadata.spacing(), parsed.spacing());
        assert_eq!(metadata.horizontal_crs(), parsed.horizontal_crs());
        assert_eq!(metadata.vertical_crs(), parsed.vertical_crs());
    }

    #[test]
    fn crs_with_markup_characters_survives() {
        let metadata = Metadata::new(1, 1, (0., 0.), (1., 1.)).with_horizontal_crs("a<b>&c");
        let parsed = EmbeddedXmlProvider.parse(&metadata.to_xml()).unwrap();
        assert_eq!("a<b>&c", parsed.horizontal_crs());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(EmbeddedXmlProvider.parse(b"<not-bag/>").is_err());
    }

    #[test]
    fn attached_xml_is_written_verbatim() {
        let metadata = Metadata::new(1, 1, (0., 0.), (1., 1.)).with_xml(b"<custom/>".to_vec());
        assert_eq!(b"<custom/>".to_vec(), metadata.to_xml());
    }
}
