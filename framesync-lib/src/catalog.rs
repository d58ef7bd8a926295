//! Transfer frame format definitions.
//!
//! A [FormatCatalog] is built once from a list of [FrameFormat]s, validated, and never
//! mutated afterwards. It also carries the lookup values the synchronizer needs on every
//! byte it examines, such as the 32-bit quick ASM for each format.
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::prelude::*;

/// Default CCSDS attached sync marker.
pub const ASM: [u8; 4] = [0x1a, 0xcf, 0xfc, 0x1d];

/// Shortest ASM supported. The quick check compares the first 4 ASM bytes.
pub const MIN_ASM_LEN: usize = 4;

/// Channel coding applied to a frame on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EncodingType {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "UNENCODED"))]
    Unencoded,
    #[cfg_attr(feature = "serde", serde(rename = "REED_SOLOMON"))]
    ReedSolomon,
    #[cfg_attr(feature = "serde", serde(rename = "TURBO_1_2"))]
    Turbo1_2,
    #[cfg_attr(feature = "serde", serde(rename = "TURBO_1_3"))]
    Turbo1_3,
    #[cfg_attr(feature = "serde", serde(rename = "TURBO_1_4"))]
    Turbo1_4,
    #[cfg_attr(feature = "serde", serde(rename = "TURBO_1_6"))]
    Turbo1_6,
    #[cfg_attr(feature = "serde", serde(rename = "ANY_TURBO"))]
    AnyTurbo,
    #[cfg_attr(feature = "serde", serde(rename = "BYPASS"))]
    Bypass,
}

/// Layout of the primary header following the ASM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HeaderLayout {
    /// CCSDS TM transfer frame (132.0-B), version number 1.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "CCSDS_TM_1"))]
    Tm,
    /// CCSDS AOS transfer frame (732.0-B), version number 2.
    #[cfg_attr(feature = "serde", serde(rename = "CCSDS_AOS_2"))]
    Aos,
}

impl HeaderLayout {
    /// Length of the primary header for this layout.
    #[must_use]
    pub fn primary_header_len(&self) -> usize {
        6
    }
}

/// Frame error control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChecksumKind {
    /// CRC-16-CCITT as used for the CCSDS frame error control field.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "CRC16"))]
    Crc16,
    #[cfg_attr(feature = "serde", serde(rename = "CRC32"))]
    Crc32,
}

impl ChecksumKind {
    /// Number of bytes the checksum occupies in the frame.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            ChecksumKind::Crc16 => 2,
            ChecksumKind::Crc32 => 4,
        }
    }
}

/// Definition of a single transfer frame format.
///
/// Layout of a CADU for a format:
/// ```text
/// | asm | header | data area | ocf | error control | (coding, unused) |
/// |<-------------------------- cadu_size ------------------------------>|
/// ```
///
/// # Example
/// ```
/// use framesync::{FrameFormat, ASM};
///
/// let format = FrameFormat::builder()
///     .name("TM_1115")
///     .asm(ASM)
///     .cadu_size(1119)
///     .header_size(6)
///     .data_area_size(1105)
///     .ocf_size(4)
///     .build();
/// assert_eq!(format.asm_len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameFormat {
    #[builder(setter(into))]
    pub name: String,
    /// Attached sync marker, or `None` if frames of this type arrive without one.
    #[builder(default, setter(into, strip_option))]
    #[cfg_attr(feature = "serde", serde(default, with = "serde_bytes"))]
    pub asm: Option<Vec<u8>>,
    /// Total size of the frame on the wire, including ASM.
    pub cadu_size: usize,
    /// Total header size, i.e., primary, secondary, and any data field header.
    pub header_size: usize,
    pub data_area_size: usize,
    /// Operational control field size.
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub ocf_size: usize,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub has_error_control: bool,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub encoding: EncodingType,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub layout: HeaderLayout,
    #[builder(default)]
    #[cfg_attr(feature = "serde", serde(default))]
    pub checksum: ChecksumKind,
    #[builder(default, setter(into, strip_option))]
    #[cfg_attr(feature = "serde", serde(default))]
    pub description: Option<String>,
}

impl FrameFormat {
    #[must_use]
    pub fn arrives_with_asm(&self) -> bool {
        self.asm.is_some()
    }

    #[must_use]
    pub fn asm_len(&self) -> usize {
        self.asm.as_ref().map_or(0, Vec::len)
    }

    /// Size of the frame error control field, 0 if the format has none.
    #[must_use]
    pub fn error_control_size(&self) -> usize {
        if self.has_error_control {
            self.checksum.size()
        } else {
            0
        }
    }

    /// Header size including the ASM.
    #[must_use]
    pub fn total_header_len(&self) -> usize {
        self.asm_len() + self.header_size
    }

    /// Offset of the stored frame checksum relative to the start of the CADU.
    #[must_use]
    pub fn checksum_offset(&self) -> usize {
        self.asm_len() + self.header_size + self.data_area_size + self.ocf_size
    }

    /// Check the format is internally consistent.
    ///
    /// # Errors
    /// [Error::InvalidFormat] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidFormat {
            name: self.name.clone(),
            reason,
        };
        if self.name.is_empty() {
            return Err(invalid("name cannot be empty".to_string()));
        }
        if self.cadu_size == 0 {
            return Err(invalid("cadu size cannot be 0".to_string()));
        }
        if let Some(asm) = &self.asm {
            if asm.len() < MIN_ASM_LEN {
                return Err(invalid(format!(
                    "asm length {} is less than the minimum {MIN_ASM_LEN}",
                    asm.len()
                )));
            }
        }
        if self.header_size < self.layout.primary_header_len() {
            return Err(invalid(format!(
                "header size {} too small for {:?} header",
                self.header_size, self.layout
            )));
        }
        let layout_len = self.checksum_offset() + self.error_control_size();
        if layout_len > self.cadu_size {
            return Err(invalid(format!(
                "asm, header, data, ocf, and error control ({layout_len}) exceed cadu size {}",
                self.cadu_size
            )));
        }
        Ok(())
    }
}

/// Supplies frame format definitions, e.g., from a frame dictionary.
pub trait FormatProvider {
    /// # Errors
    /// If the definitions cannot be loaded.
    fn formats(&self) -> Result<Vec<FrameFormat>>;
}

impl FormatProvider for Vec<FrameFormat> {
    fn formats(&self) -> Result<Vec<FrameFormat>> {
        Ok(self.clone())
    }
}

impl FormatProvider for [FrameFormat] {
    fn formats(&self) -> Result<Vec<FrameFormat>> {
        Ok(self.to_vec())
    }
}

/// Reads frame formats from a JSON file containing an array of [FrameFormat]s.
///
/// ```json
/// [
///   {
///     "name": "AOS_1024",
///     "asm": [26, 207, 252, 29],
///     "cadu_size": 1024,
///     "header_size": 8,
///     "data_area_size": 884,
///     "layout": "CCSDS_AOS_2",
///     "encoding": "REED_SOLOMON"
///   }
/// ]
/// ```
#[cfg(feature = "serde")]
#[derive(Debug, Clone)]
pub struct JsonFormatFile {
    path: std::path::PathBuf,
}

#[cfg(feature = "serde")]
impl JsonFormatFile {
    pub fn new<P: Into<std::path::PathBuf>>(path: P) -> Self {
        JsonFormatFile { path: path.into() }
    }
}

#[cfg(feature = "serde")]
impl FormatProvider for JsonFormatFile {
    fn formats(&self) -> Result<Vec<FrameFormat>> {
        let file = std::io::BufReader::new(std::fs::File::open(&self.path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

/// Immutable, validated set of frame formats in priority order.
#[derive(Debug, Clone)]
pub struct FormatCatalog {
    formats: Vec<Arc<FrameFormat>>,
    // First 4 bytes of each format's ASM as a u32, None for formats without an ASM
    quick_asms: Vec<Option<u32>>,
    max_frame_len: usize,
    max_asm_len: usize,
}

impl FormatCatalog {
    /// Create a catalog from `formats`. Catalog order is the order formats are tried in.
    ///
    /// # Errors
    /// [Error::InvalidCatalog] if there are no formats, names are duplicated, or no format
    /// has an ASM, and [Error::InvalidFormat] for the first invalid format.
    pub fn new(formats: Vec<FrameFormat>) -> Result<Self> {
        if formats.is_empty() {
            return Err(Error::InvalidCatalog("no frame formats defined".to_string()));
        }
        let mut names = HashSet::new();
        for format in &formats {
            format.validate()?;
            if !names.insert(format.name.as_str()) {
                return Err(Error::InvalidCatalog(format!(
                    "duplicate frame format name {}",
                    format.name
                )));
            }
        }
        if !formats.iter().any(FrameFormat::arrives_with_asm) {
            return Err(Error::InvalidCatalog(
                "at least one frame format must have an ASM".to_string(),
            ));
        }

        let quick_asms = formats
            .iter()
            .map(|f| {
                f.asm
                    .as_ref()
                    .map(|asm| u32::from_be_bytes([asm[0], asm[1], asm[2], asm[3]]))
            })
            .collect();
        let max_frame_len = formats.iter().map(|f| f.cadu_size).max().unwrap_or(0);
        let max_asm_len = formats.iter().map(FrameFormat::asm_len).max().unwrap_or(0);

        Ok(FormatCatalog {
            formats: formats.into_iter().map(Arc::new).collect(),
            quick_asms,
            max_frame_len,
            max_asm_len,
        })
    }

    /// Load and validate formats from `provider`.
    ///
    /// # Errors
    /// Any error from the provider, or as documented for [FormatCatalog::new].
    pub fn from_provider<P: FormatProvider + ?Sized>(provider: &P) -> Result<Self> {
        FormatCatalog::new(provider.formats()?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.formats.len()
    }

    /// Always false for a constructed catalog.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// # Panics
    /// If `idx` is not a valid format index.
    #[must_use]
    pub fn get(&self, idx: usize) -> &Arc<FrameFormat> {
        &self.formats[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FrameFormat>> {
        self.formats.iter()
    }

    /// Index of the format named `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.formats.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn quick_asm(&self, idx: usize) -> Option<u32> {
        self.quick_asms[idx]
    }

    /// Largest CADU size of all formats.
    #[must_use]
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Longest ASM of all formats.
    #[must_use]
    pub fn max_asm_len(&self) -> usize {
        self.max_asm_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tm(name: &str, cadu_size: usize) -> FrameFormat {
        FrameFormat::builder()
            .name(name)
            .asm(ASM)
            .cadu_size(cadu_size)
            .header_size(6)
            .data_area_size(cadu_size - 12)
            .has_error_control(true)
            .build()
    }

    #[test]
    fn catalog_computes_maximums() {
        let long_asm = FrameFormat::builder()
            .name("long")
            .asm(vec![0x03, 0x47, 0x76, 0xc7, 0x27, 0x28, 0x95, 0xb0])
            .cadu_size(64)
            .header_size(6)
            .data_area_size(40)
            .build();
        let catalog = FormatCatalog::new(vec![tm("a", 100), tm("b", 200), long_asm]).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.max_frame_len(), 200);
        assert_eq!(catalog.max_asm_len(), 8);
        assert_eq!(catalog.quick_asm(0), Some(0x1acf_fc1d));
        assert_eq!(catalog.quick_asm(2), Some(0x0347_76c7));
        assert_eq!(catalog.position("b"), Some(1));
    }

    #[test]
    fn empty_catalog_is_err() {
        let zult = FormatCatalog::new(vec![]);
        assert!(matches!(zult, Err(Error::InvalidCatalog(_))));
    }

    #[test]
    fn duplicate_names_is_err() {
        let zult = FormatCatalog::new(vec![tm("a", 100), tm("a", 200)]);
        assert!(matches!(zult, Err(Error::InvalidCatalog(_))));
    }

    #[test]
    fn catalog_without_any_asm_is_err() {
        let mut format = tm("a", 100);
        format.asm = None;
        let zult = FormatCatalog::new(vec![format]);
        assert!(matches!(zult, Err(Error::InvalidCatalog(_))));
    }

    #[test]
    fn short_asm_is_err() {
        let mut format = tm("a", 100);
        format.asm = Some(vec![0x1a, 0xcf]);
        assert!(matches!(
            format.validate(),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn layout_larger_than_cadu_is_err() {
        let mut format = tm("a", 100);
        format.ocf_size = 4;
        assert!(format.validate().is_err());
    }

    #[test]
    fn checksum_offset_follows_ocf() {
        let mut format = tm("a", 100);
        format.data_area_size = 84;
        format.ocf_size = 4;
        assert_eq!(format.checksum_offset(), 98);
        assert_eq!(format.error_control_size(), 2);
        format.validate().unwrap();
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_file_provider() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "AOS_1024", "asm": [26, 207, 252, 29], "cadu_size": 1024,
                "header_size": 8, "data_area_size": 884, "layout": "CCSDS_AOS_2",
                "encoding": "REED_SOLOMON"}}]"#
        )
        .unwrap();

        let catalog = FormatCatalog::from_provider(&JsonFormatFile::new(file.path())).unwrap();
        let format = catalog.get(0);
        assert_eq!(format.name, "AOS_1024");
        assert_eq!(format.asm.as_deref(), Some(&ASM[..]));
        assert_eq!(format.layout, HeaderLayout::Aos);
        assert_eq!(format.encoding, EncodingType::ReedSolomon);
        assert!(!format.has_error_control);
    }
}
