use std::fmt::{Display, Formatter};

/// Color format code carried by a video `MediaFormat`.
///
/// Codes follow the OMX / MediaCodec numbering used by hardware codecs, so a
/// device can hand back whatever it negotiated and still be logged by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    Monochrome,
    Rgb332,
    Rgb444,
    Argb4444,
    Argb1555,
    Rgb565,
    Bgr565,
    Rgb888,
    Bgr888,
    Argb8888,
    Bgra8888,
    Yuv411Planar,
    Yuv411PackedPlanar,
    Yuv420Planar,
    Yuv420PackedPlanar,
    Yuv420SemiPlanar,
    Yuv420PackedSemiPlanar,
    Yuv422Planar,
    Yuv422PackedPlanar,
    Yuv422SemiPlanar,
    Yuv422PackedSemiPlanar,
    YCbYCr,
    YCrYCb,
    CbYCrY,
    CrYCbY,
    Yuv444Interleaved,
    RawBayer8,
    RawBayer10,
    L8,
    L16,
    L32,
    Surface,
    Yuv420Flexible,
    QcomYuv420SemiPlanar,
    TiYuv420PackedSemiPlanar,
    QcomYuv420PackedSemiPlanar64x32Tile2m8ka,
    Unknown(u32),
}

const TABLE: &[(u32, ColorFormat)] = &[
    (1, ColorFormat::Monochrome),
    (2, ColorFormat::Rgb332),
    (3, ColorFormat::Rgb444),
    (4, ColorFormat::Argb4444),
    (5, ColorFormat::Argb1555),
    (6, ColorFormat::Rgb565),
    (7, ColorFormat::Bgr565),
    (11, ColorFormat::Rgb888),
    (12, ColorFormat::Bgr888),
    (16, ColorFormat::Argb8888),
    (15, ColorFormat::Bgra8888),
    (17, ColorFormat::Yuv411Planar),
    (18, ColorFormat::Yuv411PackedPlanar),
    (19, ColorFormat::Yuv420Planar),
    (20, ColorFormat::Yuv420PackedPlanar),
    (21, ColorFormat::Yuv420SemiPlanar),
    (22, ColorFormat::Yuv422Planar),
    (23, ColorFormat::Yuv422PackedPlanar),
    (24, ColorFormat::Yuv422SemiPlanar),
    (25, ColorFormat::YCbYCr),
    (26, ColorFormat::YCrYCb),
    (27, ColorFormat::CbYCrY),
    (28, ColorFormat::CrYCbY),
    (29, ColorFormat::Yuv444Interleaved),
    (30, ColorFormat::RawBayer8),
    (31, ColorFormat::RawBayer10),
    (35, ColorFormat::L8),
    (36, ColorFormat::L16),
    (38, ColorFormat::L32),
    (39, ColorFormat::Yuv420PackedSemiPlanar),
    (40, ColorFormat::Yuv422PackedSemiPlanar),
    (0x7F00_0789, ColorFormat::Surface),
    (0x7F42_0888, ColorFormat::Yuv420Flexible),
    (0x7FA3_0C00, ColorFormat::QcomYuv420SemiPlanar),
    (0x7F00_0100, ColorFormat::TiYuv420PackedSemiPlanar),
    (0x7FA3_0C03, ColorFormat::QcomYuv420PackedSemiPlanar64x32Tile2m8ka),
];

impl ColorFormat {
    pub fn from_code(code: u32) -> Self {
        TABLE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, f)| *f)
            .unwrap_or(ColorFormat::Unknown(code))
    }

    pub fn code(&self) -> u32 {
        match self {
            ColorFormat::Unknown(code) => *code,
            other => TABLE
                .iter()
                .find(|(_, f)| f == other)
                .map(|(c, _)| *c)
                .unwrap_or_default(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorFormat::Monochrome => "COLOR_FormatMonochrome",
            ColorFormat::Rgb332 => "COLOR_Format8bitRGB332",
            ColorFormat::Rgb444 => "COLOR_Format12bitRGB444",
            ColorFormat::Argb4444 => "COLOR_Format16bitARGB4444",
            ColorFormat::Argb1555 => "COLOR_Format16bitARGB1555",
            ColorFormat::Rgb565 => "COLOR_Format16bitRGB565",
            ColorFormat::Bgr565 => "COLOR_Format16bitBGR565",
            ColorFormat::Rgb888 => "COLOR_Format24bitRGB888",
            ColorFormat::Bgr888 => "COLOR_Format24bitBGR888",
            ColorFormat::Argb8888 => "COLOR_Format32bitARGB8888",
            ColorFormat::Bgra8888 => "COLOR_Format32bitBGRA8888",
            ColorFormat::Yuv411Planar => "COLOR_FormatYUV411Planar",
            ColorFormat::Yuv411PackedPlanar => "COLOR_FormatYUV411PackedPlanar",
            ColorFormat::Yuv420Planar => "COLOR_FormatYUV420Planar",
            ColorFormat::Yuv420PackedPlanar => "COLOR_FormatYUV420PackedPlanar",
            ColorFormat::Yuv420SemiPlanar => "COLOR_FormatYUV420SemiPlanar",
            ColorFormat::Yuv420PackedSemiPlanar => "COLOR_FormatYUV420PackedSemiPlanar",
            ColorFormat::Yuv422Planar => "COLOR_FormatYUV422Planar",
            ColorFormat::Yuv422PackedPlanar => "COLOR_FormatYUV422PackedPlanar",
            ColorFormat::Yuv422SemiPlanar => "COLOR_FormatYUV422SemiPlanar",
            ColorFormat::Yuv422PackedSemiPlanar => "COLOR_FormatYUV422PackedSemiPlanar",
            ColorFormat::YCbYCr => "COLOR_FormatYCbYCr",
            ColorFormat::YCrYCb => "COLOR_FormatYCrYCb",
            ColorFormat::CbYCrY => "COLOR_FormatCbYCrY",
            ColorFormat::CrYCbY => "COLOR_FormatCrYCbY",
            ColorFormat::Yuv444Interleaved => "COLOR_FormatYUV444Interleaved",
            ColorFormat::RawBayer8 => "COLOR_FormatRawBayer8bit",
            ColorFormat::RawBayer10 => "COLOR_FormatRawBayer10bit",
            ColorFormat::L8 => "COLOR_FormatL8",
            ColorFormat::L16 => "COLOR_FormatL16",
            ColorFormat::L32 => "COLOR_FormatL32",
            ColorFormat::Surface => "COLOR_FormatSurface",
            ColorFormat::Yuv420Flexible => "COLOR_FormatYUV420Flexible",
            ColorFormat::QcomYuv420SemiPlanar => "COLOR_QCOM_FormatYUV420SemiPlanar",
            ColorFormat::TiYuv420PackedSemiPlanar => "COLOR_TI_FormatYUV420PackedSemiPlanar",
            ColorFormat::QcomYuv420PackedSemiPlanar64x32Tile2m8ka => {
                "QOMX_COLOR_FormatYUV420PackedSemiPlanar64x32Tile2m8ka"
            }
            ColorFormat::Unknown(_) => "unknown",
        }
    }

    /// Bytes needed for one `width` x `height` frame, when the layout is known.
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            ColorFormat::Yuv420Planar
            | ColorFormat::Yuv420PackedPlanar
            | ColorFormat::Yuv420SemiPlanar
            | ColorFormat::Yuv420PackedSemiPlanar
            | ColorFormat::Yuv420Flexible
            | ColorFormat::QcomYuv420SemiPlanar
            | ColorFormat::TiYuv420PackedSemiPlanar => Some(pixels + pixels / 2),
            ColorFormat::Yuv422Planar
            | ColorFormat::Yuv422PackedPlanar
            | ColorFormat::Yuv422SemiPlanar
            | ColorFormat::Yuv422PackedSemiPlanar
            | ColorFormat::YCbYCr
            | ColorFormat::YCrYCb
            | ColorFormat::CbYCrY
            | ColorFormat::CrYCbY
            | ColorFormat::Rgb565
            | ColorFormat::Bgr565
            | ColorFormat::L16 => Some(pixels * 2),
            ColorFormat::Rgb888 | ColorFormat::Bgr888 | ColorFormat::Yuv444Interleaved => {
                Some(pixels * 3)
            }
            ColorFormat::Argb8888 | ColorFormat::Bgra8888 | ColorFormat::L32 => Some(pixels * 4),
            ColorFormat::Monochrome | ColorFormat::L8 | ColorFormat::RawBayer8 => Some(pixels),
            _ => None,
        }
    }
}

impl Display for ColorFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorFormat::Unknown(code) => write!(f, "unknown({:#x})", code),
            other => write!(f, "{}({:#x})", other.name(), other.code()),
        }
    }
}
