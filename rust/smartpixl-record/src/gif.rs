// smartpixl-record: Fixed pixel response body

/// 1x1 transparent GIF89a returned for every pixel request, valid or not.
/// The body is exactly 43 bytes and never varies.
pub const TRANSPARENT_GIF: [u8; 43] = [
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, // "GIF89a"
    0x01, 0x00, 0x01, 0x00, // 1x1 logical screen
    0x80, 0x00, 0x00, // global colour table, 2 entries
    0x00, 0x00, 0x00, // colour 0: black
    0xff, 0xff, 0xff, // colour 1: white
    0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, // GCE: colour 0 transparent
    0x2c, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, // image descriptor
    0x02, 0x02, 0x44, 0x01, 0x00, // LZW-coded pixel data
    0x3b, // trailer
];
