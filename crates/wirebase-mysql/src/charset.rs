//! Character set and collation registry.
//!
//! MySQL identifies the connection character set with a numeric collation
//! id. This module maps collation ids to names and charsets (both ways),
//! picks the best collation for a client-side text encoding, and provides
//! the [`TextCodec`] the session uses to turn column bytes into strings.
//!
//! The tables are immutable and built once per process.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::protocol::ServerVersion;

/// `utf8mb4_general_ci`, the default connection collation.
pub const UTF8MB4_GENERAL_CI: u16 = 45;
/// `latin1_swedish_ci`, what pre-4.1 servers effectively speak.
pub const LATIN1_SWEDISH_CI: u16 = 8;
/// `binary`, used for all non-string data.
pub const BINARY: u16 = 63;
/// `utf8mb4_0900_ai_ci`, the MySQL 8 server default.
pub const UTF8MB4_0900_AI_CI: u16 = 255;

/// A MySQL character set.
#[derive(Debug, Clone)]
pub struct Charset {
    pub name: &'static str,
    /// Maximum bytes one character can occupy.
    pub max_bytes_per_char: u8,
    /// Preference when several charsets share an encoding (higher wins).
    pub priority: u8,
    pub aliases: &'static [&'static str],
    /// Client encoding labels this charset can transcode to.
    pub encodings: &'static [&'static str],
    /// First server version that knows the charset.
    pub min_version: ServerVersion,
}

impl Charset {
    pub fn is_multibyte(&self) -> bool {
        self.max_bytes_per_char > 1
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// Can this charset transcode to the client encoding label?
    pub fn maps_encoding(&self, encoding: &str) -> bool {
        self.encodings.iter().any(|e| e.eq_ignore_ascii_case(encoding))
    }
}

/// A MySQL collation.
#[derive(Debug, Clone)]
pub struct Collation {
    pub id: u16,
    pub name: String,
    pub charset: &'static str,
    /// 1 for the charset's default collation, 0 otherwise.
    pub priority: u8,
}

const V4_1: ServerVersion = ServerVersion::new(4, 1, 0);

const fn cs(
    name: &'static str,
    max_bytes_per_char: u8,
    priority: u8,
    aliases: &'static [&'static str],
    encodings: &'static [&'static str],
    min_version: ServerVersion,
) -> Charset {
    Charset {
        name,
        max_bytes_per_char,
        priority,
        aliases,
        encodings,
        min_version,
    }
}

fn charset_table() -> Vec<Charset> {
    vec![
        cs("big5", 2, 0, &[], &["Big5"], V4_1),
        cs("dec8", 1, 0, &[], &["DEC-MCS"], V4_1),
        cs("cp850", 1, 0, &[], &["IBM850"], V4_1),
        cs("hp8", 1, 0, &[], &["HP-ROMAN8"], V4_1),
        cs("koi8r", 1, 0, &[], &["KOI8-R"], V4_1),
        cs("latin1", 1, 1, &[], &["windows-1252", "ISO-8859-1", "latin1"], V4_1),
        cs("latin2", 1, 0, &[], &["ISO-8859-2"], V4_1),
        cs("swe7", 1, 0, &[], &["SWE7"], V4_1),
        cs("ascii", 1, 0, &[], &["US-ASCII", "ASCII"], V4_1),
        cs("ujis", 3, 0, &[], &["EUC-JP"], V4_1),
        cs("sjis", 2, 0, &[], &["Shift_JIS", "SJIS"], V4_1),
        cs("hebrew", 1, 0, &[], &["ISO-8859-8"], V4_1),
        cs("tis620", 1, 0, &[], &["TIS-620"], V4_1),
        cs("euckr", 2, 0, &[], &["EUC-KR"], V4_1),
        cs("koi8u", 1, 0, &[], &["KOI8-U"], V4_1),
        cs("gb2312", 2, 0, &[], &["GB2312"], V4_1),
        cs("greek", 1, 0, &[], &["ISO-8859-7"], V4_1),
        cs("cp1250", 1, 0, &[], &["windows-1250"], V4_1),
        cs("gbk", 2, 0, &[], &["GBK"], V4_1),
        cs("latin5", 1, 0, &[], &["ISO-8859-9"], V4_1),
        cs("armscii8", 1, 0, &[], &["ARMSCII-8"], V4_1),
        cs("utf8", 3, 0, &["utf8mb3"], &["UTF-8", "UTF8"], V4_1),
        cs("ucs2", 2, 0, &[], &["UCS-2"], V4_1),
        cs("cp866", 1, 0, &[], &["IBM866"], V4_1),
        cs("keybcs2", 1, 0, &[], &["KEYBCS2"], V4_1),
        cs("macce", 1, 0, &[], &["x-mac-ce"], V4_1),
        cs("macroman", 1, 0, &[], &["macintosh"], V4_1),
        cs("cp852", 1, 0, &[], &["IBM852"], V4_1),
        cs("latin7", 1, 0, &[], &["ISO-8859-13"], V4_1),
        cs("utf8mb4", 4, 1, &[], &["UTF-8", "UTF8"], ServerVersion::new(5, 5, 2)),
        cs("cp1251", 1, 0, &[], &["windows-1251"], V4_1),
        cs("utf16", 4, 0, &[], &["UTF-16", "UTF-16BE"], ServerVersion::new(5, 5, 2)),
        cs("utf16le", 4, 0, &[], &["UTF-16LE"], ServerVersion::new(5, 6, 1)),
        cs("cp1256", 1, 0, &[], &["windows-1256"], V4_1),
        cs("cp1257", 1, 0, &[], &["windows-1257"], V4_1),
        cs("utf32", 4, 0, &[], &["UTF-32"], ServerVersion::new(5, 5, 2)),
        cs("binary", 1, 0, &[], &[], V4_1),
        cs("geostd8", 1, 0, &[], &["GEOSTD8"], V4_1),
        cs("cp932", 2, 0, &[], &["windows-31j", "MS932"], ServerVersion::new(5, 0, 3)),
        cs("eucjpms", 3, 0, &[], &["EUC-JP-MS"], ServerVersion::new(5, 0, 3)),
        cs("gb18030", 4, 0, &[], &["GB18030"], ServerVersion::new(5, 7, 4)),
    ]
}

/// Single-byte and legacy multibyte collations, `(id, name, is_default)`.
const CLASSIC_COLLATIONS: &[(u16, &str, bool)] = &[
    (1, "big5_chinese_ci", true),
    (2, "latin2_czech_cs", false),
    (3, "dec8_swedish_ci", true),
    (4, "cp850_general_ci", true),
    (5, "latin1_german1_ci", false),
    (6, "hp8_english_ci", true),
    (7, "koi8r_general_ci", true),
    (8, "latin1_swedish_ci", true),
    (9, "latin2_general_ci", true),
    (10, "swe7_swedish_ci", true),
    (11, "ascii_general_ci", true),
    (12, "ujis_japanese_ci", true),
    (13, "sjis_japanese_ci", true),
    (14, "cp1251_bulgarian_ci", false),
    (15, "latin1_danish_ci", false),
    (16, "hebrew_general_ci", true),
    (18, "tis620_thai_ci", true),
    (19, "euckr_korean_ci", true),
    (20, "latin7_estonian_cs", false),
    (21, "latin2_hungarian_ci", false),
    (22, "koi8u_general_ci", true),
    (23, "cp1251_ukrainian_ci", false),
    (24, "gb2312_chinese_ci", true),
    (25, "greek_general_ci", true),
    (26, "cp1250_general_ci", true),
    (27, "latin2_croatian_ci", false),
    (28, "gbk_chinese_ci", true),
    (29, "cp1257_lithuanian_ci", false),
    (30, "latin5_turkish_ci", true),
    (31, "latin1_german2_ci", false),
    (32, "armscii8_general_ci", true),
    (33, "utf8_general_ci", true),
    (34, "cp1250_czech_cs", false),
    (35, "ucs2_general_ci", true),
    (36, "cp866_general_ci", true),
    (37, "keybcs2_general_ci", true),
    (38, "macce_general_ci", true),
    (39, "macroman_general_ci", true),
    (40, "cp852_general_ci", true),
    (41, "latin7_general_ci", true),
    (42, "latin7_general_cs", false),
    (43, "macce_bin", false),
    (44, "cp1250_croatian_ci", false),
    (45, "utf8mb4_general_ci", true),
    (46, "utf8mb4_bin", false),
    (47, "latin1_bin", false),
    (48, "latin1_general_ci", false),
    (49, "latin1_general_cs", false),
    (50, "cp1251_bin", false),
    (51, "cp1251_general_ci", true),
    (52, "cp1251_general_cs", false),
    (53, "macroman_bin", false),
    (54, "utf16_general_ci", true),
    (55, "utf16_bin", false),
    (56, "utf16le_general_ci", true),
    (57, "cp1256_general_ci", true),
    (58, "cp1257_bin", false),
    (59, "cp1257_general_ci", true),
    (60, "utf32_general_ci", true),
    (61, "utf32_bin", false),
    (62, "utf16le_bin", false),
    (63, "binary", true),
    (64, "armscii8_bin", false),
    (65, "ascii_bin", false),
    (66, "cp1250_bin", false),
    (67, "cp1256_bin", false),
    (68, "cp866_bin", false),
    (69, "dec8_bin", false),
    (70, "greek_bin", false),
    (71, "hebrew_bin", false),
    (72, "hp8_bin", false),
    (73, "keybcs2_bin", false),
    (74, "koi8r_bin", false),
    (75, "koi8u_bin", false),
    (76, "utf8_tolower_ci", false),
    (77, "latin2_bin", false),
    (78, "latin5_bin", false),
    (79, "latin7_bin", false),
    (80, "cp850_bin", false),
    (81, "cp852_bin", false),
    (82, "swe7_bin", false),
    (83, "utf8_bin", false),
    (84, "big5_bin", false),
    (85, "euckr_bin", false),
    (86, "gb2312_bin", false),
    (87, "gbk_bin", false),
    (88, "sjis_bin", false),
    (89, "tis620_bin", false),
    (90, "ucs2_bin", false),
    (91, "ujis_bin", false),
    (92, "geostd8_general_ci", true),
    (93, "geostd8_bin", false),
    (94, "latin1_spanish_ci", false),
    (95, "cp932_japanese_ci", true),
    (96, "cp932_bin", false),
    (97, "eucjpms_japanese_ci", true),
    (98, "eucjpms_bin", false),
    (99, "cp1250_polish_ci", false),
    (159, "ucs2_general_mysql500_ci", false),
    (223, "utf8_general_mysql500_ci", false),
    (248, "gb18030_chinese_ci", true),
    (249, "gb18030_bin", false),
    (250, "gb18030_unicode_520_ci", false),
    (303, "utf8mb4_ja_0900_as_cs", false),
    (304, "utf8mb4_ja_0900_as_cs_ks", false),
    (305, "utf8mb4_0900_as_ci", false),
    (306, "utf8mb4_ru_0900_ai_ci", false),
    (307, "utf8mb4_ru_0900_as_cs", false),
    (308, "utf8mb4_zh_0900_as_cs", false),
    (309, "utf8mb4_0900_bin", false),
];

/// Language variants shared by every Unicode charset, in id order.
const UNICODE_VARIANTS: [&str; 24] = [
    "unicode",
    "icelandic",
    "latvian",
    "romanian",
    "slovenian",
    "polish",
    "estonian",
    "spanish",
    "swedish",
    "turkish",
    "czech",
    "danish",
    "lithuanian",
    "slovak",
    "spanish2",
    "roman",
    "persian",
    "esperanto",
    "hungarian",
    "sinhala",
    "german2",
    "croatian",
    "unicode_520",
    "vietnamese",
];

/// First id of each Unicode charset's language block.
const UNICODE_BLOCKS: [(&str, u16); 5] = [
    ("utf16", 101),
    ("ucs2", 128),
    ("utf32", 160),
    ("utf8", 192),
    ("utf8mb4", 224),
];

/// Locales of the `utf8mb4_*_0900_*` blocks; `None` marks an unassigned id.
const UCA_0900_LOCALES: [Option<&str>; 23] = [
    Some(""),
    Some("de_pb_"),
    Some("is_"),
    Some("lv_"),
    Some("ro_"),
    Some("sl_"),
    Some("pl_"),
    Some("et_"),
    Some("es_"),
    Some("sv_"),
    Some("tr_"),
    Some("cs_"),
    Some("da_"),
    Some("lt_"),
    Some("sk_"),
    Some("es_trad_"),
    Some("la_"),
    None,
    Some("eo_"),
    Some("hu_"),
    Some("hr_"),
    None,
    Some("vi_"),
];

const UCA_0900_BLOCKS: [(&str, u16); 2] = [("ai_ci", 255), ("as_cs", 278)];

struct Registry {
    charsets: Vec<Charset>,
    collations: HashMap<u16, Collation>,
    by_name: HashMap<String, u16>,
    default_for_charset: HashMap<&'static str, u16>,
}

impl Registry {
    fn build() -> Self {
        let charsets = charset_table();
        let mut collations = Vec::with_capacity(320);

        for &(id, name, is_default) in CLASSIC_COLLATIONS {
            let charset = charset_of_collation_name(&charsets, name);
            collations.push(Collation {
                id,
                name: name.to_string(),
                charset,
                priority: u8::from(is_default),
            });
        }
        for (charset, base) in UNICODE_BLOCKS {
            for (offset, variant) in (0u16..).zip(UNICODE_VARIANTS) {
                collations.push(Collation {
                    id: base + offset,
                    name: format!("{charset}_{variant}_ci"),
                    charset,
                    priority: 0,
                });
            }
        }
        for (suffix, base) in UCA_0900_BLOCKS {
            for (offset, locale) in (0u16..).zip(UCA_0900_LOCALES) {
                if let Some(locale) = locale {
                    collations.push(Collation {
                        id: base + offset,
                        name: format!("utf8mb4_{locale}0900_{suffix}"),
                        charset: "utf8mb4",
                        priority: 0,
                    });
                }
            }
        }

        let by_name = collations.iter().map(|c| (c.name.clone(), c.id)).collect();
        let default_for_charset = collations
            .iter()
            .filter(|c| c.priority > 0)
            .map(|c| (c.charset, c.id))
            .collect();
        let collations = collations.into_iter().map(|c| (c.id, c)).collect();

        Self {
            charsets,
            collations,
            by_name,
            default_for_charset,
        }
    }

    fn charset(&self, name: &str) -> Option<&Charset> {
        self.charsets.iter().find(|c| c.matches(name))
    }
}

/// Longest charset name that prefixes a collation name ("utf8mb4_bin"
/// belongs to utf8mb4, not utf8).
fn charset_of_collation_name(charsets: &[Charset], collation: &str) -> &'static str {
    charsets
        .iter()
        .filter(|c| {
            collation == c.name
                || collation
                    .strip_prefix(c.name)
                    .is_some_and(|rest| rest.starts_with('_'))
        })
        .max_by_key(|c| c.name.len())
        .map_or("binary", |c| c.name)
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::build);

/// Name of a collation id.
pub fn collation_name(id: u16) -> Option<&'static str> {
    REGISTRY.collations.get(&id).map(|c| c.name.as_str())
}

/// Look up a collation by id.
pub fn collation(id: u16) -> Option<&'static Collation> {
    REGISTRY.collations.get(&id)
}

/// Id of a collation name (case-insensitive). Names may use a charset
/// alias, so `utf8mb3_general_ci` resolves like `utf8_general_ci`.
pub fn collation_id(name: &str) -> Option<u16> {
    let lower = name.to_ascii_lowercase();
    if let Some(id) = REGISTRY.by_name.get(&lower) {
        return Some(*id);
    }
    REGISTRY.charsets.iter().find_map(|charset| {
        charset.aliases.iter().find_map(|alias| {
            let rest = lower.strip_prefix(alias)?;
            REGISTRY
                .by_name
                .get(&format!("{}{}", charset.name, rest))
                .copied()
        })
    })
}

/// Charset of a collation id.
pub fn charset_for_collation(id: u16) -> Option<&'static Charset> {
    let collation = REGISTRY.collations.get(&id)?;
    REGISTRY.charset(collation.charset)
}

/// Look up a charset by name or alias.
pub fn charset(name: &str) -> Option<&'static Charset> {
    REGISTRY.charset(name)
}

/// Default collation of a charset (name or alias).
pub fn default_collation_for_charset(name: &str) -> Option<u16> {
    let charset = REGISTRY.charset(name)?;
    REGISTRY.default_for_charset.get(charset.name).copied()
}

/// Maximum bytes per character of a charset (name or alias).
pub fn max_bytes_per_char(charset: &str) -> Option<u8> {
    REGISTRY.charset(charset).map(|c| c.max_bytes_per_char)
}

/// Whether any charset mapping this client encoding is multibyte.
pub fn is_multibyte_encoding(encoding: &str) -> bool {
    REGISTRY
        .charsets
        .iter()
        .any(|c| c.maps_encoding(encoding) && c.is_multibyte())
}

/// Pick the default collation of the highest-priority charset that maps
/// `encoding` and that the server is new enough to know.
pub fn best_collation_for_encoding(encoding: &str, server: ServerVersion) -> Option<u16> {
    REGISTRY
        .charsets
        .iter()
        .filter(|c| c.maps_encoding(encoding) && server >= c.min_version)
        .max_by_key(|c| c.priority)
        .and_then(|c| REGISTRY.default_for_charset.get(c.name).copied())
}

/// Collations the server refuses as the connection charset: the
/// UCS-2/UTF-16/UTF-32 families and ids that do not fit the one-byte
/// handshake field.
pub fn is_impermissible_connection_collation(id: u16) -> bool {
    if id > 255 {
        return true;
    }
    charset_for_collation(id)
        .is_some_and(|c| matches!(c.name, "ucs2" | "utf16" | "utf16le" | "utf32"))
}

/// Whether the session can encode and decode text in this collation's
/// charset without transcoding through UTF-8.
pub fn has_native_codec(id: u16) -> bool {
    charset_for_collation(id).is_some_and(|c| TextCodec::native(c.name).is_some())
}

/// All known collations, in no particular order.
pub fn collations() -> impl Iterator<Item = &'static Collation> {
    REGISTRY.collations.values()
}

/// All known charsets.
pub fn charsets() -> &'static [Charset] {
    &REGISTRY.charsets
}

/// How the session turns column bytes into strings and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCodec {
    Utf8,
    Latin1,
    Ascii,
    /// `binary` charset: bytes are passed through, text decodes lossily.
    Binary,
}

impl TextCodec {
    /// The codec that reads and writes `name` byte-for-byte, if there is one.
    pub fn native(name: &str) -> Option<Self> {
        let canonical = charset(name).map_or(name, |c| c.name);
        match canonical {
            "utf8" | "utf8mb4" => Some(TextCodec::Utf8),
            "latin1" => Some(TextCodec::Latin1),
            "ascii" => Some(TextCodec::Ascii),
            "binary" => Some(TextCodec::Binary),
            _ => None,
        }
    }

    /// Codec for a charset. Charsets without a native codec fall back to
    /// lossy UTF-8.
    pub fn for_charset(name: &str) -> Self {
        Self::native(name).unwrap_or_else(|| {
            tracing::warn!(
                charset = name,
                "no native codec for charset; strings decode as lossy UTF-8"
            );
            TextCodec::Utf8
        })
    }

    /// Codec for the charset of a collation id.
    pub fn for_collation(id: u16) -> Self {
        charset_for_collation(id).map_or(TextCodec::Utf8, |c| Self::for_charset(c.name))
    }

    pub fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self {
            TextCodec::Utf8 | TextCodec::Binary => String::from_utf8_lossy(bytes),
            TextCodec::Latin1 | TextCodec::Ascii => {
                if bytes.is_ascii() {
                    String::from_utf8_lossy(bytes)
                } else if *self == TextCodec::Latin1 {
                    Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())
                } else {
                    Cow::Owned(
                        bytes
                            .iter()
                            .map(|&b| if b.is_ascii() { char::from(b) } else { '\u{FFFD}' })
                            .collect(),
                    )
                }
            }
        }
    }

    /// Encode text; characters the charset cannot represent become `?`.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        let limit = match self {
            TextCodec::Utf8 | TextCodec::Binary => return Cow::Borrowed(text.as_bytes()),
            TextCodec::Latin1 => 0xFF,
            TextCodec::Ascii => 0x7F,
        };
        if text.is_ascii() {
            return Cow::Borrowed(text.as_bytes());
        }
        Cow::Owned(
            text.chars()
                .map(|c| {
                    let code = u32::from(c);
                    if code <= limit { code as u8 } else { b'?' }
                })
                .collect(),
        )
    }
}
