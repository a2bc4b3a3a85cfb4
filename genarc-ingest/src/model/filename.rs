//! Filename derivation and parsing
//!
//! Canonical names have the shape `<prefix>[-num][-scale][-dup][ label]<ext>`.
//! [`parse_file_name`] reads both canonical names and the older
//! `<hex id>-<num> x2 <label>.<ext>` layout so reconciliation can match files
//! written by earlier versions.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Maximum characters of title or prompt used as a filename label
pub const LABEL_MAX_CHARS: usize = 48;

static LEADING_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]+").expect("valid regex"));

static CANONICAL_SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:-(?P<num>\d{1,3}))?(?:-(?:(?P<scale>\d{1,2})x|x(?P<scale2>\d{1,2})|(?P<tag>[A-Za-z0-9][^\s.]*?[A-Za-z][^\s.]*?)))?(?:-(?P<dup>\d+))?(?P<label>\s.*?)?(?P<ext>\.[A-Za-z0-9]{2,5})$",
    )
    .expect("valid regex")
});

static LEGACY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<prefix>[A-Fa-f0-9]{6,64})?(?:-?(?P<num>\d{1,2})\s*-?\s*)?(?:\s*-?\s*(?:x\s?(?P<scale>\d{1,2})|(?P<scale2>\d{1,2})\s?x)\s*-?\s*)?(?P<label>.*)?(?P<ext>\.[A-Za-z]{3,4})$",
    )
    .expect("valid regex")
});

/// Components recovered from a file name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameParts {
    pub prefix: String,
    pub number: Option<u32>,
    /// Scale segment in canonical form (`2x`, `enh2-vivid`)
    pub scale: Option<String>,
    pub dup: Option<u32>,
    pub label: Option<String>,
    pub ext: String,
}

impl NameParts {
    pub fn key(&self) -> NameKey {
        NameKey {
            number: self.number,
            scale: self.scale.clone(),
            dup: self.dup,
        }
    }
}

/// The parts of a name that distinguish images within one creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NameKey {
    pub number: Option<u32>,
    pub scale: Option<String>,
    pub dup: Option<u32>,
}

/// Replace characters that are unsafe in file names with look-alike glyphs
pub fn escape_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' => '⧸',
            '\\' => '⧹',
            '?' => '¿',
            '*' => '∗',
            ':' => '꞉',
            '|' => '∣',
            '"' => '\'',
            '<' => '˂',
            '>' => '˃',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect()
}

/// Label fragment from a title or prompt: whitespace collapsed, capped, trimmed, escaped
pub fn label_fragment(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(LABEL_MAX_CHARS).collect();
    let trimmed = capped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(escape_file_name(trimmed))
    }
}

/// Canonical scale segment: `2` becomes `2x`, anything else is escaped with
/// spaces and dots turned into underscores
pub fn scale_segment(scale: &str) -> Option<String> {
    let scale = scale.trim();
    if scale.is_empty() {
        return None;
    }
    if scale.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{}x", scale))
    } else {
        Some(escape_file_name(&scale.replace([' ', '.'], "_")))
    }
}

/// Leading hexadecimal run used to group files of one creation
pub fn leading_id(name: &str) -> Option<&str> {
    LEADING_ID_RE.find(name).map(|m| m.as_str())
}

/// Parse a file name, preferring the canonical layout relative to `known_prefix`
pub fn parse_file_name(name: &str, known_prefix: Option<&str>) -> Option<NameParts> {
    let (prefix, rest) = match known_prefix {
        Some(p) if !p.is_empty() && name.starts_with(p) => (p, &name[p.len()..]),
        _ => {
            let id = leading_id(name)?;
            (id, &name[id.len()..])
        }
    };
    if let Some(caps) = CANONICAL_SUFFIX_RE.captures(rest) {
        let scale = caps
            .name("scale")
            .or_else(|| caps.name("scale2"))
            .map(|m| format!("{}x", m.as_str()))
            .or_else(|| caps.name("tag").map(|m| m.as_str().to_string()));
        if scale.is_none() && caps.name("label").is_some() {
            // `<id>-3 x2 label.png` reads as a label here; the legacy layout knows the scale
            if let Some(legacy) = parse_legacy_file_name(name) {
                if legacy.scale.is_some() && legacy.prefix == prefix {
                    return Some(legacy);
                }
            }
        }
        return Some(NameParts {
            prefix: prefix.to_string(),
            number: caps.name("num").and_then(|m| m.as_str().parse().ok()),
            scale,
            dup: caps.name("dup").and_then(|m| m.as_str().parse().ok()),
            label: caps
                .name("label")
                .map(|m| m.as_str().trim().to_string())
                .filter(|l| !l.is_empty()),
            ext: caps.name("ext").map(|m| m.as_str().to_string()).unwrap_or_default(),
        });
    }
    parse_legacy_file_name(name)
}

/// Parse the older `<hex id>-<num> x<scale> <label>.<ext>` layout
pub fn parse_legacy_file_name(name: &str) -> Option<NameParts> {
    let caps = LEGACY_RE.captures(name)?;
    Some(NameParts {
        prefix: caps.name("prefix").map(|m| m.as_str().to_string()).unwrap_or_default(),
        number: caps.name("num").and_then(|m| m.as_str().parse().ok()),
        scale: caps
            .name("scale")
            .or_else(|| caps.name("scale2"))
            .map(|m| format!("{}x", m.as_str())),
        dup: None,
        label: caps
            .name("label")
            .map(|m| m.as_str().trim().to_string())
            .filter(|l| !l.is_empty()),
        ext: caps.name("ext").map(|m| m.as_str().to_string()).unwrap_or_default(),
    })
}

/// Final path segment of a URL
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    if segment.is_empty() {
        None
    } else {
        Some(segment)
    }
}

/// Extension (with leading dot) of a URL's final path segment
pub fn url_extension(url: &str) -> Option<String> {
    url_file_name(url).and_then(|name| file_extension(&name))
}

/// Extension (with leading dot) of a file name
pub fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| format!(".{}", e))
}

/// File name without its extension
pub fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Trailing number before the extension (`img_3.png` gives 3)
pub fn numeric_suffix(name: &str) -> Option<u32> {
    let stem = file_stem(name);
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_replaces_every_occurrence() {
        assert_eq!(escape_file_name("a/b/c: \"x\" <y>|z?*"), "a⧸b⧸c꞉ 'x' ˂y˃∣z¿∗");
    }

    #[test]
    fn test_label_fragment_caps_and_collapses() {
        let long = "a very long prompt\nBREAK\nthat keeps going well past the forty eight character limit";
        let label = label_fragment(long).unwrap();
        assert_eq!(label.chars().count(), 48);
        assert!(label.starts_with("a very long prompt BREAK that"));
        assert_eq!(label_fragment("   "), None);
    }

    #[test]
    fn test_scale_segment() {
        assert_eq!(scale_segment("2").as_deref(), Some("2x"));
        assert_eq!(scale_segment("enh2-vivid").as_deref(), Some("enh2-vivid"));
        assert_eq!(scale_segment(""), None);
    }

    #[test]
    fn test_parse_canonical_with_known_prefix() {
        let parts = parse_file_name("123456789 abc-2-2x a red fox.png", Some("123456789 abc")).unwrap();
        assert_eq!(parts.prefix, "123456789 abc");
        assert_eq!(parts.number, Some(2));
        assert_eq!(parts.scale.as_deref(), Some("2x"));
        assert_eq!(parts.label.as_deref(), Some("a red fox"));
        assert_eq!(parts.ext, ".png");
    }

    #[test]
    fn test_parse_dup_and_tag() {
        let parts = parse_file_name("4242-1-enh2-vivid.webp", None).unwrap();
        assert_eq!(parts.prefix, "4242");
        assert_eq!(parts.number, Some(1));
        assert_eq!(parts.scale.as_deref(), Some("enh2-vivid"));

        let dup = parse_file_name("4242-3-2.png", None).unwrap();
        assert_eq!(dup.number, Some(3));
        assert_eq!(dup.scale, None);
        assert_eq!(dup.dup, Some(2));
    }

    #[test]
    fn test_parse_scale_without_number() {
        let parts = parse_file_name("4242-2x.png", None).unwrap();
        assert_eq!(parts.number, None);
        assert_eq!(parts.scale.as_deref(), Some("2x"));
    }

    #[test]
    fn test_parse_legacy_layout() {
        let parts = parse_legacy_file_name("a1b2c3d4e5-3 x2 castle at dusk.jpg").unwrap();
        assert_eq!(parts.prefix, "a1b2c3d4e5");
        assert_eq!(parts.number, Some(3));
        assert_eq!(parts.scale.as_deref(), Some("2x"));
        assert_eq!(parts.label.as_deref(), Some("castle at dusk"));
        assert_eq!(parts.ext, ".jpg");
    }

    #[test]
    fn test_leading_id() {
        assert_eq!(leading_id("0123abcz.png"), Some("0123abc"));
        assert_eq!(leading_id("zzz.png"), None);
    }

    #[test]
    fn test_url_helpers() {
        assert_eq!(
            url_extension("https://cdn.example.com/a/b/image-1.webp?sig=abc").as_deref(),
            Some(".webp")
        );
        assert_eq!(url_file_name("https://cdn.example.com/a/b/c.png").as_deref(), Some("c.png"));
        assert_eq!(url_extension("https://cdn.example.com/file?id=1"), None);
        assert_eq!(url_extension("not a url"), None);
    }

    #[test]
    fn test_numeric_suffix() {
        assert_eq!(numeric_suffix("abc_3.png"), Some(3));
        assert_eq!(numeric_suffix("abc.png"), None);
    }
}
