// ── Text helpers for legend values ────────────────────────────────────────────

/// True when `s` contains a decimal number such as "1,234.56" anywhere in it.
/// Legend rows mix labels ("hl2", "n/a", "∅") with values; only numbers qualify.
pub fn looks_numeric(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.iter().enumerate().any(|(i, b)| {
        *b == b'.'
            && i > 0
            && (bytes[i - 1].is_ascii_digit() || bytes[i - 1] == b',')
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
    })
}

/// Read the `color` declaration out of an inline style attribute.
/// `"color: rgb(76, 175, 80);"` → `Some("rgb(76, 175, 80)")`
pub fn style_color(style: &str) -> Option<String> {
    style.split(';').find_map(|decl| {
        let (prop, value) = decl.split_once(':')?;
        if prop.trim().eq_ignore_ascii_case("color") {
            let value = value.trim();
            if value.is_empty() { None } else { Some(value.to_string()) }
        } else {
            None
        }
    })
}

/// Join text nodes and trim the ends; `None` for blank text.
/// Inner spacing (including narrow no-break thousands separators) is kept as displayed.
pub fn clean_text<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined: String = parts.collect();
    let cleaned = joined.trim();
    if cleaned.is_empty() { None } else { Some(cleaned.to_string()) }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
