use serde::Serialize;

/// A track title split into its base name and trailing mix/version suffix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTitle {
    pub name: String,
    pub mix: Option<String>,
}

/// Split a title like `"Nights of Pleasure (Mark Broom Remix)"` into
/// `name = "Nights of Pleasure"` and `mix = Some("Mark Broom Remix")`.
///
/// Only the last parenthesized group anchored at the end of the title counts
/// as a mix. Parentheses nested inside that group are kept verbatim.
pub fn parse(title: &str) -> ParsedTitle {
    if let Some((name, inner)) = split_trailing_group(title.trim_end()) {
        let mix = inner.trim();
        if !mix.is_empty() {
            return ParsedTitle {
                name: name.trim().to_string(),
                mix: Some(mix.to_string()),
            };
        }
    }

    ParsedTitle {
        name: title.trim().to_string(),
        mix: None,
    }
}

/// Returns `(before, inner)` for a balanced `( ... )` group ending `s`.
fn split_trailing_group(s: &str) -> Option<(&str, &str)> {
    let body = s.strip_suffix(')')?;
    let mut depth = 0usize;
    for (idx, ch) in body.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth == 0 => return Some((&s[..idx], &body[idx + 1..])),
            '(' => depth -= 1,
            _ => {}
        }
    }
    None
}
