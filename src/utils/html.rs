use ammonia;

/// Clean HTML content using the ammonia library.
///
/// Whitelist-based: safe tags (like <b>, <p>) are kept, dangerous ones
/// (like <script>, <iframe>) and attributes (like onclick) are stripped.
/// Input without any markup is returned unchanged, so plain answers such
/// as "Tom & Jerry said 5 > 3" are stored exactly as typed.
pub fn clean_html(input: &str) -> String {
    if contains_markup(input) {
        ammonia::clean(input)
    } else {
        input.to_string()
    }
}

/// True when `input` has something a browser would parse as a tag,
/// comment or declaration: `<` directly followed by a letter, `/`, `!` or `?`.
fn contains_markup(input: &str) -> bool {
    input
        .as_bytes()
        .windows(2)
        .any(|w| w[0] == b'<' && (w[1].is_ascii_alphabetic() || matches!(w[1], b'/' | b'!' | b'?')))
}
