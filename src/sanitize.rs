// src/sanitize.rs
// HTML escaping for user-supplied text before it enters the transcript
// or an LLM prompt.

/// Escape the five characters that can open markup. The transcript is
/// rendered with innerHTML-style interpolation downstream, so everything
/// user-typed passes through here first.
pub fn escape_html(unsafe_text: &str) -> String {
    let mut escaped = String::with_capacity(unsafe_text.len());
    for ch in unsafe_text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
