//! Emoji and pictograph stripping.
//!
//! Speech renderers read emoji aloud by codepoint name, which is never what
//! the sender intended, so they are removed outright rather than replaced.

/// Codepoint ranges treated as emoji/pictographic, inclusive.
const EMOJI_RANGES: &[(u32, u32)] = &[
    (0x1F300, 0x1F5FF), // symbols & pictographs
    (0x1F600, 0x1F64F), // emoticons
    (0x1F680, 0x1F6FF), // transport & map
    (0x1F700, 0x1F77F), // alchemical
    (0x1F780, 0x1F7FF), // geometric shapes extended
    (0x1F800, 0x1F8FF), // supplemental arrows-c
    (0x1F900, 0x1F9FF), // supplemental symbols & pictographs
    (0x1FA00, 0x1FA6F), // chess symbols
    (0x1FA70, 0x1FAFF), // symbols & pictographs extended-a
    (0x2600, 0x26FF),   // miscellaneous symbols
    (0x2700, 0x27BF),   // dingbats
    (0x2300, 0x23FF),   // miscellaneous technical (watch, hourglass)
    (0xFE00, 0xFE0F),   // variation selectors
    (0x1F1E6, 0x1F1FF), // regional indicators
    (0x200D, 0x200D),   // zero-width joiner
    (0x20E3, 0x20E3),   // combining enclosing keycap
];

/// Whether a character falls in an emoji range.
pub fn is_emoji(ch: char) -> bool {
    let cp = ch as u32;
    EMOJI_RANGES.iter().any(|&(lo, hi)| cp >= lo && cp <= hi)
}

/// Remove emoji characters. Returns the cleaned text and how many were cut.
pub fn strip(text: &str) -> (String, usize) {
    let mut removed = 0;
    let kept: String = text
        .chars()
        .filter(|ch| {
            if is_emoji(*ch) {
                removed += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept, removed)
}
