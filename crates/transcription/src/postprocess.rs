use std::sync::LazyLock;

use regex::Regex;

/// Rich-transcription markup such as `<|en|>`, `<|HAPPY|>` or `<|withitn|>`.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\|[^|>]*\|>").expect("valid regex"));

static EMOJI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{Extended_Pictographic}\x{FE0F}\x{200D}\x{1F3FB}-\x{1F3FF}]")
        .expect("valid regex")
});

/// Filler artifacts the accurate recognizer tends to emit, each with at most
/// one trailing punctuation mark.
static FILLER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:yeah|yep|okay|ok|hm+|mm+|uh|um|ah|oh|er)\b[,.!?;，。！？、]?")
        .expect("valid regex")
});

static SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Cleans one accurate-recognizer output for display.
pub fn clean_transcript(text: &str) -> String {
    let text = TAG_RE.replace_all(text, "");
    let text = EMOJI_RE.replace_all(&text, "");
    let text = FILLER_RE.replace_all(&text, "");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}
