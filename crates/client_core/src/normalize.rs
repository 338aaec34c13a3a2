/// Strips one layer of `\( … \)` or `$ … $` wrapping from model output.
///
/// The opening and closing delimiters are matched independently, so mixed
/// wrappings such as `\(x$` are also unwrapped. Anything else passes through
/// trimmed.
pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let opened = trimmed
        .strip_prefix("\\(")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    let closed = opened
        .strip_suffix("\\)")
        .or_else(|| opened.strip_suffix('$'))
        .unwrap_or(opened);
    closed.trim().to_string()
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
