/// Normalize a title or artist for identity comparison: trim, then lowercase.
pub fn normalize_for_matching(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Dedup identity of a track: the case-insensitive, trimmed (title, artist) pair.
/// Generated candidates carry no numeric key, so this is the only identity.
pub fn track_key(title: &str, artist: &str) -> String {
    format!(
        "{}|{}",
        normalize_for_matching(title),
        normalize_for_matching(artist)
    )
}

/// Split a comma separated list, dropping blank items.
pub fn parse_csv_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Lowercase slug of ASCII alphanumerics joined by single dashes.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out
}
