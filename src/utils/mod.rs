use url::Url;

pub const DEFAULT_OUTPUT_NAME: &str = "download";

pub fn is_http_url(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Output filename for a download, with `.mp3` forced when transcoding.
pub fn output_filename(name: Option<&str>, audio_only: bool) -> String {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_NAME);

    if audio_only && !name.to_ascii_lowercase().ends_with(".mp3") {
        format!("{}.mp3", name)
    } else {
        name.to_string()
    }
}

pub fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        DEFAULT_OUTPUT_NAME.to_string()
    } else {
        compact.to_string()
    }
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", sanitize_ascii_filename(filename))
}

/// Lenient boolean query flag. Anything unrecognized is false.
pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes" | "on")
    )
}

pub fn format_bitrate(kbps: f64) -> String {
    format!("{}kbps", kbps.round() as u64)
}
