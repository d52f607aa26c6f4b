//! String handling for Stalker stream commands and the links `create_link` returns.
//!
//! A command looks like `ffrt http://host/ch/42` or `ffmpeg http://host/ch?id=1`:
//! an optional player prefix followed by a URL-ish token.

const FFMPEG_PREFIX: &str = "ffmpeg ";

/// Embed a `utc=<start>` marker into a command before asking for a link.
///
/// Commands without an embedded `http` URL are returned untouched. If the command
/// already has a query string the marker is appended with `&`; otherwise `?utc=`
/// is added to the first space-separated token starting with `http`.
pub fn with_timeshift(cmd: &str, start: i64) -> String {
    if !cmd.contains("http") {
        return cmd.to_string();
    }

    if cmd.contains('?') {
        return format!("{cmd}&utc={start}");
    }

    let mut parts: Vec<String> = cmd.split(' ').map(str::to_string).collect();
    match parts.iter_mut().find(|part| part.starts_with("http")) {
        Some(part) => {
            part.push_str(&format!("?utc={start}"));
            parts.join(" ")
        }
        None => cmd.to_string(),
    }
}

/// Clean up the link returned by `create_link`.
///
/// Drops a leading `ffmpeg ` player prefix, swaps the first `extension=ts` for
/// `extension=m3u8`, and when a start time was requested but the portal did not
/// carry a `utc=` marker through, appends one.
pub fn normalize_stream_link(link: &str, start: Option<i64>) -> String {
    let mut url = match link.strip_prefix(FFMPEG_PREFIX) {
        Some(rest) => rest.trim().to_string(),
        None => link.to_string(),
    };

    if url.contains("extension=ts") {
        url = url.replacen("extension=ts", "extension=m3u8", 1);
    }

    if let Some(start) = start
        && !url.contains("utc=")
    {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&format!("utc={start}"));
    }

    url
}
