/// Formats a byte count with a binary unit prefix, e.g. `"1.5 MiB"`.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    if bytes == 1 {
        return "1 byte".to_owned();
    }

    if bytes < 512 {
        return format!("{bytes} bytes");
    }

    let mut size = bytes as f64;

    for unit in ["KiB", "MiB", "GiB", "TiB"] {
        size /= 1024.0;

        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
    }

    format!("{:.1} EiB", size / (1024.0 * 1024.0))
}

/// Formats a duration in seconds as `"1h 2m 3.0s"`, leaving out zero hours
/// and minutes.
#[must_use]
pub fn human_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let whole_minutes = (seconds / 60.0).floor();
    let hours = (whole_minutes / 60.0).floor() as u64;
    let minutes = whole_minutes as u64 % 60;
    let seconds = seconds - whole_minutes * 60.0;

    let mut out = String::new();

    if hours > 0 {
        out.push_str(&format!("{hours}h "));
    }

    if minutes > 0 {
        out.push_str(&format!("{minutes}m "));
    }

    out.push_str(&format!("{seconds:.1}s"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 bytes");
        assert_eq!(human_size(1), "1 byte");
        assert_eq!(human_size(511), "511 bytes");
        assert_eq!(human_size(512), "0.5 KiB");
        assert_eq!(human_size(8 << 20), "8.0 MiB");
        assert_eq!(human_size(3 << 29), "1.5 GiB");
        assert_eq!(human_size(1 << 60), "1.0 EiB");
    }

    #[test]
    fn test_human_time() {
        assert_eq!(human_time(0.3), "0.3s");
        assert_eq!(human_time(59.0), "59.0s");
        assert_eq!(human_time(3723.0), "1h 2m 3.0s");
        assert_eq!(human_time(3600.5), "1h 0.5s");
    }
}
