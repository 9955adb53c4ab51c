//! Banner and header printing.

/// Print the application banner.
pub fn print_banner() {
    println!("\n\x1b[1;36m╔══════════════════════════════════════╗\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m         \x1b[1mClipmesh\x1b[0m                     \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m║\x1b[0m   One clipboard for the whole LAN    \x1b[1;36m║\x1b[0m");
    println!("\x1b[1;36m╚══════════════════════════════════════╝\x1b[0m\n");
}

/// Short printable form of clipboard content.
pub fn format_preview(mime_type: &str, data: &[u8]) -> String {
    const MAX_PREVIEW_CHARS: usize = 50;

    if !mime_type.starts_with("text/") {
        return format!("<{} bytes of {}>", data.len(), mime_type);
    }

    let text = String::from_utf8_lossy(data);
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > MAX_PREVIEW_CHARS || line.len() < text.len() {
        let cut: String = line.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let long = "é".repeat(60);
        let preview = format_preview("text/plain", long.as_bytes());
        assert_eq!(preview.chars().count(), 53);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_preview_of_binary() {
        assert_eq!(format_preview("image/png", &[0u8; 12]), "<12 bytes of image/png>");
    }

    #[test]
    fn test_preview_first_line() {
        assert_eq!(format_preview("text/plain", b"one\ntwo"), "one...");
        assert_eq!(format_preview("text/plain", b"short"), "short");
    }
}
