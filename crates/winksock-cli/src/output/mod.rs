//! Output formatting utilities for the CLI

use winksock_client::{ChannelData, ChannelSignal};

/// Render a DATA payload for the terminal
///
/// Text payloads print as-is; binary payloads print as a short hex preview.
pub fn format_data(data: &ChannelData) -> String {
    match data.as_str() {
        Some(text) => text.to_string(),
        None => format!(
            "[{} bytes, priority {}] {}",
            data.payload().len(),
            data.priority(),
            hex_preview(data.payload(), 32)
        ),
    }
}

/// Render a SIGNAL payload for the terminal
pub fn format_signal(signal: &ChannelSignal) -> String {
    format!("signal: {}", signal.to_text())
}

fn hex_preview(bytes: &[u8], max: usize) -> String {
    let mut out: Vec<String> = bytes.iter().take(max).map(|b| format!("{:02x}", b)).collect();
    if bytes.len() > max {
        out.push("...".to_string());
    }
    out.join(" ")
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
///
/// Goes to stderr so that received payloads on stdout stay pipeable.
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_format_text_data() {
        let data = ChannelData::new(0, true, Bytes::from("hello"));
        assert_eq!(format_data(&data), "hello");
    }

    #[test]
    fn test_format_binary_data() {
        let data = ChannelData::new(2, false, Bytes::from_static(&[0xde, 0xad]));
        assert_eq!(format_data(&data), "[2 bytes, priority 2] de ad");
    }

    #[test]
    fn test_hex_preview_truncates() {
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ...");
    }

    #[test]
    fn test_format_signal() {
        let signal = ChannelSignal::new(Bytes::from("ping"));
        assert_eq!(format_signal(&signal), "signal: ping");
    }
}
