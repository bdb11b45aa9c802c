//! CLI command implementations

pub mod channel;
pub mod config;

use winksock_client::ChannelMode;

/// Parse a `--mode` argument, accepting names (`rw`, `r+e`) or bits (`3`)
pub fn parse_mode(value: &str) -> Result<ChannelMode, String> {
    let mode = match value.parse::<u8>() {
        Ok(bits) => ChannelMode::from_bits(bits),
        Err(_) => ChannelMode::from_name(value)
            .ok_or_else(|| format!("unknown mode \"{}\"", value))?,
    };

    if !mode.is_valid() {
        return Err(format!(
            "mode \"{}\" is not accepted (listen and emit-only are invalid)",
            value
        ));
    }
    Ok(mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("rw"), Ok(ChannelMode::READWRITE));
        assert_eq!(parse_mode("7"), Ok(ChannelMode::READWRITEEMIT));
        assert_eq!(parse_mode("read"), Ok(ChannelMode::READ));
        assert!(parse_mode("listen").is_err());
        assert!(parse_mode("emit").is_err());
        assert!(parse_mode("4").is_err());
        assert!(parse_mode("sideways").is_err());
    }
}
