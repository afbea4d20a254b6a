//! IOS XR CLI prompt templates.

use regex::Regex;

use crate::error::{ChannelError, Result};

/// Prompt prefix of an IOS XRv 9000 route processor.
pub const XRV9K_PREFIX: &str = "RP/0/RP0/CPU0";

/// Prompt prefix of a classic IOS XRv route processor.
pub const XRV_PREFIX: &str = "RP/0/0/CPU0";

/// CLI prompt template, parameterized by a node prefix and the hostname
/// learned at login.
///
/// The exec prompt looks like `RP/0/RP0/CPU0:router1#` and the
/// configuration prompts like `RP/0/RP0/CPU0:router1(config-if)#`.
#[derive(Debug, Clone)]
pub struct CliPrompt {
    prefix: String,

    /// Exec prompt, group 1 is the hostname.
    exec: Regex,

    /// Any configuration mode prompt.
    config: Regex,
}

impl CliPrompt {
    /// Build the prompt patterns for a node prefix.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        let escaped = regex::escape(&prefix);

        let exec = Regex::new(&format!(r"{}:([^\s#()]+)#", escaped))
            .map_err(ChannelError::InvalidPattern)?;
        let config = Regex::new(&format!(r"{}:[^\s#()]+\(config[^)]*\)#", escaped))
            .map_err(ChannelError::InvalidPattern)?;

        Ok(Self {
            prefix,
            exec,
            config,
        })
    }

    /// Get the node prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Exec prompt pattern capturing the hostname.
    pub fn exec_pattern(&self) -> &Regex {
        &self.exec
    }

    /// Configuration mode prompt pattern.
    pub fn config_pattern(&self) -> &Regex {
        &self.config
    }

    /// The literal exec prompt of a known host.
    pub fn literal(&self, hostname: &str) -> String {
        format!("{}:{}#", self.prefix, hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_prompt_captures_hostname() {
        let prompt = CliPrompt::new(XRV9K_PREFIX).unwrap();
        let caps = prompt
            .exec_pattern()
            .captures("\r\nRP/0/RP0/CPU0:router1#")
            .unwrap();
        assert_eq!(&caps[1], "router1");
    }

    #[test]
    fn test_exec_prompt_ignores_config_mode() {
        let prompt = CliPrompt::new(XRV9K_PREFIX).unwrap();
        assert!(!prompt.exec_pattern().is_match("RP/0/RP0/CPU0:router1(config)#"));
        assert!(prompt.config_pattern().is_match("RP/0/RP0/CPU0:router1(config)#"));
        assert!(prompt.config_pattern().is_match("RP/0/RP0/CPU0:ios(config-if)#"));
    }

    #[test]
    fn test_prefix_is_literal() {
        let prompt = CliPrompt::new(XRV_PREFIX).unwrap();
        assert_eq!(prompt.prefix(), "RP/0/0/CPU0");
        assert!(prompt.exec_pattern().is_match("RP/0/0/CPU0:xr#"));
        assert!(!prompt.exec_pattern().is_match("RP/0/RP0/CPU0:xr#"));
        assert_eq!(prompt.literal("xr"), "RP/0/0/CPU0:xr#");
    }
}
