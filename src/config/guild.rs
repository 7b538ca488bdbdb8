use poise::serenity_prelude::ChannelId;
use serde::{Deserialize, Serialize};

use super::limits::{
    MAX_BRANDING_LENGTH, MAX_LICENSE_FORMAT_LENGTH, MAX_PREFIX_LENGTH, SUPPORTED_LANGUAGES,
    TIMEZONE_RANGE,
};
use crate::error::{LicenseError, Result};
use crate::managers::key_formatter::LicenseFormatter;

/// Per-guild behaviour settings, edited by guild administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    /// Command prefix; empty means the bot default
    pub custom_prefix: String,

    /// Template for generated keys; empty means the default format
    pub custom_license_format: String,

    /// Inserted wherever the format contains `{branding}`
    pub license_branding: String,

    /// Offset from UTC, only used for displaying expiration dates
    pub timezone: i8,

    /// Whether `/redeem` also works in bot DMs
    pub enable_dm_redeem: bool,

    /// Re-redeeming a held role: true sums remaining + new duration, false resets to new duration
    pub preserve_previous_duration_duplicate: bool,

    /// Tier upgrade: true makes the new role absorb the replaced role's remaining duration
    pub preserve_previous_duration_tier_upgrade: bool,

    /// Tier miss: true extends the held superior role by the new duration, false changes nothing
    pub preserve_previous_duration_tier_miss: bool,

    /// Purge a member's licensed data as soon as they leave the guild
    pub nuke_data_on_member_leave: bool,

    /// ISO 639-1 language code
    pub language: String,

    pub reminders_enabled: bool,

    /// Channel reminders are posted to, in addition to DMs
    pub reminders_channel_id: Option<ChannelId>,

    pub reminders_ping_in_reminders_channel: bool,

    /// Whether to also DM the member
    pub reminders_send_to_dm: bool,

    pub license_log_channel_enabled: bool,
    pub license_log_channel_id: Option<ChannelId>,

    pub diagnostic_channel_enabled: bool,
    pub diagnostic_channel_id: Option<ChannelId>,
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            custom_prefix: String::new(),
            custom_license_format: String::new(),
            license_branding: String::new(),
            timezone: 0,
            enable_dm_redeem: true,
            preserve_previous_duration_duplicate: true,
            preserve_previous_duration_tier_upgrade: true,
            preserve_previous_duration_tier_miss: true,
            nuke_data_on_member_leave: true,
            language: "en".to_string(),
            reminders_enabled: true,
            reminders_channel_id: None,
            reminders_ping_in_reminders_channel: false,
            reminders_send_to_dm: true,
            license_log_channel_enabled: false,
            license_log_channel_id: None,
            diagnostic_channel_enabled: false,
            diagnostic_channel_id: None,
        }
    }
}

impl GuildSettings {
    /// Reject out-of-range or insecure values before they are persisted.
    pub fn validate(&self, formatter: &LicenseFormatter) -> Result<()> {
        if self.custom_prefix.chars().count() > MAX_PREFIX_LENGTH {
            return Err(LicenseError::configuration(format!(
                "Custom prefix has to be under {} characters.",
                MAX_PREFIX_LENGTH
            )));
        }
        if self.custom_license_format.chars().count() > MAX_LICENSE_FORMAT_LENGTH {
            return Err(LicenseError::configuration(format!(
                "Custom format has to be under {} characters.",
                MAX_LICENSE_FORMAT_LENGTH
            )));
        }
        if self.license_branding.chars().count() > MAX_BRANDING_LENGTH {
            return Err(LicenseError::configuration(format!(
                "License branding has to be under {} characters.",
                MAX_BRANDING_LENGTH
            )));
        }
        formatter.validate(&self.custom_license_format, &self.license_branding)?;

        if !TIMEZONE_RANGE.contains(&self.timezone) {
            return Err(LicenseError::configuration("Invalid timezone."));
        }
        if self.language.chars().any(|c| !c.is_lowercase()) {
            return Err(LicenseError::configuration(
                "Please only use lowercase characters for guild language.",
            ));
        }
        if !SUPPORTED_LANGUAGES.contains(&self.language.as_str()) {
            return Err(LicenseError::configuration("Unsupported guild language."));
        }

        Ok(())
    }

    /// Prefix to answer to in this guild
    pub fn prefix<'a>(&'a self, default_prefix: &'a str) -> &'a str {
        if self.custom_prefix.is_empty() {
            default_prefix
        } else {
            &self.custom_prefix
        }
    }

    /// Update a single option by name, parsing the value from command text.
    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "custom_prefix" => self.custom_prefix = value.to_string(),
            "custom_license_format" => self.custom_license_format = value.to_string(),
            "license_branding" => self.license_branding = value.to_string(),
            "timezone" => self.timezone = parse_value(name, value)?,
            "enable_dm_redeem" => self.enable_dm_redeem = parse_value(name, value)?,
            "preserve_previous_duration_duplicate" => {
                self.preserve_previous_duration_duplicate = parse_value(name, value)?
            }
            "preserve_previous_duration_tier_upgrade" => {
                self.preserve_previous_duration_tier_upgrade = parse_value(name, value)?
            }
            "preserve_previous_duration_tier_miss" => {
                self.preserve_previous_duration_tier_miss = parse_value(name, value)?
            }
            "nuke_data_on_member_leave" => {
                self.nuke_data_on_member_leave = parse_value(name, value)?
            }
            "language" => self.language = value.to_string(),
            "reminders_enabled" => self.reminders_enabled = parse_value(name, value)?,
            "reminders_channel_id" => self.reminders_channel_id = parse_channel(name, value)?,
            "reminders_ping_in_reminders_channel" => {
                self.reminders_ping_in_reminders_channel = parse_value(name, value)?
            }
            "reminders_send_to_dm" => self.reminders_send_to_dm = parse_value(name, value)?,
            "license_log_channel_enabled" => {
                self.license_log_channel_enabled = parse_value(name, value)?
            }
            "license_log_channel_id" => {
                self.license_log_channel_id = parse_channel(name, value)?
            }
            "diagnostic_channel_enabled" => {
                self.diagnostic_channel_enabled = parse_value(name, value)?
            }
            "diagnostic_channel_id" => self.diagnostic_channel_id = parse_channel(name, value)?,
            other => {
                return Err(LicenseError::configuration(format!(
                    "Unknown guild option '{}'",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Channel license log entries go to, if enabled
    pub fn license_log_channel(&self) -> Option<ChannelId> {
        self.license_log_channel_id
            .filter(|_| self.license_log_channel_enabled)
    }

    /// Channel warnings and errors about this guild go to, if enabled
    pub fn diagnostic_channel(&self) -> Option<ChannelId> {
        self.diagnostic_channel_id
            .filter(|_| self.diagnostic_channel_enabled)
    }

    /// Human readable listing for `/guild_info`
    pub fn summary(&self) -> String {
        fn or_unset(value: &str) -> &str {
            if value.is_empty() {
                "not set"
            } else {
                value
            }
        }
        fn channel(id: Option<ChannelId>) -> String {
            id.map(|c| format!("{} <#{}>", c, c))
                .unwrap_or_else(|| "Not set".to_string())
        }

        let mut lines = vec![
            format!("Custom prefix: {}", or_unset(&self.custom_prefix)),
            format!("Custom license format: {}", or_unset(&self.custom_license_format)),
            format!("License branding: {}", or_unset(&self.license_branding)),
            format!("Timezone: UTC{:+}", self.timezone),
            format!("License DM redemption: {}", self.enable_dm_redeem),
            format!(
                "preserve_previous_duration_duplicate: {}",
                self.preserve_previous_duration_duplicate
            ),
            format!(
                "preserve_previous_duration_tier_upgrade: {}",
                self.preserve_previous_duration_tier_upgrade
            ),
            format!(
                "preserve_previous_duration_tier_miss: {}",
                self.preserve_previous_duration_tier_miss
            ),
            format!("nuke_data_on_member_leave: {}", self.nuke_data_on_member_leave),
            format!("Language: {}", self.language),
            format!("Reminders enabled: {}", self.reminders_enabled),
        ];

        if self.reminders_enabled {
            lines.push(format!(
                "Reminders channel: {}",
                channel(self.reminders_channel_id)
            ));
            lines.push(format!(
                "Ping members in reminders channel: {}",
                self.reminders_ping_in_reminders_channel
            ));
            lines.push(format!("Send reminders to DMs: {}", self.reminders_send_to_dm));
        }

        lines.push(format!(
            "License log channel enabled: {}",
            self.license_log_channel_enabled
        ));
        if self.license_log_channel_enabled {
            lines.push(format!(
                "License log channel: {}",
                channel(self.license_log_channel_id)
            ));
        }

        lines.push(format!(
            "Diagnostics channel enabled: {}",
            self.diagnostic_channel_enabled
        ));
        if self.diagnostic_channel_enabled {
            lines.push(format!(
                "Diagnostic channel: {}",
                channel(self.diagnostic_channel_id)
            ));
        }

        lines.join("\n")
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse::<T>().map_err(|_| {
        LicenseError::configuration(format!("Invalid value '{}' for option '{}'", value, name))
    })
}

/// `0`, `none` or an empty string unset the channel
fn parse_channel(name: &str, value: &str) -> Result<Option<ChannelId>> {
    let value = value.trim().trim_start_matches("<#").trim_end_matches('>');
    if value.is_empty() || value.eq_ignore_ascii_case("none") || value == "0" {
        return Ok(None);
    }
    let id: u64 = parse_value(name, value)?;
    Ok(Some(ChannelId::new(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_defaults_are_valid() {
        let settings = GuildSettings::default();
        assert!(settings.validate(&LicenseFormatter::default()).is_ok());
        assert_eq!(settings.prefix("."), ".");
    }

    #[test]
    fn test_custom_prefix() {
        let formatter = LicenseFormatter::default();
        let mut settings = GuildSettings::default();
        for valid in ["", "test", "123", "?*+", "owo_prefix"] {
            settings.custom_prefix = valid.to_string();
            assert!(settings.validate(&formatter).is_ok(), "{}", valid);
        }
        settings.custom_prefix = "long_prefix".to_string();
        assert_eq!(
            settings.validate(&formatter).unwrap_err().kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_insecure_license_format_rejected() {
        let mut settings = GuildSettings::default();
        settings.custom_license_format = "DDDD-DDDD".to_string();
        assert!(settings.validate(&LicenseFormatter::default()).is_err());

        settings.custom_license_format = "AAAAA-AAAAA-AAAAA-AAAAA-AAAAA".to_string();
        assert!(settings.validate(&LicenseFormatter::default()).is_ok());
    }

    #[test]
    fn test_timezone_and_language() {
        let formatter = LicenseFormatter::default();
        let mut settings = GuildSettings::default();
        settings.timezone = 15;
        assert!(settings.validate(&formatter).is_err());
        settings.timezone = -12;
        assert!(settings.validate(&formatter).is_ok());

        settings.language = "EN".to_string();
        assert!(settings.validate(&formatter).is_err());
        settings.language = "xx".to_string();
        assert!(settings.validate(&formatter).is_err());
    }

    #[test]
    fn test_set_option() {
        let mut settings = GuildSettings::default();
        settings
            .set_option("preserve_previous_duration_tier_miss", "false")
            .unwrap();
        assert!(!settings.preserve_previous_duration_tier_miss);

        settings.set_option("reminders_channel_id", "<#1234>").unwrap();
        assert_eq!(settings.reminders_channel_id, Some(ChannelId::new(1234)));
        settings.set_option("reminders_channel_id", "0").unwrap();
        assert_eq!(settings.reminders_channel_id, None);

        assert!(settings.set_option("timezone", "abc").is_err());
        assert!(settings.set_option("no_such_option", "1").is_err());
    }

    #[test]
    fn test_license_log_channel_requires_enabled() {
        let mut settings = GuildSettings::default();
        settings.license_log_channel_id = Some(ChannelId::new(55));
        assert_eq!(settings.license_log_channel(), None);
        settings.license_log_channel_enabled = true;
        assert_eq!(settings.license_log_channel(), Some(ChannelId::new(55)));
    }

    #[test]
    fn test_diagnostic_channel_requires_enabled() {
        let mut settings = GuildSettings::default();
        settings.set_option("diagnostic_channel_id", "<#77>").unwrap();
        assert_eq!(settings.diagnostic_channel(), None);
        settings.set_option("diagnostic_channel_enabled", "true").unwrap();
        assert_eq!(settings.diagnostic_channel(), Some(ChannelId::new(77)));
    }
}
