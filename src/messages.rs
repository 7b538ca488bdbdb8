// src/messages.rs

use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::RoleId;

use crate::managers::entitlement_manager::{RoleOutcome, RoleReport};

/// Format an expiration instant in the guild's display timezone
pub fn format_expiration(expiration: Option<DateTime<Utc>>, timezone: i8) -> String {
    match expiration {
        None => "never".to_string(),
        Some(expiration) => {
            let local = expiration + Duration::hours(i64::from(timezone));
            format!("{} UTC{:+}", local.format("%Y-%m-%d %H:%M"), timezone)
        }
    }
}

/// Human readable role duration in minutes, 0 meaning forever
pub fn format_duration(minutes: i64) -> String {
    if minutes == 0 {
        return "forever".to_string();
    }

    let (days, hours, minutes) = (minutes / 1440, minutes % 1440 / 60, minutes % 60);
    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{}{}", value, unit))
        .collect();
    parts.join(" ")
}

pub fn reminder_message(role_id: RoleId, expiration: DateTime<Utc>, timezone: i8) -> String {
    format!(
        "⏰ **License Expiring Soon**\n\n\
        Your license for role <@&{}> will expire on **{}**.\n\n\
        If you want to keep the role, redeem a new license before it expires.",
        role_id,
        format_expiration(Some(expiration), timezone)
    )
}

/// One line of the redeem summary describing what happened to a role
pub fn role_report_line(report: &RoleReport, timezone: i8) -> String {
    let mut line = match &report.outcome {
        RoleOutcome::Granted { expiration } => format!(
            "• <@&{}> granted, expires: {}",
            report.role_id,
            format_expiration(*expiration, timezone)
        ),
        RoleOutcome::DuplicateExtended { expiration } => format!(
            "• <@&{}> already held, now expires: {}",
            report.role_id,
            format_expiration(*expiration, timezone)
        ),
        RoleOutcome::Upgraded {
            replaced,
            expiration,
        } => format!(
            "• <@&{}> granted, replacing {}, expires: {}",
            report.role_id,
            replaced
                .iter()
                .map(|r| format!("<@&{}>", r))
                .collect::<Vec<_>>()
                .join(", "),
            format_expiration(*expiration, timezone)
        ),
        RoleOutcome::TierMiss {
            superior,
            extended: Some(expiration),
        } => format!(
            "• <@&{}> not granted, you hold the superior <@&{}> which now expires: {}",
            report.role_id,
            superior,
            format_expiration(*expiration, timezone)
        ),
        RoleOutcome::TierMiss {
            superior,
            extended: None,
        } => format!(
            "• <@&{}> not granted, you already hold the superior <@&{}>",
            report.role_id, superior
        ),
        RoleOutcome::Failed { reason } => {
            format!("• <@&{}> could not be granted: {}", report.role_id, reason)
        }
    };

    if let Some(error) = &report.platform_error {
        line.push_str(&format!(
            "\n  ⚠️ Saved, but Discord refused the change ({}).",
            error
        ));
    }
    line
}

pub fn redeem_success_message(packet_name: &str, lines: &[String]) -> String {
    format!(
        "✅ **License Redeemed!**\n\n\
        Role packet **{}** activated:\n{}",
        packet_name,
        lines.join("\n")
    )
}

pub fn redeem_failure_message(reason: &str) -> String {
    format!(
        "❌ **License Not Redeemed**\n\n\
        {}\n\n\
        Please double-check your license key, or contact an administrator if you believe this is an error.",
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_expiration() {
        let expiration = Utc.with_ymd_and_hms(2025, 1, 1, 10, 30, 0).unwrap();
        assert_eq!(format_expiration(Some(expiration), 2), "2025-01-01 12:30 UTC+2");
        assert_eq!(format_expiration(Some(expiration), -11), "2024-12-31 23:30 UTC-11");
        assert_eq!(format_expiration(None, 0), "never");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "forever");
        assert_eq!(format_duration(45), "45m");
        assert_eq!(format_duration(1500), "1d 1h");
    }

    #[test]
    fn test_role_report_lines() {
        let expiration = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let upgraded = RoleReport {
            role_id: RoleId::new(2),
            outcome: RoleOutcome::Upgraded {
                replaced: vec![RoleId::new(1)],
                expiration: Some(expiration),
            },
            platform_error: None,
        };
        assert_eq!(
            role_report_line(&upgraded, 0),
            "• <@&2> granted, replacing <@&1>, expires: 2025-01-01 00:00 UTC+0"
        );

        let miss = RoleReport {
            role_id: RoleId::new(1),
            outcome: RoleOutcome::TierMiss {
                superior: RoleId::new(2),
                extended: None,
            },
            platform_error: Some("Missing Permissions".to_string()),
        };
        let line = role_report_line(&miss, 0);
        assert!(line.starts_with("• <@&1> not granted"));
        assert!(line.contains("Missing Permissions"));
    }

    #[test]
    fn test_reminder_mentions_role() {
        let expiration = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let text = reminder_message(RoleId::new(42), expiration, 0);
        assert!(text.contains("<@&42>"));
        assert!(text.contains("2025-01-01 00:00 UTC+0"));
    }
}
