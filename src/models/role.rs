use poise::serenity_prelude::{GuildId, RoleId};
use serde::{Deserialize, Serialize};

use crate::config::limits::{
    MAXIMUM_LICENSE_DURATION_MINUTES, MAXIMUM_ROLES, MAX_CUSTOM_MESSAGE_LENGTH,
    MAX_PACKET_NAME_LENGTH, MAX_TIER_LEVEL, MAX_TIER_POWER,
};
use crate::error::{LicenseError, Result};

/// A single guild role known to the bot.
///
/// Roles with `tier_level > 0` are tiered: a member can never hold two roles
/// sharing a tier level, the one with higher `tier_power` wins. For example
/// `donator (1, 1)` and `premium_donator (1, 2)` exclude each other while an
/// untiered `supporter` can be held alongside either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub tier_level: u8,
    pub tier_power: u8,
}

impl Role {
    pub fn new(id: RoleId, guild_id: GuildId) -> Self {
        Self {
            id,
            guild_id,
            tier_level: 0,
            tier_power: 1,
        }
    }

    pub fn is_tiered(&self) -> bool {
        self.tier_level > 0
    }

    /// `(level, power)` slot this role occupies, if tiered
    pub fn tier_slot(&self) -> Option<(u8, u8)> {
        self.is_tiered().then_some((self.tier_level, self.tier_power))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tier_level > MAX_TIER_LEVEL {
            return Err(LicenseError::configuration(format!(
                "Role tier level has to be in 0-{} range.",
                MAX_TIER_LEVEL
            )));
        }
        if self.tier_power > MAX_TIER_POWER {
            return Err(LicenseError::configuration(format!(
                "Role tier power has to be in 0-{} range.",
                MAX_TIER_POWER
            )));
        }
        if self.is_tiered() && self.tier_power == 0 {
            return Err(LicenseError::configuration(
                "Tiered roles need a tier power of at least 1.",
            ));
        }
        Ok(())
    }
}

/// One role entry of a packet with its duration in minutes (0 = permanent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRole {
    pub role_id: RoleId,
    pub duration: i64,
}

/// Named bundle of roles redeemed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePacket {
    pub id: u64,
    pub guild_id: GuildId,
    pub name: String,

    /// Shown to the member after redeeming, generic message when empty
    #[serde(default)]
    pub custom_message: String,

    /// Duration used for roles added without an explicit one
    pub default_role_duration: i64,

    #[serde(default)]
    pub roles: Vec<PacketRole>,
}

impl RolePacket {
    pub fn new(id: u64, guild_id: GuildId, name: &str, default_role_duration: i64) -> Self {
        Self {
            id,
            guild_id,
            name: name.to_string(),
            custom_message: String::new(),
            default_role_duration,
            roles: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(LicenseError::configuration("Packet name cannot be empty."));
        }
        if self.name.chars().count() > MAX_PACKET_NAME_LENGTH {
            return Err(LicenseError::configuration(format!(
                "Packet name has to be under {} characters.",
                MAX_PACKET_NAME_LENGTH
            )));
        }
        if self.custom_message.chars().count() > MAX_CUSTOM_MESSAGE_LENGTH {
            return Err(LicenseError::configuration(format!(
                "Packet message has to be under {} characters.",
                MAX_CUSTOM_MESSAGE_LENGTH
            )));
        }
        validate_duration(self.default_role_duration)?;
        if self.roles.len() > MAXIMUM_ROLES {
            return Err(LicenseError::conflict(format!(
                "Role packet exceeds limit of {} roles.",
                MAXIMUM_ROLES
            )));
        }
        self.roles
            .iter()
            .try_for_each(|packet_role| validate_duration(packet_role.duration))
    }

    /// Add a role, falling back to the packet default duration.
    pub fn add_role(&mut self, role_id: RoleId, duration: Option<i64>) -> Result<()> {
        if self.roles.iter().any(|r| r.role_id == role_id) {
            return Err(LicenseError::conflict(format!(
                "Role {} is already part of packet '{}'.",
                role_id, self.name
            )));
        }
        if self.roles.len() + 1 > MAXIMUM_ROLES {
            return Err(LicenseError::conflict(format!(
                "Cannot add packet role as number of roles in packet would exceed limit of {} roles.",
                MAXIMUM_ROLES
            )));
        }

        let duration = duration.unwrap_or(self.default_role_duration);
        validate_duration(duration)?;
        self.roles.push(PacketRole { role_id, duration });
        Ok(())
    }

    pub fn remove_role(&mut self, role_id: RoleId) -> bool {
        let before = self.roles.len();
        self.roles.retain(|r| r.role_id != role_id);
        self.roles.len() != before
    }

    /// Change the duration one packet role grants. Entitlements already
    /// granted keep their expiration.
    pub fn set_role_duration(&mut self, role_id: RoleId, duration: i64) -> Result<()> {
        validate_duration(duration)?;
        let role = self
            .roles
            .iter_mut()
            .find(|r| r.role_id == role_id)
            .ok_or_else(|| LicenseError::not_found("Packet role", role_id))?;
        role.duration = duration;
        Ok(())
    }
}

fn validate_duration(duration: i64) -> Result<()> {
    if duration < 0 {
        return Err(LicenseError::configuration("Role duration cannot be negative."));
    }
    if duration > MAXIMUM_LICENSE_DURATION_MINUTES {
        return Err(LicenseError::configuration(format!(
            "Role duration cannot exceed {} minutes.",
            MAXIMUM_LICENSE_DURATION_MINUTES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_role_ranges() {
        let mut role = Role::new(RoleId::new(1), GuildId::new(10));
        assert!(role.validate().is_ok());
        assert_eq!(role.tier_slot(), None);

        role.tier_level = 101;
        assert!(role.validate().is_err());
        role.tier_level = 100;
        role.tier_power = 10;
        assert!(role.validate().is_err());
        role.tier_power = 0;
        assert!(role.validate().is_err());
        role.tier_power = 9;
        assert!(role.validate().is_ok());
        assert_eq!(role.tier_slot(), Some((100, 9)));
    }

    #[test]
    fn test_packet_role_defaults_and_limit() {
        let mut packet = RolePacket::new(1, GuildId::new(10), "vip", 60);
        packet.add_role(RoleId::new(1), None).unwrap();
        packet.add_role(RoleId::new(2), Some(30)).unwrap();
        assert_eq!(packet.roles[0].duration, 60);
        assert_eq!(packet.roles[1].duration, 30);

        let err = packet.add_role(RoleId::new(1), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        for id in 3..=MAXIMUM_ROLES as u64 {
            packet.add_role(RoleId::new(id), None).unwrap();
        }
        let err = packet.add_role(RoleId::new(999), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(packet.validate().is_ok());
    }

    #[test]
    fn test_packet_validation() {
        let packet = RolePacket::new(1, GuildId::new(10), "", 60);
        assert!(packet.validate().is_err());

        let packet = RolePacket::new(1, GuildId::new(10), "vip", -1);
        assert!(packet.validate().is_err());

        let mut packet = RolePacket::new(1, GuildId::new(10), "vip", 0);
        assert!(packet.add_role(RoleId::new(1), Some(-5)).is_err());
        assert!(!packet.remove_role(RoleId::new(2)));
    }

    #[test]
    fn test_set_role_duration() {
        let mut packet = RolePacket::new(1, GuildId::new(10), "vip", 60);
        packet.add_role(RoleId::new(1), None).unwrap();

        packet.set_role_duration(RoleId::new(1), 0).unwrap();
        assert_eq!(packet.roles[0].duration, 0);

        let err = packet.set_role_duration(RoleId::new(2), 30).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = packet
            .set_role_duration(RoleId::new(1), MAXIMUM_LICENSE_DURATION_MINUTES + 1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(packet.roles[0].duration, 0);
    }
}
