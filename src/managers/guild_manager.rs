use poise::serenity_prelude::{GuildId, RoleId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};
use crate::managers::key_formatter::LicenseFormatter;
use crate::models::{Guild, LicensedRole, ReminderActivations, Role, RolePacket};
use crate::state::SharedDatabase;

/// Guild configuration: settings, roles and role packets.
pub struct GuildManager {
    db: SharedDatabase,
    formatter: LicenseFormatter,
}

impl GuildManager {
    pub fn new(db: SharedDatabase, formatter: LicenseFormatter) -> Self {
        Self { db, formatter }
    }

    /// Create the guild with default settings if it is not known yet.
    /// Returns true when it was created.
    pub async fn ensure_guild(&self, guild_id: GuildId) -> Result<bool> {
        {
            let mut db = self.db.write().await;
            if db.guild(guild_id).is_ok() {
                return Ok(false);
            }

            let activations_id = db.next_id();
            db.reminder_activations.insert(
                activations_id,
                ReminderActivations::default_with_id(activations_id),
            );
            db.guilds.insert(
                guild_id.get(),
                Guild {
                    id: guild_id,
                    settings: GuildSettings::default(),
                    reminder_activations_id: activations_id,
                },
            );
        }
        self.db.persist().await;

        info!("Registered guild {}", guild_id);
        Ok(true)
    }

    /// Forget the guild and everything tied to it
    pub async fn remove_guild(&self, guild_id: GuildId) -> bool {
        let removed = self.db.write().await.delete_guild(guild_id).is_some();
        if removed {
            self.db.persist().await;
            info!("Removed guild {} and all its data", guild_id);
        }
        removed
    }

    pub async fn settings(&self, guild_id: GuildId) -> Result<GuildSettings> {
        Ok(self.db.read().await.guild(guild_id)?.settings.clone())
    }

    /// Apply `mutate` to a copy of the settings and store it only if it validates.
    pub async fn try_update_settings(
        &self,
        guild_id: GuildId,
        mutate: impl FnOnce(&mut GuildSettings) -> Result<()>,
    ) -> Result<GuildSettings> {
        let settings = {
            let mut db = self.db.write().await;
            let guild = db.guild_mut(guild_id)?;
            let mut settings = guild.settings.clone();
            mutate(&mut settings)?;
            settings.validate(&self.formatter)?;
            guild.settings = settings.clone();
            settings
        };
        self.db.persist().await;

        info!(guild_id = %guild_id, "Guild settings updated");
        Ok(settings)
    }

    pub async fn update_settings(
        &self,
        guild_id: GuildId,
        mutate: impl FnOnce(&mut GuildSettings),
    ) -> Result<GuildSettings> {
        self.try_update_settings(guild_id, |settings| {
            mutate(settings);
            Ok(())
        })
        .await
    }

    /// Set a single option from its textual name and value
    pub async fn set_option(&self, guild_id: GuildId, name: &str, value: &str) -> Result<GuildSettings> {
        self.try_update_settings(guild_id, |settings| settings.set_option(name, value))
            .await
    }

    /// Create or update the tier placement of a role.
    pub async fn edit_role(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        tier_level: u8,
        tier_power: u8,
    ) -> Result<Role> {
        let role = {
            let mut db = self.db.write().await;
            db.guild(guild_id)?;

            let mut role = match db.role(role_id) {
                Ok(existing) if existing.guild_id != guild_id => {
                    return Err(LicenseError::conflict(format!(
                        "Role {} belongs to a different guild.",
                        role_id
                    )))
                }
                Ok(existing) => existing.clone(),
                Err(_) => Role::new(role_id, guild_id),
            };
            role.tier_level = tier_level;
            role.tier_power = tier_power;
            role.validate()?;

            if let Some(slot) = role.tier_slot() {
                if let Some(taken) = db
                    .roles_in_guild(guild_id)
                    .find(|r| r.id != role_id && r.tier_slot() == Some(slot))
                {
                    return Err(LicenseError::conflict(format!(
                        "Tier slot (level {}, power {}) is already taken by role {}.",
                        slot.0, slot.1, taken.id
                    )));
                }
            }

            db.roles.insert(role_id.get(), role.clone());
            role
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Role {} set to tier level {} power {}", role_id, tier_level, tier_power
        );
        Ok(role)
    }

    pub async fn create_role_packet(
        &self,
        guild_id: GuildId,
        name: &str,
        default_role_duration: i64,
    ) -> Result<RolePacket> {
        let packet = {
            let mut db = self.db.write().await;
            db.guild(guild_id)?;
            if db.packet_by_name(guild_id, name).is_ok() {
                return Err(LicenseError::conflict(format!(
                    "Role packet '{}' already exists.",
                    name
                )));
            }

            let id = db.next_id();
            let packet = RolePacket::new(id, guild_id, name, default_role_duration);
            packet.validate()?;
            db.role_packets.insert(id, packet.clone());
            packet
        };
        self.db.persist().await;

        info!(guild_id = %guild_id, "Created role packet '{}'", name);
        Ok(packet)
    }

    /// Message shown to members after redeeming the packet, empty for the generic one
    pub async fn set_packet_message(&self, guild_id: GuildId, name: &str, message: &str) -> Result<()> {
        {
            let mut db = self.db.write().await;
            let packet = db.packet_by_name_mut(guild_id, name)?;
            let mut updated = packet.clone();
            updated.custom_message = message.to_string();
            updated.validate()?;
            *packet = updated;
        }
        self.db.persist().await;
        Ok(())
    }

    /// Add a role to a packet. Unknown roles are registered untiered.
    pub async fn add_packet_role(
        &self,
        guild_id: GuildId,
        packet_name: &str,
        role_id: RoleId,
        duration: Option<i64>,
    ) -> Result<RolePacket> {
        let packet = {
            let mut db = self.db.write().await;
            db.packet_by_name(guild_id, packet_name)?;
            match db.role(role_id).ok().map(|role| role.guild_id) {
                Some(owner) if owner != guild_id => {
                    return Err(LicenseError::conflict(format!(
                        "Role {} belongs to a different guild than packet '{}'.",
                        role_id, packet_name
                    )))
                }
                Some(_) => {}
                None => {
                    db.roles.insert(role_id.get(), Role::new(role_id, guild_id));
                }
            }

            let packet = db.packet_by_name_mut(guild_id, packet_name)?;
            packet.add_role(role_id, duration)?;
            packet.clone()
        };
        self.db.persist().await;

        info!(guild_id = %guild_id, "Added role {} to packet '{}'", role_id, packet_name);
        Ok(packet)
    }

    pub async fn remove_packet_role(&self, guild_id: GuildId, packet_name: &str, role_id: RoleId) -> Result<()> {
        {
            let mut db = self.db.write().await;
            let packet = db.packet_by_name_mut(guild_id, packet_name)?;
            if !packet.remove_role(role_id) {
                return Err(LicenseError::not_found("Packet role", role_id));
            }
        }
        self.db.persist().await;

        info!(guild_id = %guild_id, "Removed role {} from packet '{}'", role_id, packet_name);
        Ok(())
    }

    /// Change how long one role of a packet lasts when redeemed
    pub async fn edit_packet_role(
        &self,
        guild_id: GuildId,
        packet_name: &str,
        role_id: RoleId,
        duration: i64,
    ) -> Result<RolePacket> {
        let packet = {
            let mut db = self.db.write().await;
            let packet = db.packet_by_name_mut(guild_id, packet_name)?;
            packet.set_role_duration(role_id, duration)?;
            packet.clone()
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Role {} in packet '{}' now lasts {} minutes", role_id, packet_name, duration
        );
        Ok(packet)
    }

    /// Delete a packet together with the licenses bound to it.
    /// Returns how many licenses went with it.
    pub async fn delete_role_packet(&self, guild_id: GuildId, name: &str) -> Result<usize> {
        let deleted = {
            let mut db = self.db.write().await;
            let packet_id = db.packet_by_name(guild_id, name)?.id;
            db.role_packets.remove(&packet_id);

            let keys: Vec<String> = db
                .licenses
                .values()
                .filter(|l| l.role_packet_id == packet_id)
                .map(|l| l.key.clone())
                .collect();
            for key in &keys {
                db.delete_license(key);
            }
            keys.len()
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Deleted role packet '{}' and {} licenses", name, deleted
        );
        Ok(deleted)
    }

    pub async fn list_packets(&self, guild_id: GuildId) -> Vec<RolePacket> {
        let db = self.db.read().await;
        let mut packets: Vec<RolePacket> = db
            .role_packets
            .values()
            .filter(|p| p.guild_id == guild_id)
            .cloned()
            .collect();
        packets.sort_by(|a, b| a.name.cmp(&b.name));
        packets
    }

    /// Tiered roles grouped by level, strongest first within a level.
    pub async fn tier_hierarchy(&self, guild_id: GuildId) -> BTreeMap<u8, Vec<Role>> {
        let db = self.db.read().await;
        let mut levels: BTreeMap<u8, Vec<Role>> = BTreeMap::new();
        for role in db.roles_in_guild(guild_id).filter(|r| r.is_tiered()) {
            levels.entry(role.tier_level).or_default().push(role.clone());
        }
        for roles in levels.values_mut() {
            roles.sort_by(|a, b| b.tier_power.cmp(&a.tier_power));
        }
        levels
    }

    /// Drop every trace of a role deleted on Discord. Returns how many
    /// entitlements were removed.
    pub async fn handle_role_deleted(&self, guild_id: GuildId, role_id: RoleId) -> Result<usize> {
        let removed = {
            let mut db = self.db.write().await;
            if db.role(role_id).is_ok_and(|r| r.guild_id == guild_id) {
                db.roles.remove(&role_id.get());
            }
            for packet in db.role_packets.values_mut().filter(|p| p.guild_id == guild_id) {
                packet.remove_role(role_id);
            }

            let rows: Vec<LicensedRole> = db
                .licensed_roles
                .values()
                .filter(|r| r.role_id == role_id)
                .filter(|r| {
                    db.licensed_members
                        .get(&r.licensed_member_id)
                        .is_some_and(|m| m.guild_id == guild_id)
                })
                .cloned()
                .collect();
            let members: Vec<u64> = rows.iter().map(|r| r.licensed_member_id).collect();
            for row in &rows {
                db.delete_licensed_role(row.id);
            }
            db.prune_licensed_members(&members);
            rows.len()
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Role {} deleted, removed {} entitlements", role_id, removed
        );
        Ok(removed)
    }
}

/// Shared guild manager type
pub type SharedGuildManager = Arc<GuildManager>;

pub fn create_shared_guild_manager(db: SharedDatabase, formatter: LicenseFormatter) -> SharedGuildManager {
    Arc::new(GuildManager::new(db, formatter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::managers::fixtures::Fixture;
    use crate::models::LicenseKind;
    use poise::serenity_prelude::UserId;

    #[tokio::test]
    async fn test_ensure_guild_idempotent() {
        let fx = Fixture::new().await;
        assert!(!fx.guilds.ensure_guild(fx.guild_id).await.unwrap());
        assert!(fx.guilds.ensure_guild(GuildId::new(2)).await.unwrap());

        let db = fx.db.read().await;
        assert_eq!(db.guilds.len(), 2);
        assert_eq!(db.reminder_activations.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_tier_slot_rejected() {
        let fx = Fixture::new().await;
        fx.add_role(1, 1, 1).await;
        let err = fx
            .guilds
            .edit_role(fx.guild_id, RoleId::new(2), 1, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Untiered roles never collide, and a role may keep its own slot
        fx.add_role(3, 0, 1).await;
        fx.add_role(4, 0, 1).await;
        fx.guilds
            .edit_role(fx.guild_id, RoleId::new(1), 1, 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tier_ranges() {
        let fx = Fixture::new().await;
        for (level, power) in [(101, 1), (1, 10), (1, 0)] {
            let err = fx
                .guilds
                .edit_role(fx.guild_id, RoleId::new(1), level, power)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Configuration);
        }
        assert!(fx.db.read().await.roles.is_empty());
    }

    #[tokio::test]
    async fn test_packet_rules() {
        let fx = Fixture::new().await;
        fx.guilds
            .create_role_packet(fx.guild_id, "vip", 60)
            .await
            .unwrap();
        let dup = fx
            .guilds
            .create_role_packet(fx.guild_id, "vip", 60)
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let bad = fx
            .guilds
            .create_role_packet(fx.guild_id, "", 60)
            .await
            .unwrap_err();
        assert_eq!(bad.kind(), ErrorKind::Configuration);

        let packet = fx
            .guilds
            .add_packet_role(fx.guild_id, "vip", RoleId::new(5), None)
            .await
            .unwrap();
        assert_eq!(packet.roles[0].duration, 60);

        // Role registered under another guild
        fx.guilds.ensure_guild(GuildId::new(2)).await.unwrap();
        fx.guilds
            .edit_role(GuildId::new(2), RoleId::new(9), 0, 1)
            .await
            .unwrap();
        let mismatch = fx
            .guilds
            .add_packet_role(fx.guild_id, "vip", RoleId::new(9), None)
            .await
            .unwrap_err();
        assert_eq!(mismatch.kind(), ErrorKind::Conflict);

        fx.guilds
            .remove_packet_role(fx.guild_id, "vip", RoleId::new(5))
            .await
            .unwrap();
        assert_eq!(
            fx.guilds
                .remove_packet_role(fx.guild_id, "vip", RoleId::new(5))
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_edit_packet_role() {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 60, &[(1, None)]).await;
        let key = fx.license(LicenseKind::SingleUse, "vip", None).await;
        fx.entitlements
            .redeem(fx.guild_id, UserId::new(7), &key)
            .await
            .unwrap();

        let packet = fx
            .guilds
            .edit_packet_role(fx.guild_id, "vip", RoleId::new(1), 1440)
            .await
            .unwrap();
        assert_eq!(packet.roles[0].duration, 1440);
        assert_eq!(
            fx.guilds
                .edit_packet_role(fx.guild_id, "vip", RoleId::new(2), 30)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            fx.guilds
                .edit_packet_role(fx.guild_id, "gold", RoleId::new(1), 30)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        let db = fx.db.read().await;
        assert_eq!(db.packet_by_name(fx.guild_id, "vip").unwrap().roles[0].duration, 1440);
        // Granted entitlements keep their expiration
        let granted = db.licensed_roles.values().next().unwrap();
        let minutes = (granted.expiration.unwrap() - chrono::Utc::now()).num_minutes();
        assert!(minutes <= 60);
    }

    #[tokio::test]
    async fn test_packet_role_limit() {
        let fx = Fixture::new().await;
        fx.guilds
            .create_role_packet(fx.guild_id, "big", 60)
            .await
            .unwrap();
        for id in 1..=20 {
            fx.guilds
                .add_packet_role(fx.guild_id, "big", RoleId::new(id), None)
                .await
                .unwrap();
        }
        let err = fx
            .guilds
            .add_packet_role(fx.guild_id, "big", RoleId::new(21), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_invalid_settings_not_persisted() {
        let fx = Fixture::new().await;
        let err = fx
            .guilds
            .set_option(fx.guild_id, "custom_license_format", "DDDD")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(
            fx.guilds.settings(fx.guild_id).await.unwrap().custom_license_format,
            ""
        );

        let settings = fx
            .guilds
            .set_option(fx.guild_id, "timezone", "2")
            .await
            .unwrap();
        assert_eq!(settings.timezone, 2);
    }

    #[tokio::test]
    async fn test_tier_hierarchy() {
        let fx = Fixture::new().await;
        fx.add_role(1, 1, 1).await;
        fx.add_role(2, 1, 3).await;
        fx.add_role(3, 2, 1).await;
        fx.add_role(4, 0, 1).await;

        let hierarchy = fx.guilds.tier_hierarchy(fx.guild_id).await;
        assert_eq!(hierarchy.len(), 2);
        let level_one: Vec<RoleId> = hierarchy[&1].iter().map(|r| r.id).collect();
        assert_eq!(level_one, vec![RoleId::new(2), RoleId::new(1)]);
    }

    #[tokio::test]
    async fn test_role_deleted_cascades() {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 60, &[(1, None)]).await;
        let key = fx.license(LicenseKind::SingleUse, "vip", None).await;
        fx.entitlements
            .redeem(fx.guild_id, UserId::new(7), &key)
            .await
            .unwrap();

        let removed = fx
            .guilds
            .handle_role_deleted(fx.guild_id, RoleId::new(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let db = fx.db.read().await;
        assert!(db.roles.is_empty());
        assert!(db.licensed_roles.is_empty());
        assert!(db.licensed_members.is_empty());
        assert!(db.packet_by_name(fx.guild_id, "vip").unwrap().roles.is_empty());
    }

    #[tokio::test]
    async fn test_delete_packet_removes_licenses() {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 60, &[(1, None)]).await;
        fx.license(LicenseKind::SingleUse, "vip", None).await;

        assert_eq!(fx.guilds.delete_role_packet(fx.guild_id, "vip").await.unwrap(), 1);
        assert!(fx.guilds.list_packets(fx.guild_id).await.is_empty());
        assert!(fx.db.read().await.licenses.is_empty());
    }

    #[tokio::test]
    async fn test_remove_guild_cascades() {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 60, &[(1, None)]).await;
        fx.license(LicenseKind::SingleUse, "vip", None).await;

        assert!(fx.guilds.remove_guild(fx.guild_id).await);
        assert!(!fx.guilds.remove_guild(fx.guild_id).await);
        let db = fx.db.read().await;
        assert!(db.guilds.is_empty());
        assert!(db.licenses.is_empty());
        assert!(db.reminder_activations.is_empty());
    }
}
