use poise::serenity_prelude::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LicenseError, Result};
use crate::models::{
    Guild, License, LicensedMember, LicensedRole, Reminder, ReminderActivations, Role, RolePacket,
};

/// Every persisted entity, one table per entity.
///
/// This layer is plain storage: it hands out ids and stores rows but checks
/// no cross-entity invariant, the managers do that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    /// Schema version for migrations
    pub version: u32,

    /// Last surrogate id handed out
    next_id: u64,

    pub guilds: HashMap<u64, Guild>,
    pub roles: HashMap<u64, Role>,
    pub role_packets: HashMap<u64, RolePacket>,
    pub licenses: HashMap<String, License>,
    pub reminder_activations: HashMap<u64, ReminderActivations>,
    pub licensed_members: HashMap<u64, LicensedMember>,
    pub licensed_roles: HashMap<u64, LicensedRole>,
    pub reminders: HashMap<u64, Reminder>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: 1,
            next_id: 0,
            guilds: HashMap::new(),
            roles: HashMap::new(),
            role_packets: HashMap::new(),
            licenses: HashMap::new(),
            reminder_activations: HashMap::new(),
            licensed_members: HashMap::new(),
            licensed_roles: HashMap::new(),
            reminders: HashMap::new(),
        }
    }
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, or create new if not exists
    pub async fn load(path: &str) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| LicenseError::StateParse {
                path: path.to_string(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(LicenseError::StateLoad {
                path: path.to_string(),
                source: e,
            }),
        }
    }

    /// Save to a JSON file atomically
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        // Write to temp file first, then rename for atomicity
        let temp_path = format!("{}.tmp", path);
        tokio::fs::write(&temp_path, &content)
            .await
            .map_err(|e| LicenseError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| LicenseError::StateSave {
                path: path.to_string(),
                source: e,
            })?;

        Ok(())
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    // ========== Guilds ==========

    pub fn guild(&self, guild_id: GuildId) -> Result<&Guild> {
        self.guilds
            .get(&guild_id.get())
            .ok_or_else(|| LicenseError::not_found("Guild", guild_id))
    }

    pub fn guild_mut(&mut self, guild_id: GuildId) -> Result<&mut Guild> {
        self.guilds
            .get_mut(&guild_id.get())
            .ok_or_else(|| LicenseError::not_found("Guild", guild_id))
    }

    // ========== Roles ==========

    pub fn role(&self, role_id: RoleId) -> Result<&Role> {
        self.roles
            .get(&role_id.get())
            .ok_or_else(|| LicenseError::not_found("Role", role_id))
    }

    pub fn roles_in_guild(&self, guild_id: GuildId) -> impl Iterator<Item = &Role> {
        self.roles.values().filter(move |r| r.guild_id == guild_id)
    }

    // ========== Role packets ==========

    pub fn packet(&self, packet_id: u64) -> Result<&RolePacket> {
        self.role_packets
            .get(&packet_id)
            .ok_or_else(|| LicenseError::not_found("Role packet", packet_id))
    }

    pub fn packet_by_name(&self, guild_id: GuildId, name: &str) -> Result<&RolePacket> {
        self.role_packets
            .values()
            .find(|p| p.guild_id == guild_id && p.name == name)
            .ok_or_else(|| LicenseError::not_found("Role packet", name))
    }

    pub fn packet_by_name_mut(&mut self, guild_id: GuildId, name: &str) -> Result<&mut RolePacket> {
        self.role_packets
            .values_mut()
            .find(|p| p.guild_id == guild_id && p.name == name)
            .ok_or_else(|| LicenseError::not_found("Role packet", name))
    }

    // ========== Licenses ==========

    pub fn license(&self, key: &str) -> Result<&License> {
        self.licenses
            .get(key)
            .ok_or_else(|| LicenseError::not_found("License", key))
    }

    pub fn license_mut(&mut self, key: &str) -> Result<&mut License> {
        self.licenses
            .get_mut(key)
            .ok_or_else(|| LicenseError::not_found("License", key))
    }

    pub fn count_licenses(&self, predicate: impl Fn(&License) -> bool) -> usize {
        self.licenses.values().filter(|l| predicate(l)).count()
    }

    pub fn reminder_activations(&self, id: u64) -> Result<&ReminderActivations> {
        self.reminder_activations
            .get(&id)
            .ok_or_else(|| LicenseError::not_found("Reminder activations", id))
    }

    /// Delete a license together with the reminder activations it owns
    pub fn delete_license(&mut self, key: &str) -> Option<License> {
        let license = self.licenses.remove(key)?;
        self.reminder_activations
            .remove(&license.reminder_activations_id);
        Some(license)
    }

    // ========== Entitlements ==========

    pub fn licensed_member_for(&self, member_id: UserId, license_key: &str) -> Option<&LicensedMember> {
        self.licensed_members
            .values()
            .find(|m| m.member_id == member_id && m.license_key == license_key)
    }

    /// Every licensed role the member holds in the guild, across all licenses
    pub fn member_licensed_roles(&self, guild_id: GuildId, member_id: UserId) -> Vec<LicensedRole> {
        let member_rows: Vec<u64> = self
            .licensed_members
            .values()
            .filter(|m| m.guild_id == guild_id && m.member_id == member_id)
            .map(|m| m.id)
            .collect();

        let mut roles: Vec<LicensedRole> = self
            .licensed_roles
            .values()
            .filter(|r| member_rows.contains(&r.licensed_member_id))
            .cloned()
            .collect();
        roles.sort_by_key(|r| r.id);
        roles
    }

    /// Delete a licensed role and its reminders
    pub fn delete_licensed_role(&mut self, licensed_role_id: u64) -> Option<LicensedRole> {
        let removed = self.licensed_roles.remove(&licensed_role_id)?;
        self.reminders
            .retain(|_, r| r.licensed_role_id != licensed_role_id);
        Some(removed)
    }

    /// Delete a licensed member with everything hanging off it
    pub fn delete_licensed_member(&mut self, licensed_member_id: u64) -> Option<LicensedMember> {
        let removed = self.licensed_members.remove(&licensed_member_id)?;
        self.licensed_roles
            .retain(|_, r| r.licensed_member_id != licensed_member_id);
        self.reminders
            .retain(|_, r| r.licensed_member_id != licensed_member_id);
        Some(removed)
    }

    /// Delete those of `candidates` left without any licensed role, returns how many
    pub fn prune_licensed_members(&mut self, candidates: &[u64]) -> usize {
        let empty: Vec<u64> = candidates
            .iter()
            .filter(|id| !self.licensed_roles.values().any(|r| r.licensed_member_id == **id))
            .copied()
            .collect();
        empty
            .iter()
            .filter(|id| self.delete_licensed_member(**id).is_some())
            .count()
    }

    /// Remove a guild and all data tied to it
    pub fn delete_guild(&mut self, guild_id: GuildId) -> Option<Guild> {
        let guild = self.guilds.remove(&guild_id.get())?;
        self.reminder_activations
            .remove(&guild.reminder_activations_id);

        self.roles.retain(|_, r| r.guild_id != guild_id);
        self.role_packets.retain(|_, p| p.guild_id != guild_id);

        let keys: Vec<String> = self
            .licenses
            .values()
            .filter(|l| l.guild_id == guild_id)
            .map(|l| l.key.clone())
            .collect();
        for key in keys {
            self.delete_license(&key);
        }

        let members: Vec<u64> = self
            .licensed_members
            .values()
            .filter(|m| m.guild_id == guild_id)
            .map(|m| m.id)
            .collect();
        for id in members {
            self.delete_licensed_member(id);
        }

        Some(guild)
    }
}

/// Shared database handle with its persistence location.
pub struct DatabaseHandle {
    db: tokio::sync::RwLock<Database>,
    path: Option<String>,
}

impl DatabaseHandle {
    pub fn new(db: Database, path: Option<String>) -> Self {
        Self {
            db: tokio::sync::RwLock::new(db),
            path,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Database::new(), None)
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, Database> {
        self.db.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, Database> {
        self.db.write().await
    }

    /// Save to disk if backed by a file. Failures are logged, committed state stays.
    pub async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let db = self.db.read().await;
        if let Err(e) = db.save(path).await {
            tracing::error!("Failed to persist database: {}", e);
        }
    }
}

/// Shared database type
pub type SharedDatabase = Arc<DatabaseHandle>;

pub fn create_shared_database(db: Database, path: Option<String>) -> SharedDatabase {
    Arc::new(DatabaseHandle::new(db, path))
}
