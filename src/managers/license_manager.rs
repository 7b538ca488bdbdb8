use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::config::limits::{MAXIMUM_GENERATE_AMOUNT, MAXIMUM_UNUSED_GUILD_LICENSES};
use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};
use crate::managers::key_formatter::LicenseFormatter;
use crate::managers::reminder_manager;
use crate::models::{
    ConsumeOutcome, ExhaustedAction, License, LicenseCapabilities, LicenseKind, ReminderActivations,
};
use crate::state::{Database, SharedDatabase};

/// Attempts at drawing a key that is not taken yet
const MAX_KEY_ATTEMPTS: usize = 10;

/// Result of consuming one use of a license.
#[derive(Debug, Clone)]
pub struct Consumed {
    /// The license after consumption
    pub license: License,
    pub outcome: ConsumeOutcome,
    /// Key of the replacement license, for regenerating licenses
    pub regenerated_key: Option<String>,
}

/// Creates, consumes and retires licenses.
pub struct LicenseManager {
    db: SharedDatabase,
    formatter: LicenseFormatter,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LicenseManager {
    pub fn new(db: SharedDatabase, formatter: LicenseFormatter) -> Self {
        Self {
            db,
            formatter,
            locks: DashMap::new(),
        }
    }

    /// Enter the critical section of one license. Every mutation of the
    /// license and the entitlements created from it happens under this guard.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Forget the critical section of a key that cannot be redeemed any more
    /// (unknown or inactive). Call after the guard from `lock` is dropped.
    /// Entries someone still waits on are kept.
    pub async fn release(&self, key: &str) {
        let redeemable = self
            .db
            .read()
            .await
            .license(key)
            .is_ok_and(|license| !license.inactive);
        if !redeemable {
            self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Create one license for `packet_name` and return it.
    pub async fn create_license(
        &self,
        guild_id: GuildId,
        kind: LicenseKind,
        packet_name: &str,
        uses: Option<u32>,
        reminders: Option<&[i64]>,
    ) -> Result<License> {
        self.generate_licenses(guild_id, kind, packet_name, uses, reminders, 1)
            .await?
            .pop()
            .ok_or_else(|| LicenseError::internal("No license was generated"))
    }

    /// Create `amount` licenses at once. Either all of them are stored or none.
    pub async fn generate_licenses(
        &self,
        guild_id: GuildId,
        kind: LicenseKind,
        packet_name: &str,
        uses: Option<u32>,
        reminders: Option<&[i64]>,
        amount: usize,
    ) -> Result<Vec<License>> {
        if amount == 0 || amount > MAXIMUM_GENERATE_AMOUNT {
            return Err(LicenseError::configuration(format!(
                "Amount of licenses to generate has to be in 1-{} range.",
                MAXIMUM_GENERATE_AMOUNT
            )));
        }
        let variant = kind.into_variant(uses)?;

        let created = {
            let mut db = self.db.write().await;
            let guild = db.guild(guild_id)?.clone();
            let packet_id = db.packet_by_name(guild_id, packet_name)?.id;

            let unused = db.count_licenses(|l| l.guild_id == guild_id && !l.inactive);
            if unused + amount > MAXIMUM_UNUSED_GUILD_LICENSES {
                return Err(LicenseError::conflict(format!(
                    "Guild would exceed the limit of {} unused licenses ({} unused).",
                    MAXIMUM_UNUSED_GUILD_LICENSES, unused
                )));
            }

            let defaults = db.reminder_activations(guild.reminder_activations_id)?.clone();
            let mut batch: Vec<(License, ReminderActivations)> = Vec::with_capacity(amount);
            for _ in 0..amount {
                let taken: Vec<&str> = batch.iter().map(|(l, _)| l.key.as_str()).collect();
                let key = self.unique_key(&db, &guild.settings, &taken)?;

                let activations_id = db.next_id();
                let activations = match reminders {
                    Some(offsets) => ReminderActivations::new(activations_id, offsets)?,
                    None => defaults.clone_with_id(activations_id),
                };
                let license = License::new(key, guild_id, packet_id, activations_id, variant)?;
                batch.push((license, activations));
            }

            let mut created = Vec::with_capacity(batch.len());
            for (license, activations) in batch {
                db.reminder_activations.insert(activations.id, activations);
                db.licenses.insert(license.key.clone(), license.clone());
                created.push(license);
            }
            created
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Generated {} {:?} license(s) for packet '{}'",
            created.len(),
            kind,
            packet_name
        );
        Ok(created)
    }

    /// Draw a key not present in storage nor in `taken`.
    fn unique_key(&self, db: &Database, settings: &GuildSettings, taken: &[&str]) -> Result<String> {
        for _ in 0..MAX_KEY_ATTEMPTS {
            let key = self
                .formatter
                .generate_single(&settings.custom_license_format, &settings.license_branding)?;
            if !db.licenses.contains_key(&key) && !taken.contains(&key.as_str()) {
                return Ok(key);
            }
            warn!("License key collision, drawing a new key");
        }
        Err(LicenseError::internal(
            "Could not generate a unique license key, the license format may be too narrow",
        ))
    }

    /// Consume one use of `key` inside an open write guard.
    ///
    /// The use counter is re-checked here, never trusted from an earlier read.
    /// For regenerating licenses the replacement key and schedule are built
    /// before anything is written, then the old license is deactivated and the
    /// new one stored in the same guard.
    pub fn consume_in(&self, db: &mut Database, key: &str, guild_id: GuildId) -> Result<Consumed> {
        let mut license = db.license(key)?.clone();
        license.validate(guild_id)?;
        let outcome = license.consume()?;

        let replacement = match (outcome, license.on_exhausted()) {
            (ConsumeOutcome::Exhausted, ExhaustedAction::Regenerate) => {
                let settings = db.guild(guild_id)?.settings.clone();
                let new_key = self.unique_key(db, &settings, &[])?;
                let activations_id = db.next_id();
                let activations = db
                    .reminder_activations(license.reminder_activations_id)?
                    .clone_with_id(activations_id);
                let fresh = License::new(
                    new_key,
                    guild_id,
                    license.role_packet_id,
                    activations_id,
                    license.variant,
                )?;
                Some((fresh, activations))
            }
            _ => None,
        };

        db.licenses.insert(license.key.clone(), license.clone());
        let regenerated_key = replacement.map(|(fresh, activations)| {
            let new_key = fresh.key.clone();
            db.reminder_activations.insert(activations.id, activations);
            db.licenses.insert(new_key.clone(), fresh);
            new_key
        });

        if regenerated_key.is_some() {
            info!(guild_id = %guild_id, "Regenerating license {} replaced by a new key", key);
        }

        Ok(Consumed {
            license,
            outcome,
            regenerated_key,
        })
    }

    pub async fn delete_license(&self, guild_id: GuildId, key: &str) -> Result<License> {
        let _guard = self.lock(key).await;
        let deleted = {
            let mut db = self.db.write().await;
            if db.license(key)?.guild_id != guild_id {
                return Err(LicenseError::not_found("License", key));
            }
            db.delete_license(key)
                .ok_or_else(|| LicenseError::not_found("License", key))?
        };
        self.locks.remove(key);
        self.db.persist().await;

        info!(guild_id = %guild_id, "Deleted license {}", key);
        Ok(deleted)
    }

    /// Delete every license of the guild, returns how many were removed.
    pub async fn delete_all_licenses(&self, guild_id: GuildId) -> Result<usize> {
        let keys = {
            let mut db = self.db.write().await;
            db.guild(guild_id)?;
            let keys: Vec<String> = db
                .licenses
                .values()
                .filter(|l| l.guild_id == guild_id)
                .map(|l| l.key.clone())
                .collect();
            for key in &keys {
                db.delete_license(key);
            }
            keys
        };
        for key in &keys {
            self.locks.remove(key);
        }
        self.db.persist().await;

        info!(guild_id = %guild_id, "Deleted all {} licenses", keys.len());
        Ok(keys.len())
    }

    /// Active licenses of the guild, optionally only those of one packet,
    /// oldest first.
    pub async fn list_licenses(&self, guild_id: GuildId, packet_name: Option<&str>) -> Result<Vec<License>> {
        let db = self.db.read().await;
        let packet_id = packet_name
            .map(|name| db.packet_by_name(guild_id, name).map(|p| p.id))
            .transpose()?;

        let mut licenses: Vec<License> = db
            .licenses
            .values()
            .filter(|l| l.guild_id == guild_id && !l.inactive)
            .filter(|l| packet_id.map_or(true, |id| l.role_packet_id == id))
            .cloned()
            .collect();
        licenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        Ok(licenses)
    }

    /// Override the reminder schedule of one license. Entitlements already
    /// redeemed from it are rescheduled; returns how many.
    pub async fn set_license_reminders(&self, guild_id: GuildId, key: &str, offsets: &[i64]) -> Result<usize> {
        let guard = self.lock(key).await;
        let rescheduled = self.replace_reminders(guild_id, key, offsets).await;
        drop(guard);
        self.release(key).await;
        let rescheduled = rescheduled?;

        info!(guild_id = %guild_id, "Reminders of license {} set to {:?}", key, offsets);
        Ok(rescheduled)
    }

    async fn replace_reminders(&self, guild_id: GuildId, key: &str, offsets: &[i64]) -> Result<usize> {
        let rescheduled = {
            let mut db = self.db.write().await;
            let license = db.license(key)?;
            if license.guild_id != guild_id {
                return Err(LicenseError::not_found("License", key));
            }
            let activations = ReminderActivations::new(license.reminder_activations_id, offsets)?;
            db.reminder_activations.insert(activations.id, activations);

            let member_ids: Vec<u64> = db
                .licensed_members
                .values()
                .filter(|m| m.license_key == key)
                .map(|m| m.id)
                .collect();
            let affected: Vec<u64> = db
                .licensed_roles
                .values()
                .filter(|r| member_ids.contains(&r.licensed_member_id))
                .map(|r| r.id)
                .collect();
            for licensed_role_id in &affected {
                reminder_manager::reschedule(&mut db, *licensed_role_id)?;
            }
            affected.len()
        };
        self.db.persist().await;
        Ok(rescheduled)
    }
}

/// Shared license manager type
pub type SharedLicenseManager = Arc<LicenseManager>;

pub fn create_shared_license_manager(db: SharedDatabase, formatter: LicenseFormatter) -> SharedLicenseManager {
    Arc::new(LicenseManager::new(db, formatter))
}
