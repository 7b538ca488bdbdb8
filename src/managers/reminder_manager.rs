use chrono::{DateTime, Utc};
use futures::future::join_all;
use poise::serenity_prelude::{GuildId, UserId};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};
use crate::managers::notifier::SharedNotifier;
use crate::managers::single_flight::SingleFlight;
use crate::messages;
use crate::models::{LicensedRole, Reminder, ReminderActivations};
use crate::state::{Database, SharedDatabase};

/// Activations governing reminders of an entitlement: the redeemed license's
/// own schedule, else the guild default. `None` when the guild disabled reminders.
pub fn activations_for(db: &Database, licensed_role: &LicensedRole) -> Result<Option<ReminderActivations>> {
    let member = db
        .licensed_members
        .get(&licensed_role.licensed_member_id)
        .ok_or_else(|| LicenseError::not_found("Licensed member", licensed_role.licensed_member_id))?;
    let guild = db.guild(member.guild_id)?;

    if !guild.settings.reminders_enabled {
        return Ok(None);
    }

    let activations_id = db
        .licenses
        .get(&member.license_key)
        .map(|license| license.reminder_activations_id)
        .unwrap_or(guild.reminder_activations_id);

    Ok(Some(db.reminder_activations(activations_id)?.clone()))
}

/// Recompute reminders of one entitlement after its expiration changed.
///
/// Unsent reminders are replaced. Sent reminders for the same expiration
/// instant are kept and not recreated; sent ones for an older instant are
/// dropped. Returns how many reminders were created.
pub fn reschedule(db: &mut Database, licensed_role_id: u64) -> Result<usize> {
    let licensed_role = db
        .licensed_roles
        .get(&licensed_role_id)
        .cloned()
        .ok_or_else(|| LicenseError::not_found("Licensed role", licensed_role_id))?;

    let expiration = licensed_role.expiration;
    db.reminders.retain(|_, r| {
        r.licensed_role_id != licensed_role_id || (r.sent && Some(r.expiration) == expiration)
    });

    let Some(expiration) = expiration else {
        return Ok(0);
    };
    let Some(activations) = activations_for(db, &licensed_role)? else {
        return Ok(0);
    };

    let already_sent: Vec<i64> = db
        .reminders
        .values()
        .filter(|r| r.licensed_role_id == licensed_role_id)
        .map(|r| r.activation)
        .collect();

    let mut created = 0;
    for activation in activations.enabled() {
        if already_sent.contains(&activation) {
            continue;
        }
        let id = db.next_id();
        db.reminders.insert(
            id,
            Reminder {
                id,
                licensed_member_id: licensed_role.licensed_member_id,
                licensed_role_id,
                activation,
                expiration,
                sent: false,
            },
        );
        created += 1;
    }

    Ok(created)
}

/// A reminder ready to go out, detached from the database
struct Dispatch {
    guild_id: GuildId,
    settings: GuildSettings,
    member_id: UserId,
    text: String,
}

/// Owns reminder configuration and the periodic reminder sweep
pub struct ReminderManager {
    db: SharedDatabase,
    notifier: SharedNotifier,
    sweeping: AtomicBool,
}

impl ReminderManager {
    pub fn new(db: SharedDatabase, notifier: SharedNotifier) -> Self {
        Self {
            db,
            notifier,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Replace the guild default reminder offsets (1 to 5 values).
    pub async fn set_reminder_defaults(&self, guild_id: GuildId, offsets: &[i64]) -> Result<()> {
        {
            let mut db = self.db.write().await;
            let activations_id = db.guild(guild_id)?.reminder_activations_id;
            let activations = ReminderActivations::new(activations_id, offsets)?;
            db.reminder_activations.insert(activations_id, activations);
        }
        self.db.persist().await;

        info!(guild_id = %guild_id, "Default reminders set to {:?}", offsets);
        Ok(())
    }

    pub async fn reminder_defaults(&self, guild_id: GuildId) -> Result<ReminderActivations> {
        let db = self.db.read().await;
        let activations_id = db.guild(guild_id)?.reminder_activations_id;
        Ok(db.reminder_activations(activations_id)?.clone())
    }

    /// Send every due, unsent reminder. Returns how many were delivered.
    ///
    /// Skipped (returns 0) while a previous sweep is still running. Due
    /// reminders are marked sent before dispatch, and when several are due for
    /// the same entitlement only the latest one is delivered.
    pub async fn run_reminder_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(_flight) = SingleFlight::try_begin(&self.sweeping) else {
            debug!("Reminder sweep still running, skipping");
            return Ok(0);
        };

        let dispatches = {
            let mut db = self.db.write().await;

            let mut latest: HashMap<u64, Reminder> = HashMap::new();
            let due: Vec<Reminder> = db
                .reminders
                .values()
                .filter(|r| r.is_due(now))
                .cloned()
                .collect();
            if due.is_empty() {
                return Ok(0);
            }

            for reminder in due {
                if let Some(stored) = db.reminders.get_mut(&reminder.id) {
                    stored.sent = true;
                }
                let keep = latest
                    .get(&reminder.licensed_role_id)
                    .map_or(true, |current| reminder.activation < current.activation);
                if keep {
                    latest.insert(reminder.licensed_role_id, reminder);
                }
            }

            let mut dispatches = Vec::new();
            for reminder in latest.into_values() {
                if reminder.expiration <= now {
                    continue;
                }
                let (Some(member), Some(licensed_role)) = (
                    db.licensed_members.get(&reminder.licensed_member_id),
                    db.licensed_roles.get(&reminder.licensed_role_id),
                ) else {
                    continue;
                };
                let Ok(guild) = db.guild(member.guild_id) else {
                    continue;
                };
                if !guild.settings.reminders_enabled {
                    continue;
                }

                dispatches.push(Dispatch {
                    guild_id: guild.id,
                    settings: guild.settings.clone(),
                    member_id: member.member_id,
                    text: messages::reminder_message(
                        licensed_role.role_id,
                        reminder.expiration,
                        guild.settings.timezone,
                    ),
                });
            }
            dispatches
        };
        self.db.persist().await;

        let notifier = &self.notifier;
        let results = join_all(dispatches.iter().map(|d| async move {
            let result = notifier
                .notify(d.guild_id, &d.settings, d.member_id, &d.text)
                .await;
            (d, result)
        }))
        .await;

        let mut delivered = 0;
        for (dispatch, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    guild_id = %dispatch.guild_id,
                    "Failed to send reminder to {}: {}", dispatch.member_id, e
                ),
            }
        }

        if delivered > 0 {
            info!("Reminder sweep delivered {} reminders", delivered);
        }
        Ok(delivered)
    }
}

/// Shared reminder manager type
pub type SharedReminderManager = Arc<ReminderManager>;

pub fn create_shared_reminder_manager(
    db: SharedDatabase,
    notifier: SharedNotifier,
) -> SharedReminderManager {
    Arc::new(ReminderManager::new(db, notifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::fixtures::Fixture;
    use crate::models::LicenseKind;
    use chrono::Duration;

    async fn redeemed_fixture(reminders: &[i64]) -> (Fixture, u64) {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 600, &[(1, None)]).await;
        fx.reminders
            .set_reminder_defaults(fx.guild_id, reminders)
            .await
            .unwrap();
        let key = fx.license(LicenseKind::SingleUse, "vip", None).await;
        fx.entitlements
            .redeem(fx.guild_id, UserId::new(7), &key)
            .await
            .unwrap();

        let db = fx.db.read().await;
        let licensed_role_id = *db.licensed_roles.keys().next().unwrap();
        drop(db);
        (fx, licensed_role_id)
    }

    #[tokio::test]
    async fn test_one_reminder_per_offset() {
        let (fx, licensed_role_id) = redeemed_fixture(&[120, 60, 10]).await;
        let db = fx.db.read().await;
        let mut activations: Vec<i64> = db
            .reminders
            .values()
            .filter(|r| r.licensed_role_id == licensed_role_id)
            .map(|r| r.activation)
            .collect();
        activations.sort();
        assert_eq!(activations, vec![10, 60, 120]);
    }

    #[tokio::test]
    async fn test_sweep_sends_due_once() {
        let (fx, _) = redeemed_fixture(&[120, 60]).await;
        let now = Utc::now();

        // Nothing due yet
        assert_eq!(fx.reminders.run_reminder_sweep(now).await.unwrap(), 0);

        // 600 minute license: the 120 minute reminder fires after 480 minutes
        let later = now + Duration::minutes(481);
        assert_eq!(fx.reminders.run_reminder_sweep(later).await.unwrap(), 1);
        assert_eq!(fx.notifier.sent.lock().len(), 1);
        assert!(fx.notifier.sent.lock()[0].1.contains("<@&1>"));

        // Re-evaluating is a no-op
        assert_eq!(fx.reminders.run_reminder_sweep(later).await.unwrap(), 0);
        assert_eq!(fx.notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_only_latest_due_reminder_dispatched() {
        let (fx, _) = redeemed_fixture(&[120, 60]).await;
        let much_later = Utc::now() + Duration::minutes(550);
        assert_eq!(fx.reminders.run_reminder_sweep(much_later).await.unwrap(), 1);

        let db = fx.db.read().await;
        assert!(db.reminders.values().all(|r| r.sent));
    }

    #[tokio::test]
    async fn test_failed_dispatch_does_not_block_others() {
        let fx = Fixture::new().await;
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 600, &[(1, None)]).await;
        for member in [7, 8] {
            let key = fx.license(LicenseKind::SingleUse, "vip", None).await;
            fx.entitlements
                .redeem(fx.guild_id, UserId::new(member), &key)
                .await
                .unwrap();
        }
        fx.notifier.failing.lock().push(UserId::new(7));

        // Default first activation is 720 minutes, already due for a 600 minute license
        let delivered = fx.reminders.run_reminder_sweep(Utc::now()).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(fx.notifier.sent.lock()[0].0, UserId::new(8));
    }

    #[tokio::test]
    async fn test_sent_reminder_kept_for_same_expiration() {
        let (fx, licensed_role_id) = redeemed_fixture(&[120, 60]).await;
        fx.reminders
            .run_reminder_sweep(Utc::now() + Duration::minutes(481))
            .await
            .unwrap();

        let mut db = fx.db.write().await;
        reschedule(&mut db, licensed_role_id).unwrap();
        let sent: Vec<&Reminder> = db.reminders.values().filter(|r| r.sent).collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].activation, 120);
        assert_eq!(db.reminders.len(), 2);

        // A new expiration instant starts a fresh schedule
        db.licensed_roles.get_mut(&licensed_role_id).unwrap().expiration =
            Some(Utc::now() + Duration::minutes(900));
        reschedule(&mut db, licensed_role_id).unwrap();
        assert!(db.reminders.values().all(|r| !r.sent));
        assert_eq!(db.reminders.len(), 2);
    }

    #[tokio::test]
    async fn test_reminders_disabled() {
        let fx = Fixture::new().await;
        fx.guilds
            .update_settings(fx.guild_id, |s| s.reminders_enabled = false)
            .await
            .unwrap();
        fx.add_role(1, 0, 1).await;
        fx.add_packet("vip", 600, &[(1, None)]).await;
        let key = fx.license(LicenseKind::SingleUse, "vip", None).await;
        fx.entitlements
            .redeem(fx.guild_id, UserId::new(7), &key)
            .await
            .unwrap();

        assert!(fx.db.read().await.reminders.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_defaults_rejected() {
        let fx = Fixture::new().await;
        assert!(fx
            .reminders
            .set_reminder_defaults(fx.guild_id, &[10, 20])
            .await
            .is_err());
        let defaults = fx.reminders.reminder_defaults(fx.guild_id).await.unwrap();
        assert_eq!(defaults.enabled().collect::<Vec<_>>(), vec![720]);
    }

    #[tokio::test]
    async fn test_huge_offset_rejected() {
        let fx = Fixture::new().await;
        let err = fx
            .reminders
            .set_reminder_defaults(fx.guild_id, &[200_000_000_000])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);

        // The sweep still runs over the unchanged defaults
        fx.reminders
            .run_reminder_sweep(Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
    }
}
