//! In-memory wiring of every manager with recording collaborators.

use poise::serenity_prelude::{GuildId, RoleId};
use std::sync::Arc;

use crate::managers::entitlement_manager::EntitlementManager;
use crate::managers::guild_manager::GuildManager;
use crate::managers::key_formatter::LicenseFormatter;
use crate::managers::license_manager::{LicenseManager, SharedLicenseManager};
use crate::managers::notifier::testing::RecordingNotifier;
use crate::managers::reminder_manager::ReminderManager;
use crate::managers::role_manager::testing::RecordingGateway;
use crate::models::LicenseKind;
use crate::state::{DatabaseHandle, SharedDatabase};

pub struct Fixture {
    pub guild_id: GuildId,
    pub db: SharedDatabase,
    pub gateway: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub guilds: GuildManager,
    pub licenses: SharedLicenseManager,
    pub entitlements: EntitlementManager,
    pub reminders: ReminderManager,
}

impl Fixture {
    /// Fresh database with guild 1 registered
    pub async fn new() -> Self {
        let db: SharedDatabase = Arc::new(DatabaseHandle::in_memory());
        let gateway = Arc::new(RecordingGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let formatter = LicenseFormatter::default();

        let licenses = Arc::new(LicenseManager::new(db.clone(), formatter.clone()));
        let fixture = Self {
            guild_id: GuildId::new(1),
            guilds: GuildManager::new(db.clone(), formatter),
            entitlements: EntitlementManager::new(db.clone(), licenses.clone(), gateway.clone()),
            reminders: ReminderManager::new(db.clone(), notifier.clone()),
            licenses,
            gateway,
            notifier,
            db,
        };
        fixture.guilds.ensure_guild(fixture.guild_id).await.unwrap();
        fixture
    }

    pub async fn add_role(&self, id: u64, tier_level: u8, tier_power: u8) {
        self.guilds
            .edit_role(self.guild_id, RoleId::new(id), tier_level, tier_power)
            .await
            .unwrap();
    }

    /// Create a packet holding `roles` as `(role id, duration)` pairs
    pub async fn add_packet(&self, name: &str, default_duration: i64, roles: &[(u64, Option<i64>)]) {
        self.guilds
            .create_role_packet(self.guild_id, name, default_duration)
            .await
            .unwrap();
        for (role_id, duration) in roles {
            self.guilds
                .add_packet_role(self.guild_id, name, RoleId::new(*role_id), *duration)
                .await
                .unwrap();
        }
    }

    pub async fn license(&self, kind: LicenseKind, packet: &str, uses: Option<u32>) -> String {
        self.licenses
            .create_license(self.guild_id, kind, packet, uses, None)
            .await
            .unwrap()
            .key
    }
}
