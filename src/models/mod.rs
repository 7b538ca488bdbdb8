pub mod entitlement;
pub mod license;
pub mod reminder;
pub mod role;

use poise::serenity_prelude::GuildId;
use serde::{Deserialize, Serialize};

use crate::config::GuildSettings;

pub use entitlement::{LicensedMember, LicensedRole, Remaining};
pub use license::{
    ConsumeOutcome, ExhaustedAction, License, LicenseCapabilities, LicenseKind, LicenseVariant,
};
pub use reminder::{Reminder, ReminderActivations};
pub use role::{PacketRole, Role, RolePacket};

/// A Discord guild the bot serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub settings: GuildSettings,

    /// Default reminders, cloned into every new license
    pub reminder_activations_id: u64,
}
