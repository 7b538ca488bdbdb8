pub mod entitlement_manager;
pub mod guild_manager;
pub mod key_formatter;
pub mod license_manager;
pub mod notifier;
pub mod reminder_manager;
pub mod role_manager;
pub mod single_flight;
pub mod tier_resolver;

#[cfg(test)]
pub mod fixtures;

pub use entitlement_manager::{
    create_shared_entitlement_manager, RedemptionResult, RoleOutcome, SharedEntitlementManager,
};
pub use guild_manager::{create_shared_guild_manager, SharedGuildManager};
pub use key_formatter::LicenseFormatter;
pub use license_manager::{create_shared_license_manager, SharedLicenseManager};
pub use notifier::{create_shared_notifier, SharedNotifier};
pub use reminder_manager::{create_shared_reminder_manager, SharedReminderManager};
pub use role_manager::{create_shared_role_gateway, SharedRoleGateway};
