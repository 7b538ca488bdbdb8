use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, Http, RoleId, UserId};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;

/// Grants and revokes Discord roles on behalf of the license engine.
#[async_trait]
pub trait RoleGateway: Send + Sync {
    async fn add_role(&self, guild_id: GuildId, member_id: UserId, role_id: RoleId) -> Result<()>;

    async fn remove_role(&self, guild_id: GuildId, member_id: UserId, role_id: RoleId)
        -> Result<()>;
}

/// Role gateway backed by the Discord HTTP API
pub struct DiscordRoleGateway {
    http: Arc<Http>,
}

impl DiscordRoleGateway {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RoleGateway for DiscordRoleGateway {
    async fn add_role(&self, guild_id: GuildId, member_id: UserId, role_id: RoleId) -> Result<()> {
        self.http
            .add_member_role(guild_id, member_id, role_id, Some("License redeemed"))
            .await?;

        info!("Assigned role {} to user {} in guild {}", role_id, member_id, guild_id);
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        member_id: UserId,
        role_id: RoleId,
    ) -> Result<()> {
        self.http
            .remove_member_role(guild_id, member_id, role_id, Some("License expired or revoked"))
            .await?;

        info!("Removed role {} from user {} in guild {}", role_id, member_id, guild_id);
        Ok(())
    }
}

/// Shared role gateway type
pub type SharedRoleGateway = Arc<dyn RoleGateway>;

pub fn create_shared_role_gateway(http: Arc<Http>) -> SharedRoleGateway {
    Arc::new(DiscordRoleGateway::new(http))
}

/// In-memory gateway recording every call, for tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::error::LicenseError;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RoleCall {
        Add(UserId, RoleId),
        Remove(UserId, RoleId),
    }

    #[derive(Default)]
    pub struct RecordingGateway {
        pub calls: Mutex<Vec<RoleCall>>,
        /// Roles whose calls fail
        pub failing: Mutex<Vec<RoleId>>,
    }

    impl RecordingGateway {
        pub fn calls(&self) -> Vec<RoleCall> {
            self.calls.lock().clone()
        }

        fn check(&self, role_id: RoleId) -> Result<()> {
            if self.failing.lock().contains(&role_id) {
                return Err(LicenseError::Collaborator {
                    message: format!("Missing Permissions for role {}", role_id),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RoleGateway for RecordingGateway {
        async fn add_role(&self, _guild_id: GuildId, member_id: UserId, role_id: RoleId) -> Result<()> {
            self.calls.lock().push(RoleCall::Add(member_id, role_id));
            self.check(role_id)
        }

        async fn remove_role(
            &self,
            _guild_id: GuildId,
            member_id: UserId,
            role_id: RoleId,
        ) -> Result<()> {
            self.calls.lock().push(RoleCall::Remove(member_id, role_id));
            self.check(role_id)
        }
    }
}
