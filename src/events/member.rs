use poise::serenity_prelude as serenity;
use tracing::debug;

use crate::{Data, Error};

/// Handle a member leaving the guild
pub async fn handle_member_removal(
    guild_id: serenity::GuildId,
    user: &serenity::User,
    data: &Data,
) -> Result<(), Error> {
    let removed = data
        .entitlement_manager
        .handle_member_leave(guild_id, user.id)
        .await?;
    debug!(
        "Member {} left guild {}, {} license record(s) purged",
        user.name, guild_id, removed
    );
    Ok(())
}

/// Handle a member's roles changing on Discord. Licensed roles removed by
/// hand count as revoked.
pub async fn handle_member_update(
    event: &serenity::GuildMemberUpdateEvent,
    data: &Data,
) -> Result<(), Error> {
    let removed = data
        .entitlement_manager
        .handle_roles_changed(event.guild_id, event.user.id, &event.roles, chrono::Utc::now())
        .await?;
    if !removed.is_empty() {
        debug!(
            "Member {} lost licensed roles {:?} in guild {}",
            event.user.name, removed, event.guild_id
        );
    }
    Ok(())
}
