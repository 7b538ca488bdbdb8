use poise::serenity_prelude as serenity;
use tracing::{info, warn};

use crate::{Data, Error};

/// Handle when the bot joins a new guild or starts up
pub async fn handle_guild_create(guild: &serenity::Guild, data: &Data) -> Result<(), Error> {
    if data.guild_manager.ensure_guild(guild.id).await? {
        info!("Joined guild: {} ({})", guild.name, guild.id);
    }
    Ok(())
}

/// Handle the bot leaving or being removed from a guild
pub async fn handle_guild_delete(
    incomplete: &serenity::UnavailableGuild,
    data: &Data,
) -> Result<(), Error> {
    // Outages also arrive as guild deletes, keep the data then
    if incomplete.unavailable {
        warn!("Guild {} became unavailable", incomplete.id);
        return Ok(());
    }

    data.guild_manager.remove_guild(incomplete.id).await;
    Ok(())
}

/// Handle a role being deleted on Discord
pub async fn handle_role_delete(
    guild_id: serenity::GuildId,
    role_id: serenity::RoleId,
    data: &Data,
) -> Result<(), Error> {
    data.guild_manager.handle_role_deleted(guild_id, role_id).await?;
    Ok(())
}
