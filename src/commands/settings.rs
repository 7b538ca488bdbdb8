use poise::serenity_prelude as serenity;
use tracing::info;

use super::{reply, reply_listing, require_guild};
use crate::{Context, Error};

/// Entries `/license_log` shows when no count is given
const DEFAULT_LOG_ENTRIES: usize = 20;

/// Show the settings of this guild
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn guild_info(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    let settings = data.guild_manager.settings(guild_id).await?;
    let reminders = data.reminder_manager.reminder_defaults(guild_id).await?;

    let embed = serenity::CreateEmbed::new()
        .title("Guild settings")
        .description(settings.summary())
        .field(
            "Default reminders (minutes before expiration)",
            format!("{:?}", reminders.enabled().collect::<Vec<_>>()),
            false,
        )
        .field(
            "Prefix",
            settings.prefix(&data.config.default_prefix).to_string(),
            true,
        )
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Change one guild setting, see `/guild_info` for names
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn set_option(
    ctx: Context<'_>,
    #[description = "Setting name, e.g. preserve_previous_duration_tier_miss"] name: String,
    #[description = "New value"] value: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .guild_manager
        .set_option(guild_id, name.trim(), value.trim())
        .await?;

    info!(
        guild_id = %guild_id,
        "{} set {} to '{}'", ctx.author().name, name.trim(), value.trim()
    );
    reply(ctx, format!("`{}` set to `{}`.", name.trim(), value.trim())).await
}

/// Recent license activity in this guild
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn license_log(
    ctx: Context<'_>,
    #[description = "How many entries to show"] count: Option<usize>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let entries = ctx
        .data()
        .log_buffer
        .recent_for_guild(guild_id, count.unwrap_or(DEFAULT_LOG_ENTRIES));
    if entries.is_empty() {
        return reply(ctx, "No license activity since the bot started.").await;
    }

    let body = entries
        .iter()
        .map(|entry| {
            format!(
                "{} {} {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.level,
                entry.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    reply_listing(ctx, "Recent license activity:", body, "license_log.txt").await
}
