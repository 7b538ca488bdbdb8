use poise::serenity_prelude as serenity;

use super::{reply, reply_listing, require_guild};
use crate::messages::format_duration;
use crate::{Context, Error};

/// Place a role in the tier hierarchy (level 0 = untiered)
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn edit_role(
    ctx: Context<'_>,
    #[description = "Role to edit"] role: serenity::Role,
    #[description = "Tier level, 0 for untiered"] tier_level: u8,
    #[description = "Tier power 1-9, higher wins within a level"] tier_power: Option<u8>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let tier_power = tier_power.unwrap_or(1);
    ctx.data()
        .guild_manager
        .edit_role(guild_id, role.id, tier_level, tier_power)
        .await?;

    let placement = if tier_level == 0 {
        "untiered".to_string()
    } else {
        format!("tier level {} with power {}", tier_level, tier_power)
    };
    reply(ctx, format!("<@&{}> is now {}.", role.id, placement)).await
}

/// Create a named bundle of roles
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn create_role_packet(
    ctx: Context<'_>,
    #[description = "Packet name"] name: String,
    #[description = "Minutes roles last unless set per role, 0 = forever"] default_duration: i64,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .guild_manager
        .create_role_packet(guild_id, name.trim(), default_duration)
        .await?;
    reply(ctx, format!("Role packet **{}** created.", name.trim())).await
}

/// Add a role to a role packet
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn add_packet_role(
    ctx: Context<'_>,
    #[description = "Packet name"] packet: String,
    #[description = "Role to add"] role: serenity::Role,
    #[description = "Minutes the role lasts, packet default if empty, 0 = forever"] duration: Option<i64>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    if role.guild_id != guild_id {
        return reply(ctx, "That role belongs to a different server.").await;
    }

    let updated = ctx
        .data()
        .guild_manager
        .add_packet_role(guild_id, &packet, role.id, duration)
        .await?;
    reply(
        ctx,
        format!(
            "<@&{}> added to **{}** ({} roles).",
            role.id,
            updated.name,
            updated.roles.len()
        ),
    )
    .await
}

/// Remove a role from a role packet
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn remove_packet_role(
    ctx: Context<'_>,
    #[description = "Packet name"] packet: String,
    #[description = "Role to remove"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .guild_manager
        .remove_packet_role(guild_id, &packet, role.id)
        .await?;
    reply(ctx, format!("<@&{}> removed from **{}**.", role.id, packet)).await
}

/// Change how long a role of a role packet lasts
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn edit_packet_role(
    ctx: Context<'_>,
    #[description = "Packet name"] packet: String,
    #[description = "Role to edit"] role: serenity::Role,
    #[description = "Minutes the role lasts, 0 = forever"] duration: i64,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let updated = ctx
        .data()
        .guild_manager
        .edit_packet_role(guild_id, &packet, role.id, duration)
        .await?;
    let lasts = if duration == 0 {
        "forever".to_string()
    } else {
        format!("{} minutes", duration)
    };
    reply(
        ctx,
        format!("<@&{}> in **{}** now lasts {}.", role.id, updated.name, lasts),
    )
    .await
}

/// Delete a role packet and every license bound to it
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn delete_role_packet(
    ctx: Context<'_>,
    #[description = "Packet name"] name: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let deleted = ctx
        .data()
        .guild_manager
        .delete_role_packet(guild_id, &name)
        .await?;
    reply(
        ctx,
        format!("Role packet **{}** deleted with {} license(s).", name, deleted),
    )
    .await
}

/// Message members see after redeeming a packet
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn set_packet_message(
    ctx: Context<'_>,
    #[description = "Packet name"] packet: String,
    #[description = "Message, empty to reset"] message: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .guild_manager
        .set_packet_message(guild_id, &packet, message.as_deref().unwrap_or(""))
        .await?;
    reply(ctx, format!("Message of **{}** updated.", packet)).await
}

/// List role packets and their roles
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn show_role_packets(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let packets = ctx.data().guild_manager.list_packets(guild_id).await;
    if packets.is_empty() {
        return reply(ctx, "No role packets yet, create one with `/create_role_packet`.").await;
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("Role packets")
        .color(0x3498db);
    for packet in &packets {
        let roles = if packet.roles.is_empty() {
            "No roles".to_string()
        } else {
            packet
                .roles
                .iter()
                .map(|r| format!("<@&{}> {}", r.role_id, format_duration(r.duration)))
                .collect::<Vec<_>>()
                .join("\n")
        };
        embed = embed.field(
            format!(
                "{} (default {})",
                packet.name,
                format_duration(packet.default_role_duration)
            ),
            roles,
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Show tiered roles by level
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn show_tier_hierarchy(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let hierarchy = ctx.data().guild_manager.tier_hierarchy(guild_id).await;
    if hierarchy.is_empty() {
        return reply(ctx, "No tiered roles, use `/edit_role` to add some.").await;
    }

    let body = hierarchy
        .iter()
        .map(|(level, roles)| {
            let roles = roles
                .iter()
                .map(|r| format!("{} (power {})", r.id, r.tier_power))
                .collect::<Vec<_>>()
                .join(" > ");
            format!("Level {}: {}", level, roles)
        })
        .collect::<Vec<_>>()
        .join("\n");
    reply_listing(ctx, "Tier hierarchy (role ids):", body, "tiers.txt").await
}
