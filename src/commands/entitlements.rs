use poise::serenity_prelude as serenity;

use super::{reply, require_guild};
use crate::managers::entitlement_manager::RevokeReport;
use crate::messages::format_expiration;
use crate::{Context, Error};

fn revoke_summary(member: &serenity::User, report: &RevokeReport) -> String {
    let roles = report
        .removed
        .iter()
        .map(|r| format!("<@&{}>", r))
        .collect::<Vec<_>>()
        .join(", ");
    let mut text = format!("Revoked {} from {}.", roles, member.name);
    if !report.platform_errors.is_empty() {
        text.push_str(&format!(
            "\nThe roles were removed from the records but Discord refused: {}",
            report.platform_errors.join("; ")
        ));
    }
    text
}

/// Take one licensed role away from a member
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn revoke(
    ctx: Context<'_>,
    #[description = "Member to revoke the role from"] member: serenity::User,
    #[description = "Licensed role to revoke"] role: serenity::Role,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let report = ctx
        .data()
        .entitlement_manager
        .revoke(guild_id, member.id, role.id)
        .await?;
    reply(ctx, revoke_summary(&member, &report)).await
}

/// Take every licensed role away from a member
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn revoke_all(
    ctx: Context<'_>,
    #[description = "Member to revoke all licensed roles from"] member: serenity::User,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let report = ctx
        .data()
        .entitlement_manager
        .revoke_all(guild_id, member.id)
        .await?;

    if report.removed.is_empty() {
        return reply(ctx, format!("{} has no licensed roles.", member.name)).await;
    }
    reply(ctx, revoke_summary(&member, &report)).await
}

/// Show the licensed roles of a member
#[poise::command(slash_command, guild_only)]
pub async fn member_data(
    ctx: Context<'_>,
    #[description = "Member to inspect, yourself if empty"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let member = member.as_ref().unwrap_or_else(|| ctx.author());

    // Only administrators look at other members
    if member.id != ctx.author().id {
        let is_admin = ctx
            .author_member()
            .await
            .and_then(|m| m.permissions)
            .is_some_and(|p| p.administrator());
        if !is_admin {
            return reply(ctx, "You can only look at your own licensed roles.").await;
        }
    }

    let data = ctx.data();
    let entitlements = data
        .entitlement_manager
        .member_entitlements(guild_id, member.id)
        .await;
    if entitlements.is_empty() {
        return reply(ctx, format!("{} has no licensed roles.", member.name)).await;
    }

    let timezone = data.guild_manager.settings(guild_id).await?.timezone;
    let mut embed = serenity::CreateEmbed::new()
        .title(format!("Licensed roles of {}", member.name))
        .color(0x3498db);
    for entitlement in &entitlements {
        embed = embed.field(
            format!("Role {}", entitlement.role_id),
            format!(
                "<@&{}>\nLicense: `{}`\nExpires: {}",
                entitlement.role_id,
                entitlement.license_key,
                format_expiration(entitlement.expiration, timezone)
            ),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}
