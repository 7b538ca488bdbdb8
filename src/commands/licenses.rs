use poise::serenity_prelude as serenity;
use tracing::{error, info};

use super::{parse_offsets, reply, reply_listing, require_guild};
use crate::error::ErrorKind;
use crate::managers::RedemptionResult;
use crate::messages;
use crate::models::LicenseKind;
use crate::{Context, Error};

/// Redeem a license key
#[poise::command(slash_command, prefix_command)]
pub async fn redeem(
    ctx: Context<'_>,
    #[description = "License key to redeem"] key: String,
) -> Result<(), Error> {
    let key = key.trim();
    let data = ctx.data();

    // In DMs the license itself tells which guild it is for
    let guild_id = match ctx.guild_id() {
        Some(guild_id) => guild_id,
        None => {
            let db = data.db.read().await;
            let resolved = db.license(key).ok().map(|license| license.guild_id).filter(|guild_id| {
                db.guild(*guild_id)
                    .is_ok_and(|guild| guild.settings.enable_dm_redeem)
            });
            drop(db);
            match resolved {
                Some(guild_id) => guild_id,
                None => {
                    reply(ctx, messages::redeem_failure_message("Redeeming in DMs is not available for this license.")).await?;
                    return Ok(());
                }
            }
        }
    };

    ctx.defer_ephemeral().await?;

    let result = match data
        .entitlement_manager
        .redeem(guild_id, ctx.author().id, key)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            match e.kind() {
                ErrorKind::Internal => error!("Redeem by {} failed: {}", ctx.author().name, e),
                _ => info!("Redeem by {} rejected: {}", ctx.author().name, e),
            }
            reply(ctx, messages::redeem_failure_message(&e.to_string())).await?;
            return Ok(());
        }
    };

    let timezone = data.guild_manager.settings(guild_id).await?.timezone;
    reply(ctx, messages::redeem_success_message(&result.packet_name, &redemption_lines(&result, timezone))).await
}

fn redemption_lines(result: &RedemptionResult, timezone: i8) -> Vec<String> {
    let mut lines: Vec<String> = result
        .roles
        .iter()
        .map(|report| messages::role_report_line(report, timezone))
        .collect();
    if result.has_platform_errors() {
        lines.push(String::new());
        lines.push("Some roles are recorded but Discord refused the change, ask an admin to check the bot's role position.".to_string());
    }
    if !result.custom_message.is_empty() {
        lines.push(String::new());
        lines.push(result.custom_message.clone());
    }
    lines
}

/// Redeem a license on behalf of a member
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "MANAGE_ROLES"
)]
pub async fn add_license(
    ctx: Context<'_>,
    #[description = "License key to redeem"] key: String,
    #[description = "Member receiving the roles"] member: serenity::User,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let data = ctx.data();
    ctx.defer_ephemeral().await?;

    let result = match data
        .entitlement_manager
        .redeem(guild_id, member.id, key.trim())
        .await
    {
        Ok(result) => result,
        Err(e) => {
            info!("{} could not add a license to {}: {}", ctx.author().name, member.name, e);
            reply(ctx, messages::redeem_failure_message(&e.to_string())).await?;
            return Ok(());
        }
    };

    let timezone = data.guild_manager.settings(guild_id).await?.timezone;
    let mut lines = vec![format!("Redeemed for <@{}>.", member.id), String::new()];
    lines.extend(redemption_lines(&result, timezone));
    reply(ctx, messages::redeem_success_message(&result.packet_name, &lines)).await
}

/// Generate licenses for a role packet
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn generate(
    ctx: Context<'_>,
    #[description = "Role packet the licenses unlock"] packet: String,
    #[description = "License type"] kind: LicenseKind,
    #[description = "How many licenses to generate"] amount: Option<usize>,
    #[description = "Uses per multi-use license"] uses: Option<u32>,
    #[description = "Reminder minutes before expiration, e.g. \"720, 60\""] reminders: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let amount = amount.unwrap_or(1);
    let reminders = reminders.as_deref().map(parse_offsets).transpose()?;

    let created = ctx
        .data()
        .license_manager
        .generate_licenses(guild_id, kind, &packet, uses, reminders.as_deref(), amount)
        .await?;

    let keys = created
        .iter()
        .map(|license| license.key.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    reply_listing(
        ctx,
        &format!("Generated {} license(s) for packet **{}**:", created.len(), packet),
        keys,
        "licenses.txt",
    )
    .await
}

/// List unused licenses
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn licenses(
    ctx: Context<'_>,
    #[description = "Only licenses of this role packet"] packet: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let licenses = ctx
        .data()
        .license_manager
        .list_licenses(guild_id, packet.as_deref())
        .await?;

    if licenses.is_empty() {
        return reply(ctx, "No unused licenses.").await;
    }

    let db = ctx.data().db.read().await;
    let body = licenses
        .iter()
        .map(|license| {
            let packet_name = db
                .packet(license.role_packet_id)
                .map(|p| p.name.as_str())
                .unwrap_or("?");
            match license.uses_left() {
                Some(uses) => format!("{} {} [{}, {} uses left]", license.key, packet_name, license.variant_name(), uses),
                None => format!("{} {} [{}]", license.key, packet_name, license.variant_name()),
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    drop(db);

    reply_listing(ctx, &format!("{} unused license(s):", licenses.len()), body, "licenses.txt").await
}

/// Delete a single license
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn delete_license(
    ctx: Context<'_>,
    #[description = "License key to delete"] key: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    ctx.data()
        .license_manager
        .delete_license(guild_id, key.trim())
        .await?;
    reply(ctx, format!("License `{}` deleted.", key.trim())).await
}

/// Delete every license of this guild
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn delete_all(
    ctx: Context<'_>,
    #[description = "Type \"confirm\" to delete all licenses"] confirm: String,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    if confirm != "confirm" {
        return reply(ctx, "Nothing deleted, type `confirm` to delete all licenses.").await;
    }

    let deleted = ctx.data().license_manager.delete_all_licenses(guild_id).await?;
    reply(ctx, format!("Deleted {} license(s).", deleted)).await
}

/// Set reminder minutes for new licenses, or for one existing license
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn set_reminders(
    ctx: Context<'_>,
    #[description = "Minutes before expiration, highest first, e.g. \"720, 60, 10\""] offsets: String,
    #[description = "Only change this license"] license: Option<String>,
) -> Result<(), Error> {
    let guild_id = require_guild(ctx)?;
    let offsets = parse_offsets(&offsets)?;

    match license {
        Some(key) => {
            let rescheduled = ctx
                .data()
                .license_manager
                .set_license_reminders(guild_id, key.trim(), &offsets)
                .await?;
            reply(
                ctx,
                format!(
                    "Reminders of `{}` set to {:?} minutes, {} active role(s) rescheduled.",
                    key.trim(),
                    offsets,
                    rescheduled
                ),
            )
            .await
        }
        None => {
            ctx.data()
                .reminder_manager
                .set_reminder_defaults(guild_id, &offsets)
                .await?;
            reply(
                ctx,
                format!("Default reminders set to {:?} minutes for new licenses.", offsets),
            )
            .await
        }
    }
}
