use poise::serenity_prelude as serenity;
use tracing::info;

use crate::{Context, Error};

/// Check if the bot is running
#[poise::command(prefix_command, slash_command)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    info!("Ping command called by {}", ctx.author().name);
    ctx.send(poise::CreateReply::default()
        .content("Pong! Bot is working!")
        .ephemeral(true))
        .await?;
    Ok(())
}

/// Show help information
#[poise::command(prefix_command, slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let embed = serenity::CreateEmbed::new()
        .title("Licensy Commands")
        .description("Available commands:")
        .field("/redeem", "Redeem a license key for its roles", false)
        .field("/add_license", "Redeem a license for another member (Manage Roles)", false)
        .field("/member_data", "Show the licensed roles of a member", false)
        .field("/generate", "Generate licenses for a role packet (Admin)", false)
        .field("/licenses", "List unused licenses (Admin)", false)
        .field("/delete_license, /delete_all", "Delete licenses (Admin)", false)
        .field("/revoke, /revoke_all", "Take licensed roles away from a member (Admin)", false)
        .field("/edit_role", "Place a role in the tier hierarchy (Admin)", false)
        .field(
            "/create_role_packet, /add_packet_role, /edit_packet_role, /remove_packet_role",
            "Manage role packets (Admin)",
            false,
        )
        .field("/show_role_packets, /show_tier_hierarchy", "Inspect roles and packets (Admin)", false)
        .field("/set_reminders", "Set default or per-license reminders (Admin)", false)
        .field("/guild_info, /set_option", "Inspect and change guild settings (Admin)", false)
        .field("/license_log", "Recent license activity (Admin)", false)
        .color(0x3498db);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true)).await?;
    Ok(())
}
