pub mod entitlements;
pub mod general;
pub mod licenses;
pub mod roles;
pub mod settings;

pub use entitlements::{member_data, revoke, revoke_all};
pub use general::{help, ping};
pub use licenses::{
    add_license, delete_all, delete_license, generate, licenses, redeem, set_reminders,
};
pub use roles::{
    add_packet_role, create_role_packet, delete_role_packet, edit_packet_role, edit_role,
    remove_packet_role, set_packet_message, show_role_packets, show_tier_hierarchy,
};
pub use settings::{guild_info, license_log, set_option};

use poise::serenity_prelude as serenity;

use crate::{Context, Error};

/// Discord refuses message contents above 2000 characters
const MAX_MESSAGE_LENGTH: usize = 1900;

/// Guild the command was invoked in
pub(crate) fn require_guild(ctx: Context<'_>) -> Result<serenity::GuildId, Error> {
    ctx.guild_id()
        .ok_or_else(|| "This command can only be used in a guild".into())
}

/// Ephemeral plain reply
pub(crate) async fn reply(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content)
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Ephemeral reply with a listing, sent as a text file when too long for a message
pub(crate) async fn reply_listing(
    ctx: Context<'_>,
    title: &str,
    body: String,
    filename: &str,
) -> Result<(), Error> {
    let reply = if title.len() + body.len() < MAX_MESSAGE_LENGTH {
        poise::CreateReply::default().content(format!("{}\n```\n{}\n```", title, body))
    } else {
        poise::CreateReply::default()
            .content(title)
            .attachment(serenity::CreateAttachment::bytes(body.into_bytes(), filename))
    };
    ctx.send(reply.ephemeral(true)).await?;
    Ok(())
}

/// Parse reminder offsets typed as `"720, 60, 10"`
pub(crate) fn parse_offsets(raw: &str) -> Result<Vec<i64>, Error> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| Error::from(format!("'{}' is not a number of minutes", part)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offsets() {
        assert_eq!(parse_offsets("720, 60,10").unwrap(), vec![720, 60, 10]);
        assert_eq!(parse_offsets("  5 ").unwrap(), vec![5]);
        assert!(parse_offsets("").unwrap().is_empty());
        assert!(parse_offsets("12h").is_err());
    }
}
