use async_trait::async_trait;
use poise::serenity_prelude::{GuildId, Http, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};

/// Delivers reminder texts to members.
#[async_trait]
pub trait ReminderNotifier: Send + Sync {
    /// Send `text` to `member_id` through the channels `settings` enable.
    async fn notify(
        &self,
        guild_id: GuildId,
        settings: &GuildSettings,
        member_id: UserId,
        text: &str,
    ) -> Result<()>;
}

/// Sends reminders as DMs and/or to the guild reminders channel
pub struct DiscordNotifier {
    http: Arc<Http>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ReminderNotifier for DiscordNotifier {
    async fn notify(
        &self,
        guild_id: GuildId,
        settings: &GuildSettings,
        member_id: UserId,
        text: &str,
    ) -> Result<()> {
        let http = self.http.as_ref();
        let mut failures = Vec::new();
        let mut delivered = false;

        if settings.reminders_send_to_dm {
            match member_id.create_dm_channel(http).await {
                Ok(channel) => match channel.say(http, text).await {
                    Ok(_) => delivered = true,
                    Err(e) => failures.push(format!("DM: {}", e)),
                },
                Err(e) => failures.push(format!("DM channel: {}", e)),
            }
        }

        if let Some(channel_id) = settings.reminders_channel_id {
            let content = if settings.reminders_ping_in_reminders_channel {
                format!("<@{}> {}", member_id, text)
            } else {
                text.to_string()
            };
            match channel_id.say(http, content).await {
                Ok(_) => delivered = true,
                Err(e) => failures.push(format!("channel {}: {}", channel_id, e)),
            }
        }

        if !failures.is_empty() {
            warn!(
                "Reminder delivery to {} in guild {} partially failed: {}",
                member_id,
                guild_id,
                failures.join("; ")
            );
        }

        if delivered || failures.is_empty() {
            debug!("Reminder delivered to {} in guild {}", member_id, guild_id);
            Ok(())
        } else {
            Err(LicenseError::Collaborator {
                message: failures.join("; "),
            })
        }
    }
}

/// Shared notifier type
pub type SharedNotifier = Arc<dyn ReminderNotifier>;

pub fn create_shared_notifier(http: Arc<Http>) -> SharedNotifier {
    Arc::new(DiscordNotifier::new(http))
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records delivered reminders; members listed in `failing` error out.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(UserId, String)>>,
        pub failing: Mutex<Vec<UserId>>,
    }

    #[async_trait]
    impl ReminderNotifier for RecordingNotifier {
        async fn notify(
            &self,
            _guild_id: GuildId,
            _settings: &GuildSettings,
            member_id: UserId,
            text: &str,
        ) -> Result<()> {
            if self.failing.lock().contains(&member_id) {
                return Err(LicenseError::Collaborator {
                    message: "Cannot send messages to this user".to_string(),
                });
            }
            self.sent.lock().push((member_id, text.to_string()));
            Ok(())
        }
    }
}
