//! License log: guild-scoped events captured from tracing.
//!
//! Manager events logged with a `guild_id` field are kept in a ring buffer
//! (read by `/license_log`) and broadcast to a forwarder that posts them to
//! the guild's license log channel when one is enabled. Warnings and errors
//! also go to the guild's diagnostic channel.

use poise::serenity_prelude::{ChannelId, GuildId, Http};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn, Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::config::GuildSettings;
use crate::state::SharedDatabase;

/// Events below this target are license log candidates
pub const LICENSE_LOG_TARGET: &str = "licensy::managers";

/// A single license log entry
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: String,
    pub guild_id: GuildId,
    pub message: String,
}

impl LogEntry {
    pub fn is_problem(&self) -> bool {
        self.level == Level::WARN.as_str() || self.level == Level::ERROR.as_str()
    }

    /// Channels of the guild this entry is posted to
    pub fn destinations(&self, settings: &GuildSettings) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = settings.license_log_channel().into_iter().collect();
        if self.is_problem() {
            if let Some(diagnostic) = settings.diagnostic_channel() {
                if !channels.contains(&diagnostic) {
                    channels.push(diagnostic);
                }
            }
        }
        channels
    }

    pub fn format(&self) -> String {
        format!(
            "`{}` **{}** {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Buffer that stores recent entries and broadcasts new ones
pub struct LogBuffer {
    tx: broadcast::Sender<LogEntry>,
    /// Recent entries of every guild (ring buffer)
    recent: parking_lot::RwLock<Vec<LogEntry>>,
    max_entries: usize,
}

impl LogBuffer {
    pub fn new(max_entries: usize) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            tx,
            recent: parking_lot::RwLock::new(Vec::with_capacity(max_entries)),
            max_entries,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.max_entries {
                recent.remove(0);
            }
            recent.push(entry.clone());
        }

        // No receiver is fine
        let _ = self.tx.send(entry);
    }

    /// Latest `count` entries of one guild, oldest first
    pub fn recent_for_guild(&self, guild_id: GuildId, count: usize) -> Vec<LogEntry> {
        let recent = self.recent.read();
        let mut entries: Vec<LogEntry> = recent
            .iter()
            .rev()
            .filter(|e| e.guild_id == guild_id)
            .take(count)
            .cloned()
            .collect();
        entries.reverse();
        entries
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }
}

/// Shared log buffer type
pub type SharedLogBuffer = Arc<LogBuffer>;

pub fn create_log_buffer(max_entries: usize) -> SharedLogBuffer {
    Arc::new(LogBuffer::new(max_entries))
}

/// Tracing layer feeding the license log
pub struct LogCaptureLayer {
    buffer: SharedLogBuffer,
}

impl LogCaptureLayer {
    pub fn new(buffer: SharedLogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for LogCaptureLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with(LICENSE_LOG_TARGET) {
            return;
        }

        let mut visitor = LicenseLogVisitor::default();
        event.record(&mut visitor);
        let Some(guild_id) = visitor.guild_id else {
            return;
        };

        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now(),
            level: event.metadata().level().to_string(),
            guild_id,
            message: visitor.message,
        });
    }
}

/// Extracts the message and the `guild_id` field
#[derive(Default)]
struct LicenseLogVisitor {
    message: String,
    guild_id: Option<GuildId>,
}

impl LicenseLogVisitor {
    fn set_guild(&mut self, raw: u64) {
        if raw != 0 {
            self.guild_id = Some(GuildId::new(raw));
        }
    }
}

impl tracing::field::Visit for LicenseLogVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "guild_id" => {
                if let Ok(raw) = format!("{:?}", value).parse::<u64>() {
                    self.set_guild(raw);
                }
            }
            _ => {}
        }
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        if field.name() == "guild_id" {
            self.set_guild(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "guild_id" => {
                if let Ok(raw) = value.parse::<u64>() {
                    self.set_guild(raw);
                }
            }
            _ => {}
        }
    }
}

/// Post every new entry to its guild's license log and diagnostic channels,
/// until the buffer is dropped.
pub async fn run_license_log_forwarder(buffer: SharedLogBuffer, db: SharedDatabase, http: Arc<Http>) {
    let mut stream = BroadcastStream::new(buffer.subscribe());

    while let Some(item) = stream.next().await {
        let entry = match item {
            Ok(entry) => entry,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("License log forwarder lagged, {} entries skipped", skipped);
                continue;
            }
        };

        let channels = match db.read().await.guild(entry.guild_id) {
            Ok(guild) => entry.destinations(&guild.settings),
            Err(_) => continue,
        };

        for channel_id in channels {
            if let Err(e) = channel_id.say(http.as_ref(), entry.format()).await {
                debug!("Could not post license log entry to {}: {}", channel_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn entry(guild: u64, message: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            level: "INFO".to_string(),
            guild_id: GuildId::new(guild),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_log_buffer_per_guild() {
        let buffer = create_log_buffer(10);
        buffer.push(entry(1, "Message 1"));
        buffer.push(entry(2, "Other guild"));
        buffer.push(entry(1, "Message 2"));

        let recent = buffer.recent_for_guild(GuildId::new(1), 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "Message 1");
        assert_eq!(recent[1].message, "Message 2");
        assert_eq!(buffer.recent_for_guild(GuildId::new(1), 1)[0].message, "Message 2");
    }

    #[test]
    fn test_log_buffer_overflow() {
        let buffer = create_log_buffer(2);
        for i in 1..=5 {
            buffer.push(entry(1, &format!("Message {}", i)));
        }

        let recent = buffer.recent_for_guild(GuildId::new(1), 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "Message 4");
        assert_eq!(recent[1].message, "Message 5");
    }

    #[test]
    fn test_capture_only_guild_scoped_manager_events() {
        let buffer = create_log_buffer(10);
        let subscriber =
            tracing_subscriber::registry().with(LogCaptureLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let guild_id = GuildId::new(42);
            tracing::info!(target: "licensy::managers::license_manager", guild_id = %guild_id, "Generated 3 licenses");
            tracing::info!(target: "licensy::managers::license_manager", "No guild here");
            tracing::info!(target: "serenity::gateway", guild_id = %guild_id, "Heartbeat");
        });

        let recent = buffer.recent_for_guild(GuildId::new(42), 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "Generated 3 licenses");
        assert_eq!(recent[0].level, "INFO");
    }

    #[test]
    fn test_problems_reach_diagnostic_channel() {
        let mut settings = GuildSettings::default();
        let info = entry(1, "Redeemed");
        let mut warning = entry(1, "Role 5 committed but not applied on Discord");
        warning.level = Level::WARN.to_string();
        assert!(info.destinations(&settings).is_empty());
        assert!(warning.destinations(&settings).is_empty());

        settings.diagnostic_channel_enabled = true;
        settings.diagnostic_channel_id = Some(ChannelId::new(20));
        assert!(info.destinations(&settings).is_empty());
        assert_eq!(warning.destinations(&settings), vec![ChannelId::new(20)]);

        settings.license_log_channel_enabled = true;
        settings.license_log_channel_id = Some(ChannelId::new(10));
        assert_eq!(info.destinations(&settings), vec![ChannelId::new(10)]);
        assert_eq!(
            warning.destinations(&settings),
            vec![ChannelId::new(10), ChannelId::new(20)]
        );

        // One post when both point at the same channel
        settings.diagnostic_channel_id = Some(ChannelId::new(10));
        assert_eq!(warning.destinations(&settings), vec![ChannelId::new(10)]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let buffer = create_log_buffer(10);
        let mut stream = BroadcastStream::new(buffer.subscribe());
        buffer.push(entry(3, "Redeemed"));

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.guild_id, GuildId::new(3));
        assert!(received.format().contains("Redeemed"));
    }
}
