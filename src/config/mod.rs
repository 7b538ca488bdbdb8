pub mod bot;
pub mod guild;
pub mod limits;

pub use bot::BotConfig;
pub use guild::GuildSettings;
