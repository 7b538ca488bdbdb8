use anyhow::Result;
use clap::Parser;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Discord bot selling roles through time-limited license keys
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Force re-sync of slash commands to all guilds (use when commands aren't showing up)
    #[arg(long, short = 's')]
    sync_commands: bool,

    /// Register commands per-guild instead of globally (faster for testing)
    #[arg(long)]
    guild_commands: bool,

    /// Specific guild ID to sync commands to (for testing)
    #[arg(long)]
    guild_id: Option<u64>,

    /// Seconds between expiration and reminder sweeps, overrides SWEEP_INTERVAL_SECS
    #[arg(long)]
    sweep_interval: Option<u64>,
}

mod commands;
mod config;
mod error;
mod events;
mod logging;
mod managers;
mod messages;
mod models;
mod state;

use commands::{
    add_license, add_packet_role, create_role_packet, delete_all, delete_license,
    delete_role_packet, edit_packet_role, edit_role, generate, guild_info, help, license_log,
    licenses, member_data, ping, redeem, remove_packet_role, revoke, revoke_all, set_option,
    set_packet_message, set_reminders, show_role_packets, show_tier_hierarchy,
};
use config::BotConfig;
use events::{
    handle_guild_create, handle_guild_delete, handle_member_removal, handle_member_update,
    handle_role_delete,
};
use logging::SharedLogBuffer;
use managers::{
    create_shared_entitlement_manager, create_shared_guild_manager, create_shared_license_manager,
    create_shared_notifier, create_shared_reminder_manager, create_shared_role_gateway,
    LicenseFormatter, SharedEntitlementManager, SharedGuildManager, SharedLicenseManager,
    SharedReminderManager,
};
use state::{create_shared_database, Database, SharedDatabase};

type Error = Box<dyn std::error::Error + Send + Sync>;
type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared application state
pub struct Data {
    pub config: BotConfig,
    pub db: SharedDatabase,
    pub log_buffer: SharedLogBuffer,
    pub guild_manager: SharedGuildManager,
    pub license_manager: SharedLicenseManager,
    pub entitlement_manager: SharedEntitlementManager,
    pub reminder_manager: SharedReminderManager,
}

async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            if let Err(e) = handle_guild_create(guild, data).await {
                error!("Failed to handle guild create: {}", e);
            }
        }
        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            if let Err(e) = handle_guild_delete(incomplete, data).await {
                error!("Failed to handle guild delete: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            if let Err(e) = handle_member_removal(*guild_id, user, data).await {
                error!("Failed to handle member removal: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberUpdate { event, .. } => {
            if let Err(e) = handle_member_update(event, data).await {
                error!("Failed to handle member update: {}", e);
            }
        }
        serenity::FullEvent::GuildRoleDelete {
            guild_id,
            removed_role_id,
            ..
        } => {
            if let Err(e) = handle_role_delete(*guild_id, *removed_role_id, data).await {
                error!("Failed to handle role delete: {}", e);
            }
        }
        _ => {}
    }
    Ok(())
}

/// Prefix for prefix commands, the guild's own when set
async fn guild_prefix(ctx: poise::PartialContext<'_, Data, Error>) -> Result<Option<String>, Error> {
    let data = ctx.data;
    let Some(guild_id) = ctx.guild_id else {
        return Ok(Some(data.config.default_prefix.clone()));
    };
    let prefix = match data.guild_manager.settings(guild_id).await {
        Ok(settings) => settings.prefix(&data.config.default_prefix).to_string(),
        Err(_) => data.config.default_prefix.clone(),
    };
    Ok(Some(prefix))
}

/// Run the expiration and reminder sweeps every `period`. A tick arriving
/// while the previous sweep still runs is dropped.
fn spawn_sweeps(
    entitlements: SharedEntitlementManager,
    reminders: SharedReminderManager,
    period: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = entitlements
                .run_expiration_sweep(chrono::Utc::now())
                .await
            {
                error!("Expiration sweep failed: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = reminders.run_reminder_sweep(chrono::Utc::now()).await {
                error!("Reminder sweep failed: {}", e);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let mut config = BotConfig::from_env();
    if let Some(secs) = args.sweep_interval.filter(|s| *s > 0) {
        config.sweep_interval = Duration::from_secs(secs);
    }

    // License log buffer, also forwarded to guild log channels
    let log_buffer = logging::create_log_buffer(config.log_buffer_size);

    // Initialize tracing with our custom layer
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(logging::LogCaptureLayer::new(log_buffer.clone()))
        .init();

    let token = std::env::var("DISCORD_TOKEN").expect("Missing DISCORD_TOKEN environment variable");

    // Extract bot/application ID from token (first part before the dot, base64 encoded)
    if let Some(bot_id_b64) = token.split('.').next() {
        use base64::Engine;
        let decoded = base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(bot_id_b64)
            .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bot_id_b64));
        if let Some(id_str) = decoded.ok().and_then(|d| String::from_utf8(d).ok()) {
            info!("Bot ID: {} (configure intents at https://discord.com/developers/applications/{}/bot)", id_str, id_str);
        }
    }

    // Ensure state directory exists
    tokio::fs::create_dir_all(&config.state_path).await.ok();

    let database_path = config.database_path();
    info!("Loading database from {}...", database_path);
    let database = Database::load(&database_path).await?;
    info!(
        "Loaded {} guilds and {} licenses",
        database.guilds.len(),
        database.licenses.len()
    );
    let db = create_shared_database(database, Some(database_path));

    let formatter = LicenseFormatter::default();
    let guild_manager = create_shared_guild_manager(db.clone(), formatter.clone());
    let license_manager = create_shared_license_manager(db.clone(), formatter);

    // Extract CLI flags for use in setup
    let sync_commands = args.sync_commands;
    let guild_commands = args.guild_commands;
    let target_guild_id = args.guild_id;

    if sync_commands {
        info!("--sync-commands: Will force re-register slash commands");
    }
    if guild_commands {
        info!("--guild-commands: Will register commands per-guild (faster for testing)");
    } else {
        info!("Registering commands globally by default (takes up to 1 hour to propagate)");
    }
    if let Some(gid) = target_guild_id {
        info!("--guild-id: Targeting specific guild {}", gid);
    }
    info!("Sweeps run every {:?}", config.sweep_interval);

    let default_prefix = config.default_prefix.clone();

    // Build framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                ping(),
                help(),
                redeem(),
                add_license(),
                generate(),
                licenses(),
                delete_license(),
                delete_all(),
                set_reminders(),
                revoke(),
                revoke_all(),
                member_data(),
                edit_role(),
                create_role_packet(),
                add_packet_role(),
                remove_packet_role(),
                edit_packet_role(),
                delete_role_packet(),
                set_packet_message(),
                show_role_packets(),
                show_tier_hierarchy(),
                guild_info(),
                set_option(),
                license_log(),
            ],
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(default_prefix),
                dynamic_prefix: Some(|ctx| Box::pin(guild_prefix(ctx))),
                ..Default::default()
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            pre_command: |ctx| {
                Box::pin(async move {
                    info!(
                        "Command '{}' invoked by {} (ID: {}) in {}",
                        ctx.command().qualified_name,
                        ctx.author().name,
                        ctx.author().id,
                        ctx.guild_id().map(|g| g.to_string()).unwrap_or_else(|| "DM".to_string())
                    );
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    match error {
                        poise::FrameworkError::Command { error, ctx, .. } => {
                            warn!("Error in command '{}': {}", ctx.command().qualified_name, error);
                            let _ = ctx
                                .send(
                                    poise::CreateReply::default()
                                        .content(format!("❌ {}", error))
                                        .ephemeral(true),
                                )
                                .await;
                        }
                        poise::FrameworkError::ArgumentParse { error, input, ctx, .. } => {
                            error!("Argument parse error in '{}': {} (input: {:?})", ctx.command().qualified_name, error, input);
                            let _ = ctx.say(format!("Invalid argument: {}", error)).await;
                        }
                        poise::FrameworkError::MissingBotPermissions { missing_permissions, ctx, .. } => {
                            error!("Bot missing permissions for '{}': {:?}", ctx.command().qualified_name, missing_permissions);
                            let _ = ctx.say(format!("Bot is missing permissions: {:?}", missing_permissions)).await;
                        }
                        poise::FrameworkError::MissingUserPermissions { missing_permissions, ctx, .. } => {
                            error!("User {} missing permissions for '{}': {:?}", ctx.author().name, ctx.command().qualified_name, missing_permissions);
                        }
                        poise::FrameworkError::GuildOnly { ctx, .. } => {
                            error!("Command '{}' is guild-only, used in DM by {}", ctx.command().qualified_name, ctx.author().name);
                        }
                        other => {
                            error!("Other framework error: {}", other);
                        }
                    }
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            let db = db.clone();
            let guild_manager = guild_manager.clone();
            let license_manager = license_manager.clone();
            let log_buffer = log_buffer.clone();
            let config = config.clone();

            Box::pin(async move {
                info!("Bot logged in as: {}", ready.user.name);

                for guild in &ready.guilds {
                    if let Err(e) = guild_manager.ensure_guild(guild.id).await {
                        error!("Failed to register guild {}: {}", guild.id, e);
                    }
                }

                let gateway = create_shared_role_gateway(ctx.http.clone());
                let notifier = create_shared_notifier(ctx.http.clone());
                let entitlement_manager =
                    create_shared_entitlement_manager(db.clone(), license_manager.clone(), gateway);
                let reminder_manager = create_shared_reminder_manager(db.clone(), notifier);

                spawn_sweeps(
                    entitlement_manager.clone(),
                    reminder_manager.clone(),
                    config.sweep_interval,
                );
                tokio::spawn(logging::run_license_log_forwarder(
                    log_buffer.clone(),
                    db.clone(),
                    ctx.http.clone(),
                ));

                // Determine which guilds to register commands for
                let guilds_to_register: Vec<serenity::GuildId> = if let Some(gid) = target_guild_id {
                    vec![serenity::GuildId::new(gid)]
                } else {
                    ready.guilds.iter().map(|g| g.id).collect()
                };

                if guild_commands || sync_commands {
                    // Register commands per-guild (faster for testing)
                    for guild_id in &guilds_to_register {
                        info!("Registering commands to guild: {}", guild_id);
                        if let Err(e) = poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            *guild_id,
                        ).await {
                            error!("Failed to register commands for guild {}: {}", guild_id, e);
                        } else {
                            info!("Successfully registered {} commands for guild {}",
                                  framework.options().commands.len(), guild_id);
                        }
                    }
                } else {
                    info!("Registering commands globally...");
                    if let Err(e) = poise::builtins::register_globally(
                        ctx,
                        &framework.options().commands,
                    ).await {
                        error!("Failed to register commands globally: {}", e);
                    } else {
                        info!("Successfully registered {} commands globally (may take up to 1 hour to propagate)",
                              framework.options().commands.len());
                    }
                }

                Ok(Data {
                    config,
                    db,
                    log_buffer,
                    guild_manager,
                    license_manager,
                    entitlement_manager,
                    reminder_manager,
                })
            })
        })
        .build();

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_MEMBERS;

    // Log which privileged intents we're requesting
    let privileged_intents: Vec<&str> = [
        (serenity::GatewayIntents::MESSAGE_CONTENT, "MESSAGE_CONTENT"),
        (serenity::GatewayIntents::GUILD_MEMBERS, "GUILD_MEMBERS"),
        (serenity::GatewayIntents::GUILD_PRESENCES, "GUILD_PRESENCES"),
    ]
    .into_iter()
    .filter(|(intent, _)| intents.contains(*intent))
    .map(|(_, name)| name)
    .collect();

    info!("Requesting privileged intents: {:?}", privileged_intents);

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;

    info!("Starting bot...");
    if let Err(e) = client.start().await {
        // Check if it's a disallowed intents error
        let err_str = e.to_string();
        if err_str.contains("Disallowed") || err_str.contains("intents") {
            error!("Failed to start bot: {}", e);
            error!("The following privileged intents need to be enabled in the Discord Developer Portal:");
            for intent in &privileged_intents {
                error!("  - {}", intent);
            }
            error!("Go to https://discord.com/developers/applications -> Your App -> Bot -> Privileged Gateway Intents");
            return Err(anyhow::anyhow!(
                "Disallowed gateway intents. Enable these in Discord Developer Portal: {:?}",
                privileged_intents
            ));
        }
        return Err(e.into());
    }
    warn!("Bot ended.");

    Ok(())
}
