//! Hard limits shared by the whole bot.

/// Maximum number of active (unredeemed) licenses a single guild can hold.
pub const MAXIMUM_UNUSED_GUILD_LICENSES: usize = 100;

/// Maximum possible hours in 12 months (leap year).
pub const MAXIMUM_LICENSE_DURATION_HOURS: i64 = 8784;

/// Same limit expressed in minutes, which is the unit durations are stored in.
pub const MAXIMUM_LICENSE_DURATION_MINUTES: i64 = MAXIMUM_LICENSE_DURATION_HOURS * 60;

pub const MAX_PREFIX_LENGTH: usize = 10;
pub const MAX_BRANDING_LENGTH: usize = 50;
pub const MAX_LICENSE_FORMAT_LENGTH: usize = 100;
pub const MAX_PACKET_NAME_LENGTH: usize = 50;
pub const MAX_CUSTOM_MESSAGE_LENGTH: usize = 1600;

/// Licenses shorter than this are rejected.
pub const KEY_MIN_LENGTH: usize = 14;

/// Upper bound for `uses_left` on multi-use licenses.
pub const MAXIMUM_USES_LEFT: u32 = 1_000_000;

/// Maximum roles in a single role packet.
pub const MAXIMUM_ROLES: usize = 20;

pub const MAX_TIER_LEVEL: u8 = 100;
pub const MAX_TIER_POWER: u8 = 9;

/// Valid guild timezone offsets from UTC.
pub const TIMEZONE_RANGE: std::ops::RangeInclusive<i8> = -12..=14;

/// Two letter ISO 639-1 codes the bot has messages for.
pub const SUPPORTED_LANGUAGES: &[&str] = &["en"];

/// Default minutes-before-expiration of the first reminder.
pub const DEFAULT_FIRST_ACTIVATION: i64 = 720;

/// How many licenses `/generate` may create in one call.
pub const MAXIMUM_GENERATE_AMOUNT: usize = 100;

/// Seconds after a grant during which a member update missing the role is
/// not treated as a manual removal. Covers the redemption's own role calls.
pub const ROLE_SYNC_GRACE_SECONDS: i64 = 120;
