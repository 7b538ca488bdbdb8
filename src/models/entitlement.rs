use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// A member paired with a license they redeemed. Unique per (member, license).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensedMember {
    pub id: u64,
    pub member_id: UserId,
    pub guild_id: GuildId,
    pub license_key: String,
}

/// One granted role instance. `expiration == None` never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensedRole {
    pub id: u64,
    pub licensed_member_id: u64,
    pub role_id: RoleId,
    pub expiration: Option<DateTime<Utc>>,
    /// Last time a redemption granted or extended this role
    #[serde(default)]
    pub touched_at: DateTime<Utc>,
}

/// Remaining time of an entitlement, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remaining {
    Permanent,
    Minutes(i64),
}

impl Remaining {
    /// Duration in minutes, with 0 meaning permanent.
    pub fn from_duration(minutes: i64) -> Self {
        if minutes == 0 {
            Remaining::Permanent
        } else {
            Remaining::Minutes(minutes)
        }
    }

    /// Sum two durations; anything permanent stays permanent.
    pub fn merge(self, other: Remaining) -> Remaining {
        match (self, other) {
            (Remaining::Minutes(a), Remaining::Minutes(b)) => Remaining::Minutes(a.saturating_add(b)),
            _ => Remaining::Permanent,
        }
    }

    /// Expiration timestamp `now + remaining`
    pub fn expiration(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Remaining::Permanent => None,
            Remaining::Minutes(minutes) => Some(now + Duration::minutes(minutes)),
        }
    }
}

impl LicensedRole {
    /// Time left, rounded to the nearest minute
    pub fn remaining(&self, now: DateTime<Utc>) -> Remaining {
        match self.expiration {
            None => Remaining::Permanent,
            Some(expiration) => {
                let seconds = (expiration - now).num_seconds().max(0);
                Remaining::Minutes((seconds + 30) / 60)
            }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration <= now)
    }

    /// Whether a redemption changed this role less than `grace_seconds` ago
    pub fn recently_touched(&self, now: DateTime<Utc>, grace_seconds: i64) -> bool {
        (now - self.touched_at).num_seconds() < grace_seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_minutes() {
        let now = Utc::now();
        let role = LicensedRole {
            id: 1,
            licensed_member_id: 1,
            role_id: RoleId::new(1),
            expiration: Some(now + Duration::minutes(100)),
            touched_at: now,
        };
        assert_eq!(role.remaining(now), Remaining::Minutes(100));
        assert!(!role.is_expired(now));
        assert!(role.is_expired(now + Duration::minutes(100)));
        assert_eq!(role.remaining(now + Duration::minutes(200)), Remaining::Minutes(0));
        assert_eq!(
            role.remaining(now + Duration::milliseconds(1500)),
            Remaining::Minutes(100)
        );
        assert!(role.recently_touched(now + Duration::seconds(30), 60));
        assert!(!role.recently_touched(now + Duration::seconds(60), 60));
    }

    #[test]
    fn test_merge() {
        assert_eq!(
            Remaining::Minutes(100).merge(Remaining::Minutes(60)),
            Remaining::Minutes(160)
        );
        assert_eq!(
            Remaining::Minutes(100).merge(Remaining::Permanent),
            Remaining::Permanent
        );
        assert_eq!(Remaining::from_duration(0), Remaining::Permanent);
        assert_eq!(Remaining::Permanent.expiration(Utc::now()), None);
    }
}
