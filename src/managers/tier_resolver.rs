//! Decides what happens when a tiered role is granted to a member who
//! already holds roles on the same tier level.

use chrono::{DateTime, Utc};

use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};
use crate::models::{LicensedRole, Remaining, Role};

/// A role the member currently holds, with its resolved role row.
#[derive(Debug, Clone)]
pub struct HeldRole {
    pub licensed_role: LicensedRole,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TierDecision {
    /// Nothing on the candidate's tier level, grant as requested
    NoConflict,

    /// Candidate outranks the held roles on its level: revoke them, grant the
    /// candidate for `granted`
    Upgrade {
        replaced: Vec<LicensedRole>,
        granted: Remaining,
    },

    /// Member already holds a superior role on that level, the candidate is
    /// not granted. `extended` is the superior role's new remaining duration
    /// when the guild preserves durations on a miss.
    Miss {
        superior: LicensedRole,
        extended: Option<Remaining>,
    },
}

/// Resolve `candidate` requested for `requested` against the member's holdings.
///
/// Duplicates of the candidate itself must be handled before calling this.
pub fn resolve(
    candidate: &Role,
    requested: Remaining,
    held: &[HeldRole],
    settings: &GuildSettings,
    now: DateTime<Utc>,
) -> Result<TierDecision> {
    if !candidate.is_tiered() {
        return Ok(TierDecision::NoConflict);
    }

    let same_level: Vec<&HeldRole> = held
        .iter()
        .filter(|h| h.role.id != candidate.id && h.role.tier_level == candidate.tier_level)
        .collect();

    if same_level.is_empty() {
        return Ok(TierDecision::NoConflict);
    }

    if let Some(collision) = same_level
        .iter()
        .find(|h| h.role.tier_power == candidate.tier_power)
    {
        return Err(LicenseError::internal(format!(
            "Roles {} and {} share tier slot ({}, {})",
            collision.role.id, candidate.id, candidate.tier_level, candidate.tier_power
        )));
    }

    let superior = same_level
        .iter()
        .filter(|h| h.role.tier_power > candidate.tier_power)
        .max_by_key(|h| h.role.tier_power);

    if let Some(superior) = superior {
        let extended = settings
            .preserve_previous_duration_tier_miss
            .then(|| superior.licensed_role.remaining(now).merge(requested));

        return Ok(TierDecision::Miss {
            superior: superior.licensed_role.clone(),
            extended,
        });
    }

    // Every held role on this level is weaker
    let replaced: Vec<LicensedRole> = same_level
        .iter()
        .map(|h| h.licensed_role.clone())
        .collect();

    let granted = if settings.preserve_previous_duration_tier_upgrade {
        replaced
            .iter()
            .fold(requested, |total, r| total.merge(r.remaining(now)))
    } else {
        requested
    };

    Ok(TierDecision::Upgrade { replaced, granted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Duration;
    use poise::serenity_prelude::{GuildId, RoleId};

    fn role(id: u64, tier_level: u8, tier_power: u8) -> Role {
        Role {
            id: RoleId::new(id),
            guild_id: GuildId::new(1),
            tier_level,
            tier_power,
        }
    }

    fn held(role: Role, minutes: i64, now: DateTime<Utc>) -> HeldRole {
        HeldRole {
            licensed_role: LicensedRole {
                id: role.id.get() * 100,
                licensed_member_id: 1,
                role_id: role.id,
                expiration: Some(now + Duration::minutes(minutes)),
                touched_at: now,
            },
            role,
        }
    }

    #[test]
    fn test_untiered_never_conflicts() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 1), 100, now)];
        let decision = resolve(
            &role(2, 0, 1),
            Remaining::Minutes(60),
            &holdings,
            &GuildSettings::default(),
            now,
        )
        .unwrap();
        assert_eq!(decision, TierDecision::NoConflict);
    }

    #[test]
    fn test_other_level_no_conflict() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 2, 5), 100, now)];
        let decision = resolve(
            &role(2, 1, 1),
            Remaining::Minutes(60),
            &holdings,
            &GuildSettings::default(),
            now,
        )
        .unwrap();
        assert_eq!(decision, TierDecision::NoConflict);
    }

    #[test]
    fn test_upgrade_absorbs_remaining() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 1), 100, now)];
        let mut settings = GuildSettings::default();
        settings.preserve_previous_duration_tier_upgrade = true;

        match resolve(&role(2, 1, 2), Remaining::Minutes(60), &holdings, &settings, now).unwrap() {
            TierDecision::Upgrade { replaced, granted } => {
                assert_eq!(replaced.len(), 1);
                assert_eq!(replaced[0].role_id, RoleId::new(1));
                assert_eq!(granted, Remaining::Minutes(160));
            }
            other => panic!("expected upgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_upgrade_without_preserving() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 1), 100, now)];
        let mut settings = GuildSettings::default();
        settings.preserve_previous_duration_tier_upgrade = false;

        match resolve(&role(2, 1, 2), Remaining::Minutes(60), &holdings, &settings, now).unwrap() {
            TierDecision::Upgrade { granted, .. } => assert_eq!(granted, Remaining::Minutes(60)),
            other => panic!("expected upgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_miss_without_preserving() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 2), 100, now)];
        let mut settings = GuildSettings::default();
        settings.preserve_previous_duration_tier_miss = false;

        match resolve(&role(2, 1, 1), Remaining::Minutes(60), &holdings, &settings, now).unwrap() {
            TierDecision::Miss { superior, extended } => {
                assert_eq!(superior.role_id, RoleId::new(1));
                assert_eq!(extended, None);
            }
            other => panic!("expected miss, got {:?}", other),
        }
    }

    #[test]
    fn test_miss_extends_superior() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 2), 100, now)];

        match resolve(
            &role(2, 1, 1),
            Remaining::Minutes(60),
            &holdings,
            &GuildSettings::default(),
            now,
        )
        .unwrap()
        {
            TierDecision::Miss { extended, .. } => {
                assert_eq!(extended, Some(Remaining::Minutes(160)))
            }
            other => panic!("expected miss, got {:?}", other),
        }
    }

    #[test]
    fn test_same_slot_is_internal_error() {
        let now = Utc::now();
        let holdings = vec![held(role(1, 1, 1), 100, now)];
        let err = resolve(
            &role(2, 1, 1),
            Remaining::Minutes(60),
            &holdings,
            &GuildSettings::default(),
            now,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
