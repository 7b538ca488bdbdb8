use chrono::{DateTime, Utc};
use poise::serenity_prelude::GuildId;
use serde::{Deserialize, Serialize};

use crate::config::limits::{KEY_MIN_LENGTH, MAXIMUM_USES_LEFT};
use crate::error::{LicenseError, Result};

/// Variant-specific license payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LicenseVariant {
    /// Consumed entirely on the first redemption
    SingleUse,
    /// Can be redeemed `uses_left` more times (useful for giveaways)
    MultiUse { uses_left: u32 },
    /// Replaced by a fresh key with the same packet once redeemed
    Regenerating,
}

/// Variant selector used when creating licenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum LicenseKind {
    #[name = "single"]
    SingleUse,
    #[name = "multi"]
    MultiUse,
    #[name = "regenerating"]
    Regenerating,
}

impl LicenseKind {
    /// Build the variant payload, `uses` only applies to multi-use licenses.
    pub fn into_variant(self, uses: Option<u32>) -> Result<LicenseVariant> {
        match self {
            LicenseKind::SingleUse => Ok(LicenseVariant::SingleUse),
            LicenseKind::Regenerating => Ok(LicenseVariant::Regenerating),
            LicenseKind::MultiUse => {
                let uses_left = uses.unwrap_or(1);
                if uses_left == 0 {
                    return Err(LicenseError::configuration(
                        "Multi-use license needs at least one use.",
                    ));
                }
                if uses_left > MAXIMUM_USES_LEFT {
                    return Err(LicenseError::configuration(format!(
                        "License number of uses is too big, maximum is {}.",
                        MAXIMUM_USES_LEFT
                    )));
                }
                Ok(LicenseVariant::MultiUse { uses_left })
            }
        }
    }
}

/// A redeemable key bound to one guild and one role packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub key: String,
    pub guild_id: GuildId,
    pub role_packet_id: u64,
    pub reminder_activations_id: u64,

    /// Set once fully consumed; inactive licenses are never redeemable again
    pub inactive: bool,

    pub variant: LicenseVariant,
    pub created_at: DateTime<Utc>,
}

/// What a single consumption left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    StillActive { uses_left: u32 },
    Exhausted,
}

/// What the lifecycle manager must do once a license is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedAction {
    Deactivate,
    Regenerate,
}

/// Operations every license variant supports.
pub trait LicenseCapabilities {
    /// Check the license can be redeemed in `guild_id` right now.
    fn validate(&self, guild_id: GuildId) -> Result<()>;

    /// Use the license up once. Marks it inactive when nothing is left.
    fn consume(&mut self) -> Result<ConsumeOutcome>;

    fn on_exhausted(&self) -> ExhaustedAction;
}

impl License {
    pub fn new(
        key: String,
        guild_id: GuildId,
        role_packet_id: u64,
        reminder_activations_id: u64,
        variant: LicenseVariant,
    ) -> Result<Self> {
        let license = Self {
            key,
            guild_id,
            role_packet_id,
            reminder_activations_id,
            inactive: false,
            variant,
            created_at: Utc::now(),
        };
        license.validate_fields()?;
        Ok(license)
    }

    pub fn validate_fields(&self) -> Result<()> {
        if self.key.chars().count() < KEY_MIN_LENGTH {
            return Err(LicenseError::configuration(format!(
                "License key has to be at least {} characters.",
                KEY_MIN_LENGTH
            )));
        }
        if let LicenseVariant::MultiUse { uses_left } = self.variant {
            if uses_left > MAXIMUM_USES_LEFT {
                return Err(LicenseError::configuration("License number of uses is too big."));
            }
        }
        Ok(())
    }

    pub fn uses_left(&self) -> Option<u32> {
        match self.variant {
            LicenseVariant::MultiUse { uses_left } => Some(uses_left),
            _ => None,
        }
    }

    pub fn variant_name(&self) -> &'static str {
        match self.variant {
            LicenseVariant::SingleUse => "single-use",
            LicenseVariant::MultiUse { .. } => "multi-use",
            LicenseVariant::Regenerating => "regenerating",
        }
    }
}

impl LicenseCapabilities for License {
    fn validate(&self, guild_id: GuildId) -> Result<()> {
        if self.guild_id != guild_id {
            return Err(LicenseError::state(
                "License belongs to a different guild.",
            ));
        }
        if self.inactive {
            return Err(LicenseError::state("License is no longer active."));
        }
        if let LicenseVariant::MultiUse { uses_left: 0 } = self.variant {
            return Err(LicenseError::state("License has no uses left."));
        }
        Ok(())
    }

    fn consume(&mut self) -> Result<ConsumeOutcome> {
        if self.inactive {
            return Err(LicenseError::state("License is no longer active."));
        }

        let outcome = match &mut self.variant {
            LicenseVariant::SingleUse | LicenseVariant::Regenerating => ConsumeOutcome::Exhausted,
            LicenseVariant::MultiUse { uses_left } => {
                if *uses_left == 0 {
                    return Err(LicenseError::state("License has no uses left."));
                }
                *uses_left -= 1;
                if *uses_left == 0 {
                    ConsumeOutcome::Exhausted
                } else {
                    ConsumeOutcome::StillActive {
                        uses_left: *uses_left,
                    }
                }
            }
        };

        if outcome == ConsumeOutcome::Exhausted {
            self.inactive = true;
        }
        Ok(outcome)
    }

    fn on_exhausted(&self) -> ExhaustedAction {
        match self.variant {
            LicenseVariant::Regenerating => ExhaustedAction::Regenerate,
            _ => ExhaustedAction::Deactivate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn license(variant: LicenseVariant) -> License {
        License::new("ABCDE-FGHIJ-KLMNO".to_string(), GuildId::new(1), 1, 1, variant).unwrap()
    }

    #[test]
    fn test_key_min_length() {
        let err = License::new("short".to_string(), GuildId::new(1), 1, 1, LicenseVariant::SingleUse)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_single_use_consumed_once() {
        let mut license = license(LicenseVariant::SingleUse);
        assert!(license.validate(GuildId::new(1)).is_ok());
        assert_eq!(license.consume().unwrap(), ConsumeOutcome::Exhausted);
        assert!(license.inactive);
        assert_eq!(license.validate(GuildId::new(1)).unwrap_err().kind(), ErrorKind::State);
        assert!(license.consume().is_err());
        assert_eq!(license.on_exhausted(), ExhaustedAction::Deactivate);
    }

    #[test]
    fn test_multi_use_counts_down() {
        let mut license = license(LicenseVariant::MultiUse { uses_left: 2 });
        assert_eq!(
            license.consume().unwrap(),
            ConsumeOutcome::StillActive { uses_left: 1 }
        );
        assert!(!license.inactive);
        assert_eq!(license.consume().unwrap(), ConsumeOutcome::Exhausted);
        assert!(license.inactive);
        assert_eq!(license.uses_left(), Some(0));
    }

    #[test]
    fn test_wrong_guild_rejected() {
        let license = license(LicenseVariant::Regenerating);
        assert_eq!(
            license.validate(GuildId::new(2)).unwrap_err().kind(),
            ErrorKind::State
        );
        assert_eq!(license.on_exhausted(), ExhaustedAction::Regenerate);
    }

    #[test]
    fn test_kind_into_variant() {
        assert_eq!(
            LicenseKind::MultiUse.into_variant(Some(5)).unwrap(),
            LicenseVariant::MultiUse { uses_left: 5 }
        );
        assert!(LicenseKind::MultiUse.into_variant(Some(0)).is_err());
        assert!(LicenseKind::MultiUse
            .into_variant(Some(MAXIMUM_USES_LEFT + 1))
            .is_err());
        assert_eq!(
            LicenseKind::SingleUse.into_variant(Some(5)).unwrap(),
            LicenseVariant::SingleUse
        );
    }
}
