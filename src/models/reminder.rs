use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::limits::{DEFAULT_FIRST_ACTIVATION, MAXIMUM_LICENSE_DURATION_MINUTES};
use crate::error::{LicenseError, Result};

pub const MAX_ACTIVATIONS: usize = 5;

/// When to remind members before their license expires.
///
/// Values are minutes before expiration. The first one is mandatory (> 0),
/// the rest are optional (0 = unset), strictly decreasing, and unset entries
/// can only trail set ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderActivations {
    pub id: u64,
    activations: [i64; MAX_ACTIVATIONS],
}

impl ReminderActivations {
    /// Build from 1 to 5 offsets, missing ones are unset.
    pub fn new(id: u64, offsets: &[i64]) -> Result<Self> {
        if offsets.is_empty() || offsets.len() > MAX_ACTIVATIONS {
            return Err(LicenseError::configuration(format!(
                "Between 1 and {} reminder activations are required.",
                MAX_ACTIVATIONS
            )));
        }

        let mut activations = [0; MAX_ACTIVATIONS];
        activations[..offsets.len()].copy_from_slice(offsets);

        let reminder_activations = Self { id, activations };
        reminder_activations.validate()?;
        Ok(reminder_activations)
    }

    pub fn default_with_id(id: u64) -> Self {
        Self {
            id,
            activations: [DEFAULT_FIRST_ACTIVATION, 0, 0, 0, 0],
        }
    }

    /// Same values under a new id
    pub fn clone_with_id(&self, id: u64) -> Self {
        Self {
            id,
            activations: self.activations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.activations[0] <= 0 {
            return Err(LicenseError::configuration(
                "Reminder first activation has to be enabled.",
            ));
        }
        if let Some(negative) = self.activations.iter().find(|a| **a < 0) {
            return Err(LicenseError::configuration(format!(
                "Reminder activation value {} cannot be negative.",
                negative
            )));
        }
        if let Some(too_far) = self
            .activations
            .iter()
            .find(|a| **a > MAXIMUM_LICENSE_DURATION_MINUTES)
        {
            return Err(LicenseError::configuration(format!(
                "Reminder activation value {} is too big, maximum is {} minutes.",
                too_far, MAXIMUM_LICENSE_DURATION_MINUTES
            )));
        }
        for pair in self.activations.windows(2) {
            if pair[1] != 0 && pair[0] <= pair[1] {
                return Err(LicenseError::configuration(
                    "Reminder activation fields have to be ordered from highest to lowest without duplicate values.",
                ));
            }
        }
        Ok(())
    }

    /// Set offsets only, highest first
    pub fn enabled(&self) -> impl Iterator<Item = i64> + '_ {
        self.activations.iter().copied().filter(|a| *a > 0)
    }
}

/// A concrete scheduled reminder for one entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: u64,
    pub licensed_member_id: u64,
    pub licensed_role_id: u64,

    /// Minutes before `expiration` this fires
    pub activation: i64,

    /// Expiration instant this reminder was scheduled for
    pub expiration: DateTime<Utc>,

    /// Set exactly once, never cleared
    pub sent: bool,
}

impl Reminder {
    /// Instant the reminder becomes due, saturating at the earliest
    /// representable time for offsets out of range
    pub fn fire_at(&self) -> DateTime<Utc> {
        Duration::try_minutes(self.activation)
            .and_then(|offset| self.expiration.checked_sub_signed(offset))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.sent && self.fire_at() <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_activation_required() {
        assert!(ReminderActivations::new(1, &[0]).is_err());
        assert!(ReminderActivations::new(1, &[-1]).is_err());
        assert!(ReminderActivations::new(1, &[1]).is_ok());
        assert!(ReminderActivations::new(1, &[]).is_err());
        assert!(ReminderActivations::new(1, &[6, 5, 4, 3, 2, 1]).is_err());
    }

    #[test]
    fn test_negative_rejected() {
        assert!(ReminderActivations::new(1, &[10, -1]).is_err());
        assert!(ReminderActivations::new(1, &[10, 0, 0, 0, -1]).is_err());
    }

    #[test]
    fn test_order() {
        assert!(ReminderActivations::new(1, &[100, 99, 98, 97, 96]).is_ok());

        let wrong_orders: [&[i64]; 4] = [
            &[5, 4, 3, 2, 10],
            // second unset so there cannot be a third
            &[5, 0, 10],
            &[5, 0, 4],
            // duplicates
            &[5, 0, 0, 0, 5],
        ];
        for wrong in wrong_orders {
            assert!(ReminderActivations::new(1, wrong).is_err(), "{:?}", wrong);
        }
    }

    #[test]
    fn test_enabled_and_clone() {
        let activations = ReminderActivations::new(1, &[60, 30]).unwrap();
        assert_eq!(activations.enabled().collect::<Vec<_>>(), vec![60, 30]);

        let copy = activations.clone_with_id(2);
        assert_eq!(copy.id, 2);
        assert_eq!(copy.activations, activations.activations);
        assert_eq!(ReminderActivations::default_with_id(3).enabled().count(), 1);
    }

    #[test]
    fn test_offset_upper_bound() {
        assert!(ReminderActivations::new(1, &[MAXIMUM_LICENSE_DURATION_MINUTES]).is_ok());
        assert!(ReminderActivations::new(1, &[MAXIMUM_LICENSE_DURATION_MINUTES + 1]).is_err());
        let err = ReminderActivations::new(1, &[200_000_000_000]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_fire_at_saturates() {
        let now = Utc::now();
        let reminder = Reminder {
            id: 1,
            licensed_member_id: 1,
            licensed_role_id: 1,
            activation: i64::MAX,
            expiration: now,
            sent: false,
        };
        assert_eq!(reminder.fire_at(), DateTime::<Utc>::MIN_UTC);
        assert!(reminder.is_due(now));
    }

    #[test]
    fn test_reminder_due() {
        let now = Utc::now();
        let mut reminder = Reminder {
            id: 1,
            licensed_member_id: 1,
            licensed_role_id: 1,
            activation: 30,
            expiration: now + Duration::minutes(60),
            sent: false,
        };
        assert!(!reminder.is_due(now));
        assert!(reminder.is_due(now + Duration::minutes(30)));
        reminder.sent = true;
        assert!(!reminder.is_due(now + Duration::minutes(30)));
    }
}
