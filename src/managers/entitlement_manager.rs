//! Redemption of licenses into role entitlements, and their removal.
//!
//! A redemption runs in two phases. First, under the license's critical
//! section and one database write guard, the license is consumed and every
//! packet role is applied to storage. Then, with all state committed, the
//! matching add/remove calls go out to Discord. A failed Discord call is
//! reported on its role and never rolls the committed state back.

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::limits::ROLE_SYNC_GRACE_SECONDS;
use crate::config::GuildSettings;
use crate::error::{LicenseError, Result};
use crate::managers::license_manager::SharedLicenseManager;
use crate::managers::reminder_manager;
use crate::managers::role_manager::SharedRoleGateway;
use crate::managers::single_flight::SingleFlight;
use crate::managers::tier_resolver::{self, HeldRole, TierDecision};
use crate::models::{LicenseCapabilities, LicensedMember, LicensedRole, PacketRole, Remaining, Role};
use crate::state::{Database, SharedDatabase};

/// What happened to one role of a redeemed packet.
#[derive(Debug, Clone, PartialEq)]
pub enum RoleOutcome {
    /// New entitlement
    Granted { expiration: Option<DateTime<Utc>> },
    /// Member already held the role, its expiration was recomputed
    DuplicateExtended { expiration: Option<DateTime<Utc>> },
    /// Weaker roles on the same tier level were replaced by this one
    Upgraded {
        replaced: Vec<RoleId>,
        expiration: Option<DateTime<Utc>>,
    },
    /// A superior role on the same tier level is held, nothing granted.
    /// `extended` is the superior role's new expiration if it was extended.
    TierMiss {
        superior: RoleId,
        extended: Option<Option<DateTime<Utc>>>,
    },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleReport {
    pub role_id: RoleId,
    pub outcome: RoleOutcome,
    /// Set when the committed change could not be applied on Discord
    pub platform_error: Option<String>,
}

/// Per-role report of one redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct RedemptionResult {
    pub license_key: String,
    pub packet_name: String,
    pub custom_message: String,
    pub roles: Vec<RoleReport>,
    pub granted: Vec<RoleId>,
    pub revoked: Vec<RoleId>,
    pub regenerated_key: Option<String>,
    pub rejected_reason: Option<String>,
}

impl RedemptionResult {
    pub fn has_platform_errors(&self) -> bool {
        self.roles.iter().any(|r| r.platform_error.is_some())
    }
}

/// Outcome of a manual revocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevokeReport {
    pub removed: Vec<RoleId>,
    pub platform_errors: Vec<String>,
}

/// A role the member currently holds through a license.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    pub role_id: RoleId,
    pub license_key: String,
    pub expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoleChange {
    Add(RoleId),
    Remove(RoleId),
}

pub struct EntitlementManager {
    db: SharedDatabase,
    licenses: SharedLicenseManager,
    gateway: SharedRoleGateway,
    sweeping: AtomicBool,
}

impl EntitlementManager {
    pub fn new(db: SharedDatabase, licenses: SharedLicenseManager, gateway: SharedRoleGateway) -> Self {
        Self {
            db,
            licenses,
            gateway,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Redeem `key` for `member_id`.
    ///
    /// Rejected with a state error, before any side effect, when the license
    /// is inactive, exhausted, from another guild, or already redeemed by
    /// this member.
    pub async fn redeem(&self, guild_id: GuildId, member_id: UserId, key: &str) -> Result<RedemptionResult> {
        let license_guard = self.licenses.lock(key).await;
        let committed = self.commit_redemption(guild_id, member_id, key).await;
        drop(license_guard);
        self.licenses.release(key).await;
        let (mut result, changes) = committed?;

        for (report, role_changes) in result.roles.iter_mut().zip(changes) {
            let mut errors = Vec::new();
            for change in role_changes {
                if let Err(e) = self.apply_change(guild_id, member_id, change).await {
                    errors.push(e.to_string());
                }
            }
            if !errors.is_empty() {
                warn!(
                    guild_id = %guild_id,
                    "Role {} for {} committed but not applied on Discord: {}",
                    report.role_id,
                    member_id,
                    errors.join("; ")
                );
                report.platform_error = Some(errors.join("; "));
            }
        }

        info!(
            guild_id = %guild_id,
            "{} redeemed license {} (packet '{}'): granted {:?}, revoked {:?}",
            member_id,
            key,
            result.packet_name,
            result.granted,
            result.revoked
        );
        Ok(result)
    }

    /// Storage phase of `redeem`, run under the license's critical section.
    async fn commit_redemption(
        &self,
        guild_id: GuildId,
        member_id: UserId,
        key: &str,
    ) -> Result<(RedemptionResult, Vec<Vec<RoleChange>>)> {
        let committed = {
            let mut db = self.db.write().await;
            let now = Utc::now();

            let license = db.license(key)?;
            license.validate(guild_id)?;
            if db.licensed_member_for(member_id, key).is_some() {
                return Err(LicenseError::state("You already redeemed this license."));
            }
            let packet = db.packet(license.role_packet_id)?.clone();
            let settings = db.guild(guild_id)?.settings.clone();

            let consumed = self.licenses.consume_in(&mut db, key, guild_id)?;
            debug!(
                "License {} consumed ({:?}), inactive: {}",
                key, consumed.outcome, consumed.license.inactive
            );

            let licensed_member_id = db.next_id();
            db.licensed_members.insert(
                licensed_member_id,
                LicensedMember {
                    id: licensed_member_id,
                    member_id,
                    guild_id,
                    license_key: key.to_string(),
                },
            );

            let mut reports = Vec::with_capacity(packet.roles.len());
            let mut changes = Vec::with_capacity(packet.roles.len());
            for packet_role in &packet.roles {
                let ctx = GrantContext {
                    guild_id,
                    member_id,
                    licensed_member_id,
                    settings: &settings,
                    now,
                };
                let (outcome, role_changes) = match apply_role(&mut db, &ctx, packet_role) {
                    Ok(applied) => applied,
                    Err(e) => {
                        warn!(
                            guild_id = %guild_id,
                            "Could not apply role {} for {}: {}", packet_role.role_id, member_id, e
                        );
                        (RoleOutcome::Failed { reason: e.to_string() }, Vec::new())
                    }
                };
                reports.push(RoleReport {
                    role_id: packet_role.role_id,
                    outcome,
                    platform_error: None,
                });
                changes.push(role_changes);
            }

            let result = summarize(key, &packet.name, &packet.custom_message, reports, consumed.regenerated_key);
            (result, changes)
        };
        self.db.persist().await;
        Ok(committed)
    }

    async fn apply_change(&self, guild_id: GuildId, member_id: UserId, change: RoleChange) -> Result<()> {
        match change {
            RoleChange::Add(role_id) => self.gateway.add_role(guild_id, member_id, role_id).await,
            RoleChange::Remove(role_id) => self.gateway.remove_role(guild_id, member_id, role_id).await,
        }
    }

    /// Remove one licensed role from the member.
    pub async fn revoke(&self, guild_id: GuildId, member_id: UserId, role_id: RoleId) -> Result<RevokeReport> {
        let removed = {
            let mut db = self.db.write().await;
            let rows: Vec<LicensedRole> = db
                .member_licensed_roles(guild_id, member_id)
                .into_iter()
                .filter(|r| r.role_id == role_id)
                .collect();
            if rows.is_empty() {
                return Err(LicenseError::not_found("Licensed role", role_id));
            }
            delete_entitlements(&mut db, &rows)
        };
        self.db.persist().await;

        info!(guild_id = %guild_id, "Revoked role {} from {}", role_id, member_id);
        Ok(self.remove_on_platform(guild_id, member_id, removed).await)
    }

    /// Remove every licensed role the member holds in the guild.
    pub async fn revoke_all(&self, guild_id: GuildId, member_id: UserId) -> Result<RevokeReport> {
        let removed = {
            let mut db = self.db.write().await;
            db.guild(guild_id)?;
            let rows = db.member_licensed_roles(guild_id, member_id);
            let removed = delete_entitlements(&mut db, &rows);

            let members: Vec<u64> = db
                .licensed_members
                .values()
                .filter(|m| m.guild_id == guild_id && m.member_id == member_id)
                .map(|m| m.id)
                .collect();
            db.prune_licensed_members(&members);
            removed
        };
        self.db.persist().await;

        info!(guild_id = %guild_id, "Revoked all {} licensed roles from {}", removed.len(), member_id);
        Ok(self.remove_on_platform(guild_id, member_id, removed).await)
    }

    async fn remove_on_platform(&self, guild_id: GuildId, member_id: UserId, roles: Vec<RoleId>) -> RevokeReport {
        let mut report = RevokeReport::default();
        for role_id in roles {
            if let Err(e) = self.gateway.remove_role(guild_id, member_id, role_id).await {
                warn!(guild_id = %guild_id, "Failed to remove role {} from {}: {}", role_id, member_id, e);
                report.platform_errors.push(format!("<@&{}>: {}", role_id, e));
            }
            report.removed.push(role_id);
        }
        report
    }

    pub async fn member_entitlements(&self, guild_id: GuildId, member_id: UserId) -> Vec<Entitlement> {
        let db = self.db.read().await;
        db.member_licensed_roles(guild_id, member_id)
            .into_iter()
            .filter_map(|r| {
                let member = db.licensed_members.get(&r.licensed_member_id)?;
                Some(Entitlement {
                    role_id: r.role_id,
                    license_key: member.license_key.clone(),
                    expiration: r.expiration,
                })
            })
            .collect()
    }

    /// Remove every entitlement expired at `now`. Returns how many were removed.
    ///
    /// Skipped (returns 0) while a previous sweep is still running.
    pub async fn run_expiration_sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(_flight) = SingleFlight::try_begin(&self.sweeping) else {
            debug!("Expiration sweep still running, skipping");
            return Ok(0);
        };

        let expired: Vec<(GuildId, UserId, RoleId)> = {
            let mut db = self.db.write().await;
            let rows: Vec<LicensedRole> = db
                .licensed_roles
                .values()
                .filter(|r| r.is_expired(now))
                .cloned()
                .collect();
            if rows.is_empty() {
                return Ok(0);
            }

            let expired: Vec<(GuildId, UserId, RoleId)> = rows
                .iter()
                .filter_map(|r| {
                    let member = db.licensed_members.get(&r.licensed_member_id)?;
                    Some((member.guild_id, member.member_id, r.role_id))
                })
                .collect();

            let members: Vec<u64> = rows.iter().map(|r| r.licensed_member_id).collect();
            for row in &rows {
                db.delete_licensed_role(row.id);
            }
            db.prune_licensed_members(&members);
            expired
        };
        self.db.persist().await;

        for (guild_id, member_id, role_id) in &expired {
            match self.gateway.remove_role(*guild_id, *member_id, *role_id).await {
                Ok(()) => info!(guild_id = %guild_id, "Role {} of {} expired", role_id, member_id),
                Err(e) => warn!(
                    guild_id = %guild_id,
                    "Role {} of {} expired but could not be removed: {}", role_id, member_id, e
                ),
            }
        }
        Ok(expired.len())
    }

    /// Purge the member's entitlements when the guild asks for it on leave.
    /// Returns how many licensed members were removed.
    pub async fn handle_member_leave(&self, guild_id: GuildId, member_id: UserId) -> Result<usize> {
        let removed = {
            let mut db = self.db.write().await;
            if !db.guild(guild_id)?.settings.nuke_data_on_member_leave {
                return Ok(0);
            }
            let members: Vec<u64> = db
                .licensed_members
                .values()
                .filter(|m| m.guild_id == guild_id && m.member_id == member_id)
                .map(|m| m.id)
                .collect();
            for id in &members {
                db.delete_licensed_member(*id);
            }
            members.len()
        };

        if removed > 0 {
            self.db.persist().await;
            info!(guild_id = %guild_id, "Purged license data of departed member {}", member_id);
        }
        Ok(removed)
    }

    /// Sync storage after a member's roles changed on Discord. Licensed roles
    /// the member no longer has count as revoked and are deleted with their
    /// reminders; nothing is sent back to Discord. Roles a redemption touched
    /// in the last `ROLE_SYNC_GRACE_SECONDS` are left alone, since the
    /// redemption's own role calls produce updates that lag behind storage.
    pub async fn handle_roles_changed(
        &self,
        guild_id: GuildId,
        member_id: UserId,
        current_roles: &[RoleId],
        now: DateTime<Utc>,
    ) -> Result<Vec<RoleId>> {
        let removed = {
            let mut db = self.db.write().await;
            let rows: Vec<LicensedRole> = db
                .member_licensed_roles(guild_id, member_id)
                .into_iter()
                .filter(|r| !current_roles.contains(&r.role_id))
                .filter(|r| !r.recently_touched(now, ROLE_SYNC_GRACE_SECONDS))
                .collect();
            if rows.is_empty() {
                return Ok(Vec::new());
            }
            let members: Vec<u64> = rows.iter().map(|r| r.licensed_member_id).collect();
            let removed = delete_entitlements(&mut db, &rows);
            db.prune_licensed_members(&members);
            removed
        };
        self.db.persist().await;

        info!(
            guild_id = %guild_id,
            "Roles {:?} were removed from {} on Discord, licensed roles revoked",
            removed,
            member_id
        );
        Ok(removed)
    }
}

/// Shared entitlement manager type
pub type SharedEntitlementManager = Arc<EntitlementManager>;

pub fn create_shared_entitlement_manager(
    db: SharedDatabase,
    licenses: SharedLicenseManager,
    gateway: SharedRoleGateway,
) -> SharedEntitlementManager {
    Arc::new(EntitlementManager::new(db, licenses, gateway))
}

struct GrantContext<'a> {
    guild_id: GuildId,
    member_id: UserId,
    licensed_member_id: u64,
    settings: &'a GuildSettings,
    now: DateTime<Utc>,
}

/// Apply one packet role against the member's current holdings.
///
/// Duplicate check first, then the tier check, then a plain grant. Every
/// lookup that can fail happens before the first write.
fn apply_role(
    db: &mut Database,
    ctx: &GrantContext<'_>,
    packet_role: &PacketRole,
) -> Result<(RoleOutcome, Vec<RoleChange>)> {
    let requested = Remaining::from_duration(packet_role.duration);
    let held_rows = db.member_licensed_roles(ctx.guild_id, ctx.member_id);

    if let Some(existing) = held_rows.iter().find(|r| r.role_id == packet_role.role_id) {
        let remaining = if ctx.settings.preserve_previous_duration_duplicate {
            existing.remaining(ctx.now).merge(requested)
        } else {
            requested
        };
        let expiration = remaining.expiration(ctx.now);
        set_expiration(db, existing.id, expiration, ctx.now)?;
        return Ok((
            RoleOutcome::DuplicateExtended { expiration },
            vec![RoleChange::Add(packet_role.role_id)],
        ));
    }

    let candidate = db
        .role(packet_role.role_id)
        .cloned()
        .unwrap_or_else(|_| Role::new(packet_role.role_id, ctx.guild_id));
    let held: Vec<HeldRole> = held_rows
        .into_iter()
        .filter_map(|licensed_role| {
            let role = db.role(licensed_role.role_id).ok()?.clone();
            Some(HeldRole { licensed_role, role })
        })
        .collect();

    match tier_resolver::resolve(&candidate, requested, &held, ctx.settings, ctx.now)? {
        TierDecision::NoConflict => {
            let expiration = requested.expiration(ctx.now);
            grant(db, ctx.licensed_member_id, candidate.id, expiration, ctx.now)?;
            Ok((
                RoleOutcome::Granted { expiration },
                vec![RoleChange::Add(candidate.id)],
            ))
        }
        TierDecision::Upgrade { replaced, granted } => {
            let expiration = granted.expiration(ctx.now);
            let replaced_roles = delete_entitlements(db, &replaced);
            grant(db, ctx.licensed_member_id, candidate.id, expiration, ctx.now)?;

            let mut changes: Vec<RoleChange> =
                replaced_roles.iter().map(|r| RoleChange::Remove(*r)).collect();
            changes.push(RoleChange::Add(candidate.id));
            Ok((
                RoleOutcome::Upgraded {
                    replaced: replaced_roles,
                    expiration,
                },
                changes,
            ))
        }
        TierDecision::Miss { superior, extended } => {
            let extended = match extended {
                Some(remaining) => {
                    let expiration = remaining.expiration(ctx.now);
                    set_expiration(db, superior.id, expiration, ctx.now)?;
                    Some(expiration)
                }
                None => None,
            };
            Ok((
                RoleOutcome::TierMiss {
                    superior: superior.role_id,
                    extended,
                },
                Vec::new(),
            ))
        }
    }
}

fn grant(
    db: &mut Database,
    licensed_member_id: u64,
    role_id: RoleId,
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let id = db.next_id();
    db.licensed_roles.insert(
        id,
        LicensedRole {
            id,
            licensed_member_id,
            role_id,
            expiration,
            touched_at: now,
        },
    );
    reminder_manager::reschedule(db, id)?;
    Ok(())
}

fn set_expiration(
    db: &mut Database,
    licensed_role_id: u64,
    expiration: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let row = db
        .licensed_roles
        .get_mut(&licensed_role_id)
        .ok_or_else(|| LicenseError::not_found("Licensed role", licensed_role_id))?;
    row.expiration = expiration;
    row.touched_at = now;
    reminder_manager::reschedule(db, licensed_role_id)?;
    Ok(())
}

/// Delete licensed roles with their reminders, returns the distinct role ids.
fn delete_entitlements(db: &mut Database, rows: &[LicensedRole]) -> Vec<RoleId> {
    let mut seen = HashSet::new();
    let mut removed = Vec::new();
    for row in rows {
        if db.delete_licensed_role(row.id).is_some() && seen.insert(row.role_id) {
            removed.push(row.role_id);
        }
    }
    removed
}

fn summarize(
    key: &str,
    packet_name: &str,
    custom_message: &str,
    reports: Vec<RoleReport>,
    regenerated_key: Option<String>,
) -> RedemptionResult {
    let mut granted = Vec::new();
    let mut revoked = Vec::new();
    for report in &reports {
        match &report.outcome {
            RoleOutcome::Granted { .. } | RoleOutcome::DuplicateExtended { .. } => {
                granted.push(report.role_id)
            }
            RoleOutcome::Upgraded { replaced, .. } => {
                granted.push(report.role_id);
                revoked.extend(replaced.iter().copied());
            }
            RoleOutcome::TierMiss { .. } | RoleOutcome::Failed { .. } => {}
        }
    }

    let rejected_reason = if !granted.is_empty() || reports.is_empty() {
        None
    } else if let Some(reason) = reports.iter().find_map(|r| match &r.outcome {
        RoleOutcome::Failed { reason } => Some(reason.clone()),
        _ => None,
    }) {
        Some(format!("role grant failed: {}", reason))
    } else if reports
        .iter()
        .any(|r| matches!(r.outcome, RoleOutcome::TierMiss { extended: Some(_), .. }))
    {
        Some("tier miss, superior role extended".to_string())
    } else {
        Some("tier miss, no change".to_string())
    };

    RedemptionResult {
        license_key: key.to_string(),
        packet_name: packet_name.to_string(),
        custom_message: custom_message.to_string(),
        roles: reports,
        granted,
        revoked,
        regenerated_key,
        rejected_reason,
    }
}
