//! Dual-layer cooldown gating: the locally cached `cooldown_until`
//! deadline, and the authoritative cross-check against the ASG's own
//! recent activity log.

use asc_common::{AsgActivity, AsgActivityType, DecisionReason, ScalingActionKind};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CooldownBlock {
    pub reason: DecisionReason,
    pub remaining_s: i64,
}

/// Checks the locally cached deadline first. A block here carries the
/// reason for whichever direction the caller is attempting now, not the
/// direction that originally set the deadline.
pub fn local_block(
    cooldown_until: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    action: ScalingActionKind,
) -> Option<CooldownBlock> {
    let deadline = cooldown_until?;
    if deadline <= now {
        return None;
    }
    let reason = match action {
        ScalingActionKind::ScaleUp => DecisionReason::CooldownScaleUp,
        ScalingActionKind::ScaleDown => DecisionReason::CooldownScaleDown,
        ScalingActionKind::None => return None,
    };
    Some(CooldownBlock {
        reason,
        remaining_s: (deadline - now).num_seconds(),
    })
}

/// Cross-checks against the ASG's own activity log: a general cooldown
/// blocks any direction, a direction-specific cooldown blocks only the
/// matching one.
pub fn authoritative_block(
    activities: &[AsgActivity],
    now: DateTime<Utc>,
    action: ScalingActionKind,
    general_cooldown_s: i64,
    scale_up_cooldown_s: i64,
    scale_down_cooldown_s: i64,
) -> Option<CooldownBlock> {
    let relevant: Vec<&AsgActivity> = activities.iter().filter(|a| a.status_code.counts_for_cooldown()).collect();

    if let Some(latest) = relevant.iter().max_by_key(|a| a.created_at) {
        let elapsed = (now - latest.created_at).num_seconds();
        let remaining = general_cooldown_s - elapsed;
        if remaining > 0 {
            return Some(CooldownBlock {
                reason: DecisionReason::CooldownGeneral,
                remaining_s: remaining,
            });
        }
    }

    let (wanted_type, specific_cooldown_s, reason) = match action {
        ScalingActionKind::ScaleUp => (AsgActivityType::ScaleOut, scale_up_cooldown_s, DecisionReason::CooldownScaleUp),
        ScalingActionKind::ScaleDown => (
            AsgActivityType::ScaleIn,
            scale_down_cooldown_s,
            DecisionReason::CooldownScaleDown,
        ),
        ScalingActionKind::None => return None,
    };

    if specific_cooldown_s <= 0 {
        return None;
    }

    let latest_specific = relevant.iter().filter(|a| a.activity_type == wanted_type).max_by_key(|a| a.created_at)?;

    let elapsed = (now - latest_specific.created_at).num_seconds();
    let remaining = specific_cooldown_s - elapsed;
    if remaining > 0 {
        Some(CooldownBlock { reason, remaining_s: remaining })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asc_common::AsgActivityStatus;

    fn activity(activity_type: AsgActivityType, status: AsgActivityStatus, seconds_ago: i64) -> AsgActivity {
        AsgActivity {
            activity_type,
            status_code: status,
            created_at: Utc::now() - chrono::Duration::seconds(seconds_ago),
        }
    }

    #[test]
    fn local_cooldown_reports_direction_matching_attempted_action() {
        let now = Utc::now();
        let block = local_block(Some(now + chrono::Duration::seconds(120)), now, ScalingActionKind::ScaleUp);
        let block = block.unwrap();
        assert_eq!(block.reason, DecisionReason::CooldownScaleUp);
        assert!(block.remaining_s > 0 && block.remaining_s <= 120);
    }

    #[test]
    fn local_cooldown_in_the_past_does_not_block() {
        let now = Utc::now();
        assert!(local_block(Some(now - chrono::Duration::seconds(1)), now, ScalingActionKind::ScaleUp).is_none());
    }

    #[test]
    fn general_cooldown_blocks_regardless_of_direction() {
        let now = Utc::now();
        let activities = vec![activity(AsgActivityType::ScaleIn, AsgActivityStatus::Success, 30)];
        let block = authoritative_block(&activities, now, ScalingActionKind::ScaleUp, 180, 300, 600);
        let block = block.unwrap();
        assert_eq!(block.reason, DecisionReason::CooldownGeneral);
    }

    #[test]
    fn specific_cooldown_only_blocks_matching_direction() {
        let now = Utc::now();
        let activities = vec![activity(AsgActivityType::ScaleOut, AsgActivityStatus::Success, 100)];
        // general window already elapsed, but scale_up-specific window has not
        let block = authoritative_block(&activities, now, ScalingActionKind::ScaleUp, 60, 300, 600);
        assert_eq!(block.unwrap().reason, DecisionReason::CooldownScaleUp);

        let block = authoritative_block(&activities, now, ScalingActionKind::ScaleDown, 60, 300, 600);
        assert!(block.is_none());
    }

    #[test]
    fn non_success_statuses_still_count_for_cooldown() {
        let now = Utc::now();
        let activities = vec![activity(AsgActivityType::ScaleOut, AsgActivityStatus::Running, 30)];
        let block = authoritative_block(&activities, now, ScalingActionKind::ScaleUp, 180, 300, 600);
        assert!(block.is_some());
    }

    #[test]
    fn failed_activity_does_not_count_for_cooldown() {
        let now = Utc::now();
        let activities = vec![activity(AsgActivityType::ScaleOut, AsgActivityStatus::Failed, 1)];
        let block = authoritative_block(&activities, now, ScalingActionKind::ScaleUp, 180, 300, 600);
        assert!(block.is_none());
    }
}
