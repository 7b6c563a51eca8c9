use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::RuleError;

/// Staged approval levels a manager can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ApproveTier {
    None = 0,
    Middle = 1,
    Better = 2,
    Top = 3,
}

impl ApproveTier {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(ApproveTier::None),
            1 => Some(ApproveTier::Middle),
            2 => Some(ApproveTier::Better),
            3 => Some(ApproveTier::Top),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ApprovalAction {
    Submit,
    Withdraw,
    Approve,
    Reject,
    Reopen,
}

/// Whoever is performing a transition.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: u64,
    pub tier: ApproveTier,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApprovalState {
    pub status: AttendanceStatus,
    pub approved_level: u8,
    pub required_levels: u8,
}

impl ApprovalState {
    pub fn new(status: AttendanceStatus, approved_level: u8, required_levels: u8) -> Self {
        Self {
            status,
            approved_level,
            required_levels: required_levels.clamp(1, 3),
        }
    }

    fn next_level(&self) -> u8 {
        self.approved_level.saturating_add(1)
    }
}

pub fn is_editable(status: AttendanceStatus) -> bool {
    matches!(status, AttendanceStatus::Draft | AttendanceStatus::Rejected)
}

/// True when the state sits in `tier`'s approval inbox.
pub fn awaiting(tier: ApproveTier, state: &ApprovalState) -> bool {
    state.status == AttendanceStatus::Submitted && state.next_level() <= tier.level()
}

fn invalid(action: ApprovalAction, status: AttendanceStatus) -> RuleError {
    RuleError::InvalidTransition {
        action: action.as_ref().to_string(),
        status: status.to_string(),
    }
}

fn check_approver(actor: &Actor, owner_id: u64, state: &ApprovalState) -> Result<(), RuleError> {
    if actor.user_id == owner_id {
        return Err(RuleError::NotPermitted(
            "cannot decide on your own attendance".to_string(),
        ));
    }
    if !actor.is_admin && actor.tier.level() < state.next_level() {
        return Err(RuleError::NotPermitted(format!(
            "approval level {} required",
            state.next_level()
        )));
    }
    Ok(())
}

/// Applies `action` to an attendance approval state.
pub fn transition(
    state: ApprovalState,
    action: ApprovalAction,
    actor: &Actor,
    owner_id: u64,
) -> Result<ApprovalState, RuleError> {
    use AttendanceStatus::*;

    match action {
        ApprovalAction::Submit => {
            if actor.user_id != owner_id {
                return Err(RuleError::NotPermitted(
                    "only the owner can submit".to_string(),
                ));
            }
            if !is_editable(state.status) {
                return Err(invalid(action, state.status));
            }
            Ok(ApprovalState {
                status: Submitted,
                approved_level: 0,
                ..state
            })
        }
        ApprovalAction::Withdraw => {
            if actor.user_id != owner_id {
                return Err(RuleError::NotPermitted(
                    "only the owner can withdraw".to_string(),
                ));
            }
            if state.status != Submitted || state.approved_level > 0 {
                return Err(invalid(action, state.status));
            }
            Ok(ApprovalState {
                status: Draft,
                approved_level: 0,
                ..state
            })
        }
        ApprovalAction::Approve => {
            if state.status != Submitted {
                return Err(invalid(action, state.status));
            }
            check_approver(actor, owner_id, &state)?;
            let level = state.next_level();
            let status = if level >= state.required_levels {
                Approved
            } else {
                Submitted
            };
            Ok(ApprovalState {
                status,
                approved_level: level,
                ..state
            })
        }
        ApprovalAction::Reject => {
            if state.status != Submitted {
                return Err(invalid(action, state.status));
            }
            check_approver(actor, owner_id, &state)?;
            Ok(ApprovalState {
                status: Rejected,
                approved_level: 0,
                ..state
            })
        }
        ApprovalAction::Reopen => {
            if !actor.is_admin {
                return Err(RuleError::NotPermitted("admin only".to_string()));
            }
            if state.status != Approved {
                return Err(invalid(action, state.status));
            }
            Ok(ApprovalState {
                status: Draft,
                approved_level: 0,
                ..state
            })
        }
    }
}
