use serde::Serialize;
use thiserror::Error;

use crate::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestructiveAction {
    StopSharing,
    NuclearReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reversibility {
    /// The household can be shared again afterwards.
    Reversible,
    Irreversible,
}

impl DestructiveAction {
    pub fn reversibility(self) -> Reversibility {
        match self {
            DestructiveAction::StopSharing => Reversibility::Reversible,
            DestructiveAction::NuclearReset => Reversibility::Irreversible,
        }
    }

    pub fn warning(self) -> &'static str {
        match self {
            DestructiveAction::StopSharing => {
                "Other members lose access to this household. You can share it again later."
            }
            DestructiveAction::NuclearReset => {
                "Deletes every record of this app from the shared store, including all shares. \
                 This cannot be undone."
            }
        }
    }

    /// What the user must type to confirm.
    pub fn phrase(self) -> &'static str {
        match self {
            DestructiveAction::StopSharing => "STOP SHARING",
            DestructiveAction::NuclearReset => "DELETE EVERYTHING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfirmationError {
    #[error("confirmation phrase does not match for {action:?}")]
    PhraseMismatch { action: DestructiveAction },
    #[error("confirmation was issued for {given:?}, not {expected:?}")]
    WrongAction {
        expected: DestructiveAction,
        given: DestructiveAction,
    },
}

impl From<ConfirmationError> for AppError {
    fn from(err: ConfirmationError) -> Self {
        AppError::new("CONFIRM/REQUIRED", err.to_string())
    }
}

/// Proof that the user acknowledged a destructive action. Only obtainable by
/// typing the action's phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    action: DestructiveAction,
}

impl Confirmation {
    pub fn acknowledge(action: DestructiveAction, typed: &str) -> Result<Self, ConfirmationError> {
        if typed.trim() == action.phrase() {
            Ok(Self { action })
        } else {
            Err(ConfirmationError::PhraseMismatch { action })
        }
    }

    pub fn action(&self) -> DestructiveAction {
        self.action
    }

    pub fn require(&self, expected: DestructiveAction) -> Result<(), ConfirmationError> {
        if self.action == expected {
            Ok(())
        } else {
            Err(ConfirmationError::WrongAction {
                expected,
                given: self.action,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phrase_must_match_exactly() {
        assert!(Confirmation::acknowledge(DestructiveAction::NuclearReset, "delete everything").is_err());
        let ok = Confirmation::acknowledge(DestructiveAction::NuclearReset, " DELETE EVERYTHING ").unwrap();
        assert!(ok.require(DestructiveAction::NuclearReset).is_ok());
        assert_eq!(
            ok.require(DestructiveAction::StopSharing),
            Err(ConfirmationError::WrongAction {
                expected: DestructiveAction::StopSharing,
                given: DestructiveAction::NuclearReset,
            })
        );
    }

    #[test]
    fn reversibility_is_reported() {
        assert_eq!(DestructiveAction::StopSharing.reversibility(), Reversibility::Reversible);
        assert_eq!(DestructiveAction::NuclearReset.reversibility(), Reversibility::Irreversible);
    }
}
