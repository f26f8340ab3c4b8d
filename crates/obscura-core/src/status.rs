//! Transaction and transition status machines

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Transaction lifecycle status
///
/// `Finalized`, `Rejected` and `Failed` are terminal; every other status has
/// at least one legal successor. Moving out of a terminal status is a data
/// integrity violation and must be raised, never ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created and persisted, inputs locked, not yet processed
    Queued,
    /// Fetching prover artifacts required for generation
    DownloadingProverFiles,
    /// Executing the authorization into a transaction
    GeneratingTransaction,
    /// Executing a deployment authorization
    GeneratingDeployment,
    /// Submitting the generated transaction to the chain
    Broadcasting,
    /// Accepted by the chain or the delegated prover, awaiting finality
    Completed,
    /// Confirmed final
    Finalized,
    /// Explicitly rejected by the chain or prover
    Rejected,
    /// Abandoned after retry exhaustion, timeout or cancellation
    Failed,
}

impl TransactionStatus {
    /// Stable storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Queued => "queued",
            TransactionStatus::DownloadingProverFiles => "downloading_prover_files",
            TransactionStatus::GeneratingTransaction => "generating_transaction",
            TransactionStatus::GeneratingDeployment => "generating_deployment",
            TransactionStatus::Broadcasting => "broadcasting",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Finalized => "finalized",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Parse a storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TransactionStatus::Queued),
            "downloading_prover_files" => Ok(TransactionStatus::DownloadingProverFiles),
            "generating_transaction" => Ok(TransactionStatus::GeneratingTransaction),
            "generating_deployment" => Ok(TransactionStatus::GeneratingDeployment),
            "broadcasting" => Ok(TransactionStatus::Broadcasting),
            "completed" => Ok(TransactionStatus::Completed),
            "finalized" => Ok(TransactionStatus::Finalized),
            "rejected" => Ok(TransactionStatus::Rejected),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(Error::InvalidStatus(format!(
                "unknown transaction status: {other}"
            ))),
        }
    }

    /// Whether this status ends the lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Finalized | TransactionStatus::Rejected | TransactionStatus::Failed
        )
    }

    /// Whether the transaction is actively being processed
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            TransactionStatus::DownloadingProverFiles
                | TransactionStatus::GeneratingTransaction
                | TransactionStatus::GeneratingDeployment
                | TransactionStatus::Broadcasting
        )
    }

    /// Whether this transaction still references locked inputs
    pub fn holds_input_locks(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match self {
            Queued => matches!(
                next,
                DownloadingProverFiles
                    | GeneratingTransaction
                    | GeneratingDeployment
                    | Failed
            ),
            DownloadingProverFiles => {
                matches!(next, GeneratingTransaction | GeneratingDeployment | Failed)
            }
            GeneratingTransaction | GeneratingDeployment => {
                matches!(next, Broadcasting | Completed | Finalized | Rejected | Failed)
            }
            Broadcasting => matches!(next, Completed | Rejected | Failed),
            Completed => matches!(next, Finalized | Failed),
            Finalized | Rejected | Failed => false,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-transition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    /// Authorized, waiting for generation
    Queued,
    /// Being executed into a proof
    Generating,
    /// Included in a generated transaction
    Completed,
    /// Generation failed or the transaction was cancelled
    Failed,
}

impl TransitionStatus {
    /// Stable storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Queued => "queued",
            TransitionStatus::Generating => "generating",
            TransitionStatus::Completed => "completed",
            TransitionStatus::Failed => "failed",
        }
    }

    /// Parse a storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TransitionStatus::Queued),
            "generating" => Ok(TransitionStatus::Generating),
            "completed" => Ok(TransitionStatus::Completed),
            "failed" => Ok(TransitionStatus::Failed),
            other => Err(Error::InvalidStatus(format!(
                "unknown transition status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for TransitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What kind of intent a transaction carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Program execution (transfers included)
    Execute,
    /// Program deployment
    Deploy,
    /// Standalone fee payment
    Fee,
}

impl TransactionKind {
    /// Stable storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Execute => "execute",
            TransactionKind::Deploy => "deploy",
            TransactionKind::Fee => "fee",
        }
    }

    /// Parse a storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "execute" => Ok(TransactionKind::Execute),
            "deploy" => Ok(TransactionKind::Deploy),
            "fee" => Ok(TransactionKind::Fee),
            other => Err(Error::InvalidStatus(format!(
                "unknown transaction kind: {other}"
            ))),
        }
    }

    /// The generation status this kind passes through
    pub fn generating_status(&self) -> TransactionStatus {
        match self {
            TransactionKind::Deploy => TransactionStatus::GeneratingDeployment,
            TransactionKind::Execute | TransactionKind::Fee => {
                TransactionStatus::GeneratingTransaction
            }
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            TransactionStatus::Queued,
            TransactionStatus::DownloadingProverFiles,
            TransactionStatus::GeneratingTransaction,
            TransactionStatus::GeneratingDeployment,
            TransactionStatus::Broadcasting,
            TransactionStatus::Completed,
            TransactionStatus::Finalized,
            TransactionStatus::Rejected,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TransactionStatus::parse("half_done").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransactionStatus::Finalized.is_terminal());
        assert!(TransactionStatus::Rejected.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Completed.is_terminal());
        assert!(!TransactionStatus::Queued.is_terminal());
    }

    #[test]
    fn test_terminal_states_allow_no_successor() {
        use TransactionStatus::*;
        for terminal in [Finalized, Rejected, Failed] {
            for next in [
                Queued,
                DownloadingProverFiles,
                GeneratingTransaction,
                GeneratingDeployment,
                Broadcasting,
                Completed,
                Finalized,
                Rejected,
                Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        use TransactionStatus::*;
        assert!(Queued.can_transition_to(DownloadingProverFiles));
        assert!(DownloadingProverFiles.can_transition_to(GeneratingTransaction));
        assert!(GeneratingTransaction.can_transition_to(Broadcasting));
        assert!(Broadcasting.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Finalized));
    }

    #[test]
    fn test_delegation_and_only_execute_shortcuts() {
        use TransactionStatus::*;
        // Delegation completes at generation time.
        assert!(GeneratingTransaction.can_transition_to(Completed));
        // Only-execute finalizes without broadcasting.
        assert!(GeneratingTransaction.can_transition_to(Finalized));
        // Broadcasting may not be skipped backwards.
        assert!(!Broadcasting.can_transition_to(Queued));
    }

    #[test]
    fn test_processing_statuses() {
        assert!(TransactionStatus::GeneratingTransaction.is_processing());
        assert!(TransactionStatus::Broadcasting.is_processing());
        assert!(!TransactionStatus::Queued.is_processing());
        assert!(!TransactionStatus::Completed.is_processing());
    }

    #[test]
    fn test_transition_status_roundtrip() {
        for status in [
            TransitionStatus::Queued,
            TransitionStatus::Generating,
            TransitionStatus::Completed,
            TransitionStatus::Failed,
        ] {
            assert_eq!(TransitionStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_kind_generating_status() {
        assert_eq!(
            TransactionKind::Execute.generating_status(),
            TransactionStatus::GeneratingTransaction
        );
        assert_eq!(
            TransactionKind::Deploy.generating_status(),
            TransactionStatus::GeneratingDeployment
        );
    }
}
