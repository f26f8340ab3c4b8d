//! Transaction display classification
//!
//! Maps `(program id, function name, decryptable)` to a closed set of
//! display kinds. Adding a transaction kind means adding a variant here and
//! letting the compiler point at every match that needs updating.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Program id of the native value program
pub const CREDITS_PROGRAM: &str = "credits.obs";

/// What a transaction should be presented as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    /// Private credits received or sent between records
    PrivateTransfer,
    /// Public credits moved between account balances
    PublicTransfer,
    /// Public credits converted into a private record
    Shield,
    /// A private record converted into public credits
    Unshield,
    /// Two records merged into one
    Join,
    /// One record split into two
    Split,
    /// A standalone fee payment
    FeeOnly,
    /// A program deployment
    Deployment,
    /// Any other program execution
    ProgramExecution,
    /// An execution whose contents this wallet cannot decrypt
    Encrypted,
}

impl DisplayKind {
    /// Stable storage string
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayKind::PrivateTransfer => "private_transfer",
            DisplayKind::PublicTransfer => "public_transfer",
            DisplayKind::Shield => "shield",
            DisplayKind::Unshield => "unshield",
            DisplayKind::Join => "join",
            DisplayKind::Split => "split",
            DisplayKind::FeeOnly => "fee_only",
            DisplayKind::Deployment => "deployment",
            DisplayKind::ProgramExecution => "program_execution",
            DisplayKind::Encrypted => "encrypted",
        }
    }

    /// Parse a storage string
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "private_transfer" => Ok(DisplayKind::PrivateTransfer),
            "public_transfer" => Ok(DisplayKind::PublicTransfer),
            "shield" => Ok(DisplayKind::Shield),
            "unshield" => Ok(DisplayKind::Unshield),
            "join" => Ok(DisplayKind::Join),
            "split" => Ok(DisplayKind::Split),
            "fee_only" => Ok(DisplayKind::FeeOnly),
            "deployment" => Ok(DisplayKind::Deployment),
            "program_execution" => Ok(DisplayKind::ProgramExecution),
            "encrypted" => Ok(DisplayKind::Encrypted),
            other => Err(Error::InvalidStatus(format!("unknown display kind: {other}"))),
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            DisplayKind::PrivateTransfer => "Private transfer",
            DisplayKind::PublicTransfer => "Public transfer",
            DisplayKind::Shield => "Shield",
            DisplayKind::Unshield => "Unshield",
            DisplayKind::Join => "Join records",
            DisplayKind::Split => "Split record",
            DisplayKind::FeeOnly => "Fee",
            DisplayKind::Deployment => "Deployment",
            DisplayKind::ProgramExecution => "Program execution",
            DisplayKind::Encrypted => "Encrypted",
        }
    }

    /// Icon name for the UI layer
    pub fn icon(&self) -> &'static str {
        match self {
            DisplayKind::PrivateTransfer => "arrows-private",
            DisplayKind::PublicTransfer => "arrows-public",
            DisplayKind::Shield => "shield-down",
            DisplayKind::Unshield => "shield-up",
            DisplayKind::Join => "merge",
            DisplayKind::Split => "fork",
            DisplayKind::FeeOnly => "receipt",
            DisplayKind::Deployment => "package",
            DisplayKind::ProgramExecution => "code",
            DisplayKind::Encrypted => "lock",
        }
    }
}

impl std::fmt::Display for DisplayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a transition into a display kind.
///
/// Undecryptable private executions collapse into [`DisplayKind::Encrypted`]
/// regardless of function, since the wallet cannot claim anything about
/// their contents.
pub fn classify(program_id: &str, function_name: &str, decryptable: bool) -> DisplayKind {
    if program_id == CREDITS_PROGRAM {
        let kind = match function_name {
            "transfer_private" | "transfer_private_to_private" => DisplayKind::PrivateTransfer,
            "transfer_public" | "transfer_public_to_public" => {
                return DisplayKind::PublicTransfer;
            }
            "transfer_public_to_private" => DisplayKind::Shield,
            "transfer_private_to_public" => DisplayKind::Unshield,
            "join" => DisplayKind::Join,
            "split" => DisplayKind::Split,
            "fee" | "fee_private" | "fee_public" => DisplayKind::FeeOnly,
            _ => DisplayKind::ProgramExecution,
        };
        if decryptable {
            kind
        } else {
            DisplayKind::Encrypted
        }
    } else if function_name == "deploy" {
        DisplayKind::Deployment
    } else if decryptable {
        DisplayKind::ProgramExecution
    } else {
        DisplayKind::Encrypted
    }
}
