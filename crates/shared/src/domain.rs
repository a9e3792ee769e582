use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{AddressError, UnknownPhaseNameError};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ProposalId);
id_newtype!(NetworkId);

/// Account identity on the ledger, always held as `0x` followed by 40 lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form used in log lines and CLI tables.
    pub fn short(&self) -> String {
        format!("{}…{}", &self.0[..6], &self.0[self.0.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let Some(hex) = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        else {
            return Err(AddressError::MissingPrefix(raw.to_string()));
        };
        if hex.len() != 40 {
            return Err(AddressError::Length {
                value: raw.to_string(),
                actual: hex.len(),
            });
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressError::NotHex(raw.to_string()));
        }
        Ok(Self(format!("0x{}", hex.to_ascii_lowercase())))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identity of one ledger log entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(tx_hash: impl Into<String>, log_index: u32) -> Self {
        Self {
            tx_hash: TxHash(tx_hash.into()),
            log_index,
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.log_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkflowPhase {
    RegisteringVoters,
    ProposalsRegistrationStarted,
    ProposalsRegistrationEnded,
    VotingSessionStarted,
    VotingSessionEnded,
    VotesTallied,
}

impl WorkflowPhase {
    pub const ALL: [WorkflowPhase; 6] = [
        WorkflowPhase::RegisteringVoters,
        WorkflowPhase::ProposalsRegistrationStarted,
        WorkflowPhase::ProposalsRegistrationEnded,
        WorkflowPhase::VotingSessionStarted,
        WorkflowPhase::VotingSessionEnded,
        WorkflowPhase::VotesTallied,
    ];

    /// Position in the remote contract's status enum.
    pub fn ordinal(self) -> u64 {
        match self {
            WorkflowPhase::RegisteringVoters => 0,
            WorkflowPhase::ProposalsRegistrationStarted => 1,
            WorkflowPhase::ProposalsRegistrationEnded => 2,
            WorkflowPhase::VotingSessionStarted => 3,
            WorkflowPhase::VotingSessionEnded => 4,
            WorkflowPhase::VotesTallied => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowPhase::RegisteringVoters => "RegisteringVoters",
            WorkflowPhase::ProposalsRegistrationStarted => "ProposalsRegistrationStarted",
            WorkflowPhase::ProposalsRegistrationEnded => "ProposalsRegistrationEnded",
            WorkflowPhase::VotingSessionStarted => "VotingSessionStarted",
            WorkflowPhase::VotingSessionEnded => "VotingSessionEnded",
            WorkflowPhase::VotesTallied => "VotesTallied",
        }
    }

    pub fn next(self) -> Option<WorkflowPhase> {
        match self {
            WorkflowPhase::RegisteringVoters => Some(WorkflowPhase::ProposalsRegistrationStarted),
            WorkflowPhase::ProposalsRegistrationStarted => {
                Some(WorkflowPhase::ProposalsRegistrationEnded)
            }
            WorkflowPhase::ProposalsRegistrationEnded => Some(WorkflowPhase::VotingSessionStarted),
            WorkflowPhase::VotingSessionStarted => Some(WorkflowPhase::VotingSessionEnded),
            WorkflowPhase::VotingSessionEnded => Some(WorkflowPhase::VotesTallied),
            WorkflowPhase::VotesTallied => None,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowPhase {
    type Err = UnknownPhaseNameError;

    // Only the full names are accepted. Older client revisions compared against a
    // truncated "ProposalsRegistrationEnd", which must not silently match anything.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        WorkflowPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == raw)
            .ok_or_else(|| UnknownPhaseNameError(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    RegisteredVoter,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Owner => f.write_str("owner"),
            Role::RegisteredVoter => f.write_str("registered voter"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_parsing_is_case_insensitive() {
        let checksummed: Address = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4"
            .parse()
            .expect("checksummed");
        let lower: Address = "0x5b38da6a701c568545dcfcb03fcb875f56beddc4"
            .parse()
            .expect("lowercase");
        assert_eq!(checksummed, lower);
        assert_eq!(lower.as_str(), "0x5b38da6a701c568545dcfcb03fcb875f56beddc4");
    }

    #[test]
    fn address_rejects_malformed_values() {
        assert!(matches!(
            "5b38da6a701c568545dcfcb03fcb875f56beddc4".parse::<Address>(),
            Err(AddressError::MissingPrefix(_))
        ));
        assert!(matches!(
            "0x1234".parse::<Address>(),
            Err(AddressError::Length { actual: 4, .. })
        ));
        assert!(matches!(
            "0xzz38da6a701c568545dcfcb03fcb875f56beddc4".parse::<Address>(),
            Err(AddressError::NotHex(_))
        ));
    }

    #[test]
    fn address_deserializes_through_validation() {
        let parsed: Address =
            serde_json::from_str("\"0xAB38da6a701c568545dcfcb03fcb875f56beddc4\"").expect("json");
        assert_eq!(parsed.as_str(), "0xab38da6a701c568545dcfcb03fcb875f56beddc4");
        assert!(serde_json::from_str::<Address>("\"0x12\"").is_err());
    }

    #[test]
    fn phase_names_round_trip_and_truncated_name_is_rejected() {
        for phase in WorkflowPhase::ALL {
            assert_eq!(phase.as_str().parse::<WorkflowPhase>().expect("name"), phase);
        }
        let err = "ProposalsRegistrationEnd"
            .parse::<WorkflowPhase>()
            .expect_err("truncated name");
        assert_eq!(err.0, "ProposalsRegistrationEnd");
    }

    #[test]
    fn phases_progress_strictly_forward() {
        let mut phase = WorkflowPhase::RegisteringVoters;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(next > phase);
            assert_eq!(next.ordinal(), phase.ordinal() + 1);
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen, WorkflowPhase::ALL.to_vec());
    }
}
