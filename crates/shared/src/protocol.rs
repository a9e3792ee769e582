use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Address, EventKey, ProposalId},
    error::UnknownEventNameError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    VoterRegistered,
    ProposalRegistered,
    Voted,
    WorkflowStatusChange,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::VoterRegistered,
        EventKind::ProposalRegistered,
        EventKind::Voted,
        EventKind::WorkflowStatusChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::VoterRegistered => "VoterRegistered",
            EventKind::ProposalRegistered => "ProposalRegistered",
            EventKind::Voted => "Voted",
            EventKind::WorkflowStatusChange => "WorkflowStatusChange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventNameError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| UnknownEventNameError(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "return_values")]
pub enum EventPayload {
    VoterRegistered {
        voter: Address,
    },
    ProposalRegistered {
        proposal_id: ProposalId,
    },
    Voted {
        voter: Address,
        proposal_id: ProposalId,
    },
    WorkflowStatusChange {
        previous_status: u64,
        new_status: u64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::VoterRegistered { .. } => EventKind::VoterRegistered,
            EventPayload::ProposalRegistered { .. } => EventKind::ProposalRegistered,
            EventPayload::Voted { .. } => EventKind::Voted,
            EventPayload::WorkflowStatusChange { .. } => EventKind::WorkflowStatusChange,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub key: EventKey,
    pub block_number: u64,
    /// Origin of the transaction that emitted the log.
    pub sender: Address,
    pub payload: EventPayload,
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTag {
    Earliest,
    Latest,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Earliest => f.write_str("earliest"),
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Number(n) => write!(f, "{n}"),
        }
    }
}

impl FromStr for BlockTag {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "earliest" => Ok(BlockTag::Earliest),
            "latest" => Ok(BlockTag::Latest),
            other => other.parse().map(BlockTag::Number),
        }
    }
}

/// Contract methods reachable through the gateway, with their arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "camelCase")]
pub enum RemoteMethod {
    Owner,
    WorkflowStatus,
    GetOneProposal {
        proposal_id: ProposalId,
    },
    GetVoter {
        voter: Address,
    },
    #[serde(rename = "winningProposalID")]
    WinningProposalId,
    AddVoter {
        voter: Address,
    },
    StartProposalsRegistering,
    EndProposalsRegistering,
    StartVotingSession,
    EndVotingSession,
    TallyVotes,
    AddProposal {
        description: String,
    },
    SetVote {
        proposal_id: ProposalId,
    },
}

impl RemoteMethod {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteMethod::Owner => "owner",
            RemoteMethod::WorkflowStatus => "workflowStatus",
            RemoteMethod::GetOneProposal { .. } => "getOneProposal",
            RemoteMethod::GetVoter { .. } => "getVoter",
            RemoteMethod::WinningProposalId => "winningProposalID",
            RemoteMethod::AddVoter { .. } => "addVoter",
            RemoteMethod::StartProposalsRegistering => "startProposalsRegistering",
            RemoteMethod::EndProposalsRegistering => "endProposalsRegistering",
            RemoteMethod::StartVotingSession => "startVotingSession",
            RemoteMethod::EndVotingSession => "endVotingSession",
            RemoteMethod::TallyVotes => "tallyVotes",
            RemoteMethod::AddProposal { .. } => "addProposal",
            RemoteMethod::SetVote { .. } => "setVote",
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            RemoteMethod::Owner
                | RemoteMethod::WorkflowStatus
                | RemoteMethod::GetOneProposal { .. }
                | RemoteMethod::GetVoter { .. }
                | RemoteMethod::WinningProposalId
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub description: String,
    pub vote_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub is_registered: bool,
    pub has_voted: bool,
    pub voted_proposal_id: ProposalId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CallValue {
    Address(Address),
    Uint(u64),
    Proposal(ProposalRecord),
    Voter(VoterRecord),
}

impl CallValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            CallValue::Address(_) => "address",
            CallValue::Uint(_) => "uint",
            CallValue::Proposal(_) => "proposal",
            CallValue::Voter(_) => "voter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: crate::domain::TxHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub method: RemoteMethod,
    pub from: Address,
    pub block: BlockTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResponse {
    pub value: CallValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub method: RemoteMethod,
    pub from: Address,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockNumberResponse {
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        format!("0x{:040x}", n).parse().expect("address")
    }

    #[test]
    fn ledger_event_json_carries_event_name_and_return_values() {
        let event = LedgerEvent {
            key: EventKey::new("0xabc", 2),
            block_number: 7,
            sender: addr(1),
            payload: EventPayload::Voted {
                voter: addr(1),
                proposal_id: ProposalId(3),
            },
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["payload"]["event"], "Voted");
        assert_eq!(json["payload"]["return_values"]["proposal_id"], 3);
        assert_eq!(json["key"]["log_index"], 2);

        let back: LedgerEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
        assert_eq!(back.kind(), EventKind::Voted);
    }

    #[test]
    fn remote_methods_use_contract_names_on_the_wire() {
        let json = serde_json::to_value(RemoteMethod::WinningProposalId).expect("serialize");
        assert_eq!(json["name"], "winningProposalID");
        assert_eq!(RemoteMethod::WinningProposalId.name(), "winningProposalID");

        let json = serde_json::to_value(RemoteMethod::SetVote {
            proposal_id: ProposalId(2),
        })
        .expect("serialize");
        assert_eq!(json["name"], "setVote");
        assert_eq!(json["args"]["proposal_id"], 2);
        assert!(!RemoteMethod::TallyVotes.is_read_only());
        assert!(RemoteMethod::Owner.is_read_only());
    }

    #[test]
    fn block_tags_parse_from_query_strings() {
        assert_eq!("earliest".parse::<BlockTag>().expect("tag"), BlockTag::Earliest);
        assert_eq!("latest".parse::<BlockTag>().expect("tag"), BlockTag::Latest);
        assert_eq!("42".parse::<BlockTag>().expect("tag"), BlockTag::Number(42));
        assert!("soon".parse::<BlockTag>().is_err());
        assert_eq!(BlockTag::Number(9).to_string(), "9");
    }

    #[test]
    fn event_kind_names_are_the_contract_event_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().expect("kind"), kind);
        }
        assert!("ProposalAdded".parse::<EventKind>().is_err());
    }
}
