pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod message;
pub mod request;
pub mod settlement;
pub mod types;

pub use config::{NodeConfig, VaultConfig, WhitelistMode};
pub use constants::*;
pub use error::{ErrorKind, NoctisError};
pub use ledger::{
    CommitmentStatus, NullifierStatus, OperationKind, Party, UsedCommitment, UsedNullifier,
    UsedSignature,
};
pub use message::Message;
pub use settlement::{
    BalanceSource, LegReceipt, PartyDeposit, SettlementDriver, SettlementError, SettlementLeg,
    SettlementPlan, SettlementRecord,
};
pub use request::{Quote, QuoteRequest, QuoteStatus, RequestStatus};
pub use types::*;
