pub mod db;
pub mod engine;
pub mod ledger;
pub mod relay;
pub mod whitelist;

pub use db::{SignatureReservation, StateDb};
pub use engine::{
    AcceptOutcome, AcceptQuoteParams, CreateRequestParams, CreatedRequest, RfqEngine,
    SubmitQuoteParams,
};
pub use ledger::NullifierLedger;
pub use relay::{MessageRelay, SendMessageParams};
pub use whitelist::WhitelistGate;
