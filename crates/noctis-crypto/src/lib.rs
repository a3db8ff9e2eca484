pub mod hash;
pub mod keypair;
pub mod stealth;
pub mod wots;

pub use keypair::WotsKeyPair;
pub use wots::{verify, Verification};
