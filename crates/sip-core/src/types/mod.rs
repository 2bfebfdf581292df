//! Typed views over header values

pub mod body;
pub mod cseq;
pub mod name_addr;
pub mod via;

pub use body::Body;
pub use cseq::{CSeq, RAck};
pub use name_addr::NameAddr;
pub use via::{Via, BRANCH_MAGIC_COOKIE};
