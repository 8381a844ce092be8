#![cfg_attr(not(feature = "std"), no_std)]

//! CHERI compressed capabilities for the RISC-V 64r and 128r formats.
//!
//! [capability::Capability] is generic over a [format::CapFormat], which describes where each
//! field lives in the pesbt word. [lazy_regs] builds a register file on top that only decompresses
//! a register when it is read.

pub mod bounds;
pub mod capability;
pub mod format;
pub mod lazy_regs;
pub mod perms;
#[cfg(feature = "std")]
pub mod rand;
pub mod util;

pub use capability::{CapEncodeErr, Capability};
pub use format::{CapFormat, Cc128r, Cc64r};
pub use perms::{ArchPerms, CapPerms};

pub type Capability64r = Capability<Cc64r>;
pub type Capability128r = Capability<Cc128r>;
