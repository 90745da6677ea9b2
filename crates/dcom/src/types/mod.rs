//! Core DCOM types (MS-DCOM 2.2)
//!
//! - Identifiers: IPID
//! - ORPC envelopes: ORPCTHIS, ORPCTHAT and their extensions
//! - Marshaled interface pointers

mod error;
mod identifiers;
mod objref;
mod orpc;

pub use error::*;
pub use identifiers::{generate_uuid, Ipid};
pub use objref::*;
pub use orpc::*;

