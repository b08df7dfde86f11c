//! A proof-of-retrievability service with updatable storage: a
//! linear-algebra audit over a 57-bit prime field, an RFC-6962-style
//! Merkle range-read authenticator, and an update protocol that keeps raw
//! bytes, the Merkle tree, and the audit tag vector mutually consistent.

pub mod audit;
pub mod config;
pub mod datafile;
pub mod error;
pub mod field;
pub mod hash;
pub mod merkle;
pub mod packer;
pub mod prng;
pub mod session;
pub mod update;
pub mod wire;

pub use error::{PorError, PorResult};
