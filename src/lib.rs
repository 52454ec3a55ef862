//! One-way IMAP mailbox synchronization.
//!
//! larch connects to a source and a destination IMAP server and converges
//! the destination toward the source: folders are mirrored, and every
//! message whose content-derived GUID is missing at the destination is
//! copied across. A local catalog of accounts, mailboxes and message
//! GUIDs makes repeated runs cheap and keeps them from ever duplicating
//! mail.
//!
//! The crate splits into the wire layer ([`client`] and [`parse`] over
//! [`types`]), the session layer ([`session`] with retry and server
//! quirks, pooled by [`pool`]), persistence ([`catalog`], [`guid`]), and
//! the sync engine ([`mailbox`], [`account`], [`copier`]) driven by the
//! configuration in [`config`].

pub mod account;
pub mod catalog;
pub mod client;
pub mod config;
pub mod copier;
pub mod error;
pub mod guid;
pub mod mailbox;
mod parse;
pub mod pool;
pub mod session;
pub mod types;
pub mod uri;
pub mod utf7;

#[cfg(test)]
mod mock_stream;

pub use crate::error::{Error, Result};
pub use crate::uri::ImapUri;
