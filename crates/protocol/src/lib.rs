//! # Pathgate Protocol Library
//!
//! Wire types exchanged between the Pathgate server and its clients.
//!
//! ## Overview
//!
//! Everything a client sees as JSON lives here:
//!
//! - **Listings**: [`DirEntry`] values describing permitted folder contents
//! - **Media categories**: the coarse [`MimeCategory`] used by viewers to pick a player
//! - **Errors**: the uniform [`ErrorResponse`] body returned with every failure status
//!
//! Field names are camelCase on the wire.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{DirEntry, MimeCategory};
//!
//! let entry = DirEntry::file("/photos/cat.jpg", 2048, Some(MimeCategory::Image));
//! let json = serde_json::to_string(&entry).unwrap();
//! assert!(json.contains("\"virtualPath\":\"/photos/cat.jpg\""));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Listing and error payloads

pub mod messages;

pub use messages::{
    AccessGrant, DirEntry, ErrorCode, ErrorResponse, ListingWarning, MimeCategory, PrincipalInfo,
};
