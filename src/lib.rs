//! This crate contains the command execution core of a MongoDB client: lazy server-side
//! cursors, resumable change streams, logical sessions with cluster time gossiping, command
//! monitoring and bulk writes. It uses the [`bson`] crate for BSON support and is fully async,
//! running on [`tokio`].
//!
//! The crate does not open connections itself. Bytes on the wire, connection pooling and server
//! selection belong to a [`Transport`] implementation that the [`Client`] is constructed with;
//! everything above that (building command documents, attaching sessions, cluster times and
//! read/write concerns, interpreting replies and errors) happens here.
//!
//! # Example Usage
//!
//! ```rust
//! use mongodb_cursor_core::{
//!     bson::{doc, Document},
//!     error::Result,
//!     options::ClientOptions,
//!     Client,
//!     Transport,
//! };
//!
//! async fn print_titles(transport: impl Transport) -> Result<()> {
//!     let client = Client::with_transport(transport, ClientOptions::default());
//!     let coll = client.database("library").collection::<Document>("books");
//!
//!     // No command is sent until the cursor is first iterated.
//!     let mut cursor = coll.find(doc! { "author": "George Orwell" }, None);
//!     while let Some(book) = cursor.next().await? {
//!         println!("title: {:?}", book.get_str("title"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Change streams
//!
//! A [`ChangeStream`](change_stream::ChangeStream) tracks a resume token as it is iterated.
//! When a `getMore` fails with a resumable error (a network error, or a server error that the
//! server labels or codes as resumable) the stream transparently re-issues its `aggregate`
//! from the last token it delivered, at most once per call.
//!
//! # Logging
//!
//! Command monitoring events are emitted as [`tracing`](https://docs.rs/tracing) events at
//! `DEBUG` level with target `mongodb::command`, in addition to being delivered to any
//! [`EventHandler`](event::EventHandler) configured on the client.

#![warn(missing_docs)]
#![cfg_attr(docsrs, warn(rustdoc::missing_crate_level_docs))]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

mod bson_util;
mod bulk_write;
pub mod change_stream;
mod client;
mod coll;
mod concern;
mod cursor;
mod db;
pub mod error;
pub mod event;
mod operation;
pub mod results;
mod trace;
mod transport;

#[cfg(test)]
mod test;

pub use crate::{
    client::{session::ClientSession, Client},
    coll::Collection,
    cursor::Cursor,
    db::Database,
    transport::{StreamDescription, Transport},
};

pub use {bulk_write::WriteModel, client::session::ClusterTime, coll::Namespace};
