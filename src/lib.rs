//! Async WebSocket client engine for the Tokio stack.
//!
//! This library implements the client side of the
//! [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! on top of a plain byte transport: it performs the opening handshake,
//! decodes frames incrementally with a zero-copy parser, answers control
//! frames, validates UTF-8 and close codes, and walks the connection
//! through its lifecycle from connect to close.
//!
//! The usual entry point is [`handshake::connect_async`], which dials a
//! `ws://` URL and returns an open [`connection::WsConnection`]. Received
//! payloads are borrowed straight out of the connection's receive buffer,
//! so a caller (or a foreign-language binding holding the view through
//! `retain_payload`/`release_payload`) never pays for a copy on the read
//! path.

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod parser;
pub mod ringbuf;
mod request;
mod utf8;
