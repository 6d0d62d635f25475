#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod dispatch;
pub mod error;
pub mod message;

pub use client::{Client, ConnectionState};
pub use dispatch::ClientEvent;
pub use error::Error;
pub use message::Message;

pub type Result<T> = std::result::Result<T, Error>;
