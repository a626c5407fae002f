#![doc = include_str!("../README.md")]

pub mod checksum;
pub mod codec;
pub mod crypto;
pub mod fault;
pub mod handshake;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod session;
pub mod validate;

pub use seq::Seq;
