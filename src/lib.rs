#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the reliable datagram protocol library.
//! 可靠数据报协议库的根。
//!
//! The library delivers ordered, acknowledged application messages over
//! plain UDP, while also allowing unordered unreliable delivery on the same
//! peer association. One side listens and accepts many peers ([`server`]),
//! the other binds a single peer ([`client`]); both drive the same
//! per-peer protocol engine ([`peer`]).
//!
//! 本库在普通UDP之上提供有序、带确认的应用消息投递，同时允许在同一个对端
//! 关联上进行无序的不可靠投递。一侧监听并接受多个对端（[`server`]），另一侧
//! 绑定单个对端（[`client`]）；两者驱动同一个对端协议引擎（[`peer`]）。

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod packet;
pub mod peer;
pub mod server;
pub mod socket;
