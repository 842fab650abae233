//! An embedded Bluetooth Low Energy peripheral stack.
//!
//! Tries to adhere to the *Bluetooth Core Specification v4.2/5.x* (peripheral role only).
//!
//! # Using the stack
//!
//! Bluetoe is runtime and hardware-agnostic: it does not need an RTOS (although you can certainly
//! use one if you want) and provides hardware interfaces that need to be implemented once for
//! every supported MCU family.
//!
//! The only part that interacts directly with platform-specific interfaces is [`link`], the
//! Link-Layer connection engine. You have to provide it with a few hardware-specific services:
//! * A microsecond-precision [`Timer`].
//! * A [`Transmitter`] that can send data and advertising channel packets and, where supported,
//!   set up Link-Layer encryption.
//! * A processor for `link::Cmd`, which tells the support code when to call the stack's functions
//!   again.
//!
//! Application code supplies the attribute database through [`gatt`] and [`att`], and the
//! stack drives it from received ATT requests forwarded by the [`l2cap`] multiplexer.
//!
//! [`link`]: link/index.html
//! [`gatt`]: gatt/index.html
//! [`att`]: att/index.html
//! [`l2cap`]: l2cap/index.html
//! [`Timer`]: time/trait.Timer.html
//! [`Transmitter`]: link/trait.Transmitter.html

#![no_std]

#[macro_use]
mod log;
#[macro_use]
mod utils;
pub mod att;
pub mod beacon;
pub mod bytes;
pub mod config;
mod error;
pub mod gatt;
pub mod l2cap;
pub mod link;
pub mod phy;
pub mod security;
pub mod time;
pub mod uuid;

pub use self::error::Error;

/// Builds a [`gatt::ServiceListBuilder`] chain out of a struct's fields; see the
/// `bluetoe-derive` crate documentation for the field attributes it understands.
pub use bluetoe_derive::Attributes;

use self::link::llcp::VersionNumber;

/// Version of the Bluetooth specification implemented by this crate.
pub const BLUETOOTH_VERSION: VersionNumber = VersionNumber::V4_2;
