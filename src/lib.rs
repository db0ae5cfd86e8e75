//! Bootloader-mode USB OTG device control plane
//!
//! Brings up a Synopsys-style USB OTG core, builds the standard USB
//! descriptor tree on demand and keeps the per-endpoint handler table that a
//! transfer dispatcher consults. The hardware itself is reached through the
//! capabilities in [`platform`] and [`regs`], so the whole control plane can
//! run against fakes on a host.
//!
//! The entry point is [`otg::Controller`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::fmt;

pub(crate) use embedded_hal as hal;

pub mod delay;
pub mod descriptor;
pub mod dma;
pub mod endpoint;
pub mod otg;
pub mod platform;
pub mod prelude;
pub mod registry;
pub mod regs;
pub mod strings;

/// Control plane error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// An argument is outside the values the operation accepts
    InvalidArgument,
    /// A descriptor, configuration, interface or endpoint index does not exist
    InvalidIndex,
    /// The negotiated speed identifier is not one the core reports
    InvalidSpeed,
    /// The endpoint hardware cannot carry traffic in the requested direction
    DirectionMismatch,
    /// The configuration's total length has not been computed yet
    NotFinalized,
    /// The controller is not brought up
    NotReady,
    /// Growing a descriptor table failed
    Allocation,
    /// A descriptor grew past what its length field can express
    Overflow,
    /// The core never signalled completion of a reset
    Unresponsive,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::InvalidArgument => "invalid argument",
            Error::InvalidIndex => "no such descriptor index",
            Error::InvalidSpeed => "unsupported negotiated speed",
            Error::DirectionMismatch => "endpoint does not support this direction",
            Error::NotFinalized => "configuration not finalized",
            Error::NotReady => "controller is not brought up",
            Error::Allocation => "descriptor allocation failed",
            Error::Overflow => "descriptor length overflow",
            Error::Unresponsive => "USB core did not respond",
        };
        f.write_str(msg)
    }
}

impl From<alloc::collections::TryReserveError> for Error {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Error::Allocation
    }
}

pub type Result<T> = core::result::Result<T, Error>;
