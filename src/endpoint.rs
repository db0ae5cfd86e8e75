//! Endpoint handler table
//!
//! One slot per physical endpoint. Each slot remembers which directions its
//! hardware can carry and holds at most one IN and one OUT handler.

use crate::descriptor::Direction;
use crate::regs::{HWCFG1_IN, HWCFG1_OUT};
use crate::{Error, Result};

/// Upper bound on physical endpoints, control endpoint included
pub const MAX_ENDPOINTS: usize = 16;

/// Transfer handler; the token is the one given at installation.
pub type EndpointHandler = fn(token: u32);

#[derive(Debug, Clone, Copy)]
pub struct HandlerInfo {
    pub handler: EndpointHandler,
    pub token: u32,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    capability: Direction,
    input: Option<HandlerInfo>,
    output: Option<HandlerInfo>,
}

impl Slot {
    const EMPTY: Self = Self {
        capability: Direction::Bidirectional,
        input: None,
        output: None,
    };
}

#[derive(Debug)]
pub struct HandlerTable {
    slots: [Slot; MAX_ENDPOINTS],
    count: usize,
}

impl HandlerTable {
    /// A table for `count` endpoints, all bidirectional until told otherwise.
    pub fn new(count: usize) -> Self {
        assert!(count <= MAX_ENDPOINTS);

        Self {
            slots: [Slot::EMPTY; MAX_ENDPOINTS],
            count,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Takes every endpoint's capability from a `GHWCFG1` value.
    pub fn set_capabilities(&mut self, hwcfg1: u32) {
        for (n, slot) in self.slots[..self.count].iter_mut().enumerate() {
            slot.capability = match (hwcfg1 >> (2 * n)) & 0b11 {
                HWCFG1_IN => Direction::In,
                HWCFG1_OUT => Direction::Out,
                // bidirectional, or the reserved encoding
                _ => Direction::Bidirectional,
            };
        }
    }

    pub fn capability(&self, endpoint: usize) -> Option<Direction> {
        self.slots[..self.count]
            .get(endpoint)
            .map(|slot| slot.capability)
    }

    /// Installs `handler` for traffic on `endpoint` in `direction`.
    ///
    /// Replaces whatever was installed for that pair. On error the table is
    /// unchanged.
    pub fn install(
        &mut self,
        endpoint: usize,
        direction: Direction,
        handler: EndpointHandler,
        token: u32,
    ) -> Result<()> {
        let slot = self.slots[..self.count]
            .get_mut(endpoint)
            .ok_or(Error::InvalidIndex)?;

        if direction == Direction::Bidirectional {
            return Err(Error::InvalidArgument);
        }
        if slot.capability != direction && slot.capability != Direction::Bidirectional {
            return Err(Error::DirectionMismatch);
        }

        let info = Some(HandlerInfo { handler, token });
        match direction {
            Direction::In => slot.input = info,
            Direction::Out => slot.output = info,
            Direction::Bidirectional => {}
        }

        Ok(())
    }

    pub fn handler(&self, endpoint: usize, direction: Direction) -> Option<HandlerInfo> {
        let slot = self.slots[..self.count].get(endpoint)?;
        match direction {
            Direction::In => slot.input,
            Direction::Out => slot.output,
            Direction::Bidirectional => None,
        }
    }

    /// Runs the handler installed for the pair, if any.
    pub fn dispatch(&self, endpoint: usize, direction: Direction) -> bool {
        match self.handler(endpoint, direction) {
            Some(info) => {
                (info.handler)(info.token);
                true
            }
            None => false,
        }
    }

    /// Drops every handler. Capabilities are kept.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.input = None;
            slot.output = None;
        }
    }
}
