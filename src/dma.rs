//! DMA transfer buffers
//!
//! The core's DMA engine fetches on 64-byte boundaries, so every buffer it is
//! pointed at is 64-byte aligned.

use alloc::boxed::Box;

use as_slice::{AsMutSlice, AsSlice};

/// Size of one transfer buffer in bytes
pub const DMA_BUFFER_LEN: usize = 0x80;

/// Required alignment of a transfer buffer
pub const DMA_ALIGN: usize = 0x40;

#[repr(C, align(64))]
pub struct DmaBuffer {
    buf: [u8; DMA_BUFFER_LEN],
}

impl DmaBuffer {
    pub fn new() -> Box<Self> {
        Box::new(Self {
            buf: [0; DMA_BUFFER_LEN],
        })
    }

    /// Bus address the core is programmed with
    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }
}

impl AsSlice for DmaBuffer {
    type Element = u8;

    fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl AsMutSlice for DmaBuffer {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

/// Implemented for types that can be handed to the core's DMA engine
pub trait Buffer {
    fn as_ptr(&self) -> *const u8;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Buffer for T
where
    T: ?Sized + AsSlice<Element = u8>,
{
    fn as_ptr(&self) -> *const u8 {
        self.as_slice().as_ptr()
    }

    fn len(&self) -> usize {
        self.as_slice().len()
    }
}

/// The IN and OUT buffers of the bulk pipe
pub struct TransferBuffers {
    pub input: Box<DmaBuffer>,
    pub output: Box<DmaBuffer>,
}

impl TransferBuffers {
    pub fn new() -> Self {
        Self {
            input: DmaBuffer::new(),
            output: DmaBuffer::new(),
        }
    }
}

impl Default for TransferBuffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_aligned_and_sized() {
        let mut buffers = TransferBuffers::new();

        for buffer in [&buffers.input, &buffers.output].iter() {
            assert_eq!(buffer.address() % DMA_ALIGN, 0);
            assert_eq!(Buffer::len(&***buffer), DMA_BUFFER_LEN);
        }

        buffers.output.as_mut_slice()[0] = 0xA5;
        assert_eq!(buffers.output.as_slice()[0], 0xA5);
        assert!(buffers.input.as_slice().iter().all(|&b| b == 0));
    }
}
