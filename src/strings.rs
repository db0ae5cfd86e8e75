//! String descriptor table
//!
//! Strings are addressed by 1-based index. Index 0 is not a string: it is the
//! language table, which holds one language ID per interned string, in the
//! order the strings were added.
//!
//! Text goes on the wire as UTF-16LE, so `bLength` is `2 + 2 * units`.

use alloc::vec::Vec;

use usb_device::descriptor::descriptor_type;
use usb_device::descriptor::lang_id::LangID;

use crate::{Error, Result};

/// A string descriptor's `bLength` is a single byte.
const MAX_DESCRIPTOR_LEN: usize = u8::MAX as usize;

const HEADER_LEN: usize = 2;

#[derive(Debug, Default)]
pub struct StringTable {
    /// Encoded descriptors, `entries[i]` answers index `i + 1`
    entries: Vec<Vec<u8>>,
    /// Encoded language table, header included
    languages: Vec<u8>,
}

impl StringTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            languages: Vec::new(),
        }
    }

    /// Adds `text` and returns its index.
    ///
    /// Identical strings are not merged; each call gets its own index. The
    /// table is left untouched on error.
    pub fn intern(&mut self, text: &str) -> Result<u8> {
        let units = text.encode_utf16().count();
        let len = HEADER_LEN + 2 * units;
        if len > MAX_DESCRIPTOR_LEN {
            return Err(Error::InvalidArgument);
        }

        let languages_len = if self.languages.is_empty() {
            HEADER_LEN + 2
        } else {
            self.languages.len() + 2
        };
        if languages_len > MAX_DESCRIPTOR_LEN {
            return Err(Error::Overflow);
        }

        let mut descriptor = Vec::new();
        descriptor.try_reserve_exact(len)?;
        self.entries.try_reserve(1)?;
        self.languages
            .try_reserve(languages_len - self.languages.len())?;

        descriptor.push(len as u8);
        descriptor.push(descriptor_type::STRING);
        for unit in text.encode_utf16() {
            descriptor.extend_from_slice(&unit.to_le_bytes());
        }
        self.entries.push(descriptor);

        if self.languages.is_empty() {
            self.languages.push(0);
            self.languages.push(descriptor_type::STRING);
        }
        self.languages
            .extend_from_slice(&u16::from(LangID::EN_US).to_le_bytes());
        self.languages[0] = self.languages.len() as u8;

        log::debug!("interned string {} ({:?})", self.entries.len(), text);

        Ok(self.entries.len() as u8)
    }

    /// The encoded descriptor for `index`.
    ///
    /// Index 0 is the language table and only exists once a string has been
    /// interned.
    pub fn get(&self, index: u8) -> Result<&[u8]> {
        if index == 0 {
            if self.entries.is_empty() {
                return Err(Error::InvalidIndex);
            }
            return Ok(&self.languages);
        }

        self.entries
            .get(usize::from(index) - 1)
            .map(|entry| entry.as_slice())
            .ok_or(Error::InvalidIndex)
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every string past the first `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        if len >= self.entries.len() {
            return;
        }
        self.entries.truncate(len);
        if len == 0 {
            self.languages.clear();
        } else {
            self.languages.truncate(HEADER_LEN + 2 * len);
            self.languages[0] = self.languages.len() as u8;
        }
    }

    /// Frees every string and the language table.
    pub fn release_all(&mut self) {
        self.entries = Vec::new();
        self.languages = Vec::new();
    }
}
