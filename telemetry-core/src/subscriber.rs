// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-capacity fanout for reassembled (or raw, unfragmented) RX frames,
//! spec §4.4.

use crate::error::{Error, Result};

/// Receives a fully reassembled (or raw, non-fragment) payload.
///
/// Runs on the worker; must not block and must not call back into the
/// registry that invoked it (spec §4.4).
pub trait RawSubscriber {
    fn on_frame(&self, std_id: u16, bytes: &[u8]);
}

/// A fixed `N`-entry table of subscriber callbacks.
///
/// Entries are compared by pointer identity (`core::ptr::eq` over the trait
/// object's data pointer), matching the source's `{callback, user}` pair
/// equality check.
pub struct SubscriberRegistry<'a, const N: usize> {
    entries: [Option<&'a dyn RawSubscriber>; N],
}

impl<'a, const N: usize> SubscriberRegistry<'a, N> {
    pub const fn new() -> Self {
        Self {
            entries: [None; N],
        }
    }

    /// Fails if `subscriber` is already registered or the table is full.
    pub fn subscribe(&mut self, subscriber: &'a dyn RawSubscriber) -> Result<()> {
        if self.entries.iter().flatten().any(|s| same(*s, subscriber)) {
            return Err(Error::BadArg);
        }
        match self.entries.iter_mut().find(|e| e.is_none()) {
            Some(slot) => {
                *slot = Some(subscriber);
                Ok(())
            }
            None => Err(Error::Alloc),
        }
    }

    /// Found → removed (`Ok`); not found → `Error::NotFound`.
    pub fn unsubscribe(&mut self, subscriber: &'a dyn RawSubscriber) -> Result<()> {
        match self
            .entries
            .iter_mut()
            .find(|e| e.is_some_and(|s| same(s, subscriber)))
        {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    pub fn notify(&self, std_id: u16, bytes: &[u8]) {
        for sub in self.entries.iter().flatten() {
            sub.on_frame(std_id, bytes);
        }
    }
}

impl<const N: usize> Default for SubscriberRegistry<'_, N> {
    fn default() -> Self {
        Self::new()
    }
}

fn same(a: &dyn RawSubscriber, b: &dyn RawSubscriber) -> bool {
    core::ptr::eq(a as *const dyn RawSubscriber as *const (), b as *const dyn RawSubscriber as *const ())
}
