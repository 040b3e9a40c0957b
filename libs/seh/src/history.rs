// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Caller-owned, fixed-capacity event histories.
//!
//! Nothing in the engine keeps global state. A platform that wants to audit rejected handlers or
//! log handler executions owns one of these and feeds it from
//! [`Platform::invalid_handler_detected`][crate::Platform::invalid_handler_detected] or
//! [`Platform::handler_executed`][crate::Platform::handler_executed].

use core::fmt;

use crate::{HandlerExecution, InvalidHandler};

/// Recently rejected handlers.
pub type HandlerHistory<const N: usize> = History<InvalidHandler, N>;

/// Recently executed handlers and their dispositions.
pub type DispatchLog<const N: usize> = History<HandlerExecution, N>;

/// A ring buffer remembering the last `N` events, overwriting the oldest when full.
pub struct History<T, const N: usize> {
    entries: [Option<T>; N],
    /// Index the next event is written to.
    head: usize,
    len: usize,
    overwritten: usize,
}

impl<T, const N: usize> Default for History<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for History<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("History")
            .field("entries", &Entries(self))
            .field("head", &self.head)
            .field("len", &self.len)
            .field("overwritten", &self.overwritten)
            .finish()
    }
}

impl<T, const N: usize> History<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: [const { None }; N],
            head: 0,
            len: 0,
            overwritten: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of events that were dropped to make room for newer ones since the last
    /// [`clear`][Self::clear].
    pub const fn overwritten(&self) -> usize {
        self.overwritten
    }

    pub fn record(&mut self, event: T) {
        if N == 0 {
            self.overwritten += 1;
            return;
        }

        if self.entries[self.head].replace(event).is_some() {
            self.overwritten += 1;
        } else {
            self.len += 1;
        }
        self.head = (self.head + 1) % N;
    }

    /// Iterates the remembered events, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (newer, older) = self.entries.split_at(self.head);
        older.iter().chain(newer.iter()).filter_map(Option::as_ref)
    }

    pub fn latest(&self) -> Option<&T> {
        self.iter().next_back()
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|entry| *entry = None);
        self.head = 0;
        self.len = 0;
        self.overwritten = 0;
    }
}

struct Entries<'a, T, const N: usize>(&'a History<T, N>);

impl<T: fmt::Debug, const N: usize> fmt::Debug for Entries<'_, T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}
