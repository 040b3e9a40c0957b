// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Handler validation against per-module function tables.
//!
//! A corrupted or attacker controlled stack can redirect a frame record's handler to arbitrary
//! code. Before the dispatcher runs a handler it looks up the function table of the module the
//! handler address belongs to and requires the address to be one of the module's registered
//! handler entry points. This runs for every frame of every dispatch, so the lookup is a binary
//! search over the sorted, module-relative table.

use crate::Platform;

/// The registered handler entry points of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionTable<'a> {
    /// The module is known to contain no handlers at all (e.g. a resource-only image).
    NoHandlers,
    /// Sorted, module-relative handler entry points.
    Sorted(&'a [u32]),
}

/// A module's function table together with the module's base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFunctions<'a> {
    pub base: usize,
    pub table: FunctionTable<'a>,
}

/// Why a handler was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The handler lives in a module that must not contain handlers.
    NoHandlersExpected,
    /// The handler is not an entry in its module's function table.
    NotInTable { table: usize, len: usize },
}

/// Reported through [`Platform::invalid_handler_detected`] when a handler is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidHandler {
    /// Absolute address of the rejected handler.
    pub handler: usize,
    pub rejection: Rejection,
}

impl ImageFunctions<'_> {
    /// Checks `handler` against this module's table.
    ///
    /// An empty table cannot vouch for anything, so it is treated like a missing table and the
    /// handler is trusted.
    ///
    /// # Errors
    ///
    /// Returns the reason the handler was rejected.
    pub fn check(&self, handler: usize) -> Result<(), Rejection> {
        let entries = match self.table {
            FunctionTable::NoHandlers => return Err(Rejection::NoHandlersExpected),
            FunctionTable::Sorted([]) => return Ok(()),
            FunctionTable::Sorted(entries) => entries,
        };

        let found = handler
            .checked_sub(self.base)
            .and_then(|rva| u32::try_from(rva).ok())
            .is_some_and(|rva| entries.binary_search(&rva).is_ok());

        if found {
            Ok(())
        } else {
            Err(Rejection::NotInTable {
                table: entries.as_ptr().addr(),
                len: entries.len(),
            })
        }
    }
}

/// Returns `true` if `handler` may be executed.
///
/// Handlers outside of any known module can't be verified and are trusted, table coverage is
/// allowed to be incomplete. Rejections are reported to the platform's detection hook.
pub fn is_valid_handler<P: Platform + ?Sized>(platform: &mut P, handler: usize) -> bool {
    let verdict = match platform.lookup_function_table(handler) {
        Some(image) => image.check(handler),
        None => Ok(()),
    };

    match verdict {
        Ok(()) => true,
        Err(rejection) => {
            log::warn!("rejecting handler {handler:#x}: {rejection:?}");
            platform.invalid_handler_detected(&InvalidHandler { handler, rejection });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::emulate::EmulatedPlatform;

    const BASE: usize = 0x40_0000;

    #[test]
    fn exact_match_required() {
        let table = [0x1000, 0x1040, 0x2000];
        let image = ImageFunctions {
            base: BASE,
            table: FunctionTable::Sorted(&table),
        };

        assert_eq!(image.check(BASE + 0x1040), Ok(()));
        assert_eq!(
            image.check(BASE + 0x1041),
            Err(Rejection::NotInTable {
                table: table.as_ptr().addr(),
                len: 3
            })
        );
        // below the module base
        assert!(image.check(BASE - 0x10).is_err());
        // too far above the base to be a module-relative entry
        #[cfg(target_pointer_width = "64")]
        assert!(image.check(BASE + 0x1_0000_1000).is_err());
    }

    #[test]
    fn empty_table_is_trusted() {
        let image = ImageFunctions {
            base: BASE,
            table: FunctionTable::Sorted(&[]),
        };
        assert_eq!(image.check(BASE + 0x1234), Ok(()));
    }

    #[test_log::test]
    fn no_handlers_image_is_detected() {
        let mut platform = EmulatedPlatform::new(4);
        platform.add_image(BASE, 0x1_0000, None);

        assert!(!is_valid_handler(&mut platform, BASE + 0x10));
        let detections: Vec<_> = platform.detections().iter().copied().collect();
        assert_eq!(
            detections,
            [InvalidHandler {
                handler: BASE + 0x10,
                rejection: Rejection::NoHandlersExpected,
            }]
        );
    }

    #[test]
    fn unknown_modules_are_trusted() {
        let mut platform = EmulatedPlatform::new(4);
        platform.add_image(BASE, 0x1_0000, Some(vec![0x100]));

        assert!(is_valid_handler(&mut platform, 0x1234_5678));
        assert!(platform.detections().is_empty());
    }

    #[test]
    fn validation_is_idempotent() {
        let mut platform = EmulatedPlatform::new(4);
        platform.add_image(BASE, 0x1_0000, Some(vec![0x100, 0x200]));

        for handler in [BASE + 0x100, BASE + 0x180] {
            let first = is_valid_handler(&mut platform, handler);
            let second = is_valid_handler(&mut platform, handler);
            assert_eq!(first, second);
        }
        assert_eq!(platform.detections().len(), 2);
    }

    fn sorted_table() -> impl Strategy<Value = Vec<u32>> {
        proptest::collection::btree_set(0u32..0x10_0000, 1..256)
            .prop_map(|entries| entries.into_iter().collect())
    }

    proptest! {
        #[test]
        fn binary_search_finds_every_entry(table in sorted_table(), pick in any::<prop::sample::Index>()) {
            let entry = table[pick.index(table.len())];
            let image = ImageFunctions { base: BASE, table: FunctionTable::Sorted(&table) };

            prop_assert_eq!(image.check(BASE + entry as usize), Ok(()));
        }

        #[test]
        fn binary_search_rejects_gaps(table in sorted_table(), pick in any::<prop::sample::Index>()) {
            prop_assume!(table.len() >= 2);
            let i = pick.index(table.len() - 1);
            let (lo, hi) = (table[i], table[i + 1]);
            prop_assume!(hi - lo > 1);

            let image = ImageFunctions { base: BASE, table: FunctionTable::Sorted(&table) };
            let probe = BASE + lo as usize + 1;
            prop_assert!(image.check(probe).is_err());
        }
    }
}
