//! Arena indices.
//!
//! Every id is the position of its item in the collection that owns it:
//! `OperatorId(3)` is the fourth operator of its `Plan`, `StageId(1)` the
//! second stage of an execution plan. Ids from different owners must not be
//! mixed; nothing checks that at run time.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            pub const fn from_index(index: usize) -> Self {
                Self(index as u64)
            }

            /// Id the next item pushed onto `items` will get.
            pub fn next_in<T>(items: &[T]) -> Self {
                Self::from_index(items.len())
            }

            pub const fn get(self) -> u64 {
                self.0
            }

            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Logical operator within a `Plan`.
    OperatorId,
    "op"
);
arena_id!(
    /// Loop region within a `Plan`.
    LoopId,
    "loop"
);
arena_id!(StageId, "stage");
arena_id!(TaskId, "task");
arena_id!(ChannelId, "channel");
