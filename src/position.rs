// Copyright 2020 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! [`Position`] — the immutable value identifying one slot in the shared
//! order. A position is a pure identifier: it exists as soon as it is
//! referenced, and "deletion" only removes it from an `ItemList`'s presence
//! map (see `crate::list`), never from the tree.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reserved id of the root bunch. Not assignable by user code; `receive`
/// rejects any meta that names it.
pub const ROOT: &str = "ROOT";

/// `{ bunch_id, inner_index }`. Positions are cheap, `Clone`, value-typed
/// identifiers; a bunch owns an unbounded contiguous inner-index space
/// `[0, inf)` allocated in counting order by the minting replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub bunch_id: String,
    pub inner_index: u32,
}

impl Position {
    pub fn new(bunch_id: impl Into<String>, inner_index: u32) -> Self {
        Position {
            bunch_id: bunch_id.into(),
            inner_index,
        }
    }

    /// Only `MIN_POSITION` and `MAX_POSITION` may legally sit on the root
    /// bunch, at inner indices `0` and `1` respectively.
    pub fn is_root(&self) -> bool {
        self.bunch_id == ROOT
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.bunch_id, self.inner_index)
    }
}

/// Less than every other position.
pub static MIN_POSITION: Lazy<Position> = Lazy::new(|| Position::new(ROOT, 0));

/// Greater than every other position.
pub static MAX_POSITION: Lazy<Position> = Lazy::new(|| Position::new(ROOT, 1));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_and_max_are_distinct() {
        assert_ne!(*MIN_POSITION, *MAX_POSITION);
    }

    #[test]
    fn sentinels_live_on_root() {
        assert!(MIN_POSITION.is_root());
        assert!(MAX_POSITION.is_root());
        assert_eq!(MIN_POSITION.inner_index, 0);
        assert_eq!(MAX_POSITION.inner_index, 1);
    }
}
