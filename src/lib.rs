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

//! Core addressing scheme for collaborative ordered-list CRDTs.
//!
//! A [`BunchTree`](order::BunchTree) assigns every replica globally unique,
//! totally ordered [`Position`](position::Position)s. [`LexPosition`]s are a
//! byte-lexicographically ordered string encoding of the same positions, and
//! [`ItemList`](list::ItemList) layers a presence map with O(depth)
//! index-to-position translation on top of an `Order`. [`PositionSource`] is
//! a standalone generator for callers that do not want to keep a tree at all.

#![deny(unused_must_use)]

pub mod error;
pub mod lex;
pub mod list;
pub mod order;
pub mod position;
pub mod position_source;

pub use error::{PositionError, Result};
pub use lex::{LexUtils, MAX_LEX_POSITION, MIN_LEX_POSITION};
pub use list::{ItemList, Outline};
pub use order::{BunchMeta, BunchTree};
pub use position::{Position, MAX_POSITION, MIN_POSITION, ROOT};
pub use position_source::PositionSource;
