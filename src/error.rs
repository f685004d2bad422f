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

//! Error kinds surfaced by this crate.
//!
//! Every fallible operation returns one of these; nothing here is retried
//! or logged internally. `receive` and `create_position` never partially
//! mutate state before returning an error.

use thiserror::Error;

use crate::position::Position;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PositionError {
    #[error("invalid position: {reason} ({position:?})")]
    InvalidPosition { position: Position, reason: String },

    #[error("unknown bunch: {bunch_id}")]
    UnknownBunch { bunch_id: String },

    #[error("unknown parent {parent_id} referenced by bunch {bunch_id}")]
    UnknownParent { bunch_id: String, parent_id: String },

    #[error("conflicting bunch meta for {bunch_id}: existing ({parent_id}, {offset}) differs")]
    Conflict {
        bunch_id: String,
        parent_id: String,
        offset: u32,
    },

    #[error("cycle detected among received bunch metas, starting at {bunch_id}")]
    Cycle { bunch_id: String },

    #[error("meta attempted to redefine the root bunch")]
    InvalidRoot,

    #[error("invalid bunch id {bunch_id:?}: {reason}")]
    InvalidId { bunch_id: String, reason: String },

    #[error("new_node_id() returned an id that already exists: {bunch_id}")]
    IdCollision { bunch_id: String },

    #[error("create_position called with prev >= next, or count < 1")]
    Inversion,

    #[error("index {index} out of bounds (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },

    #[error("iteration observed a concurrent mutation")]
    ConcurrentModification,

    #[error("serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, PositionError>;
