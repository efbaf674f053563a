// SPDX-License-Identifier: Apache-2.0

pub mod position_store;
pub mod schema;

pub use position_store::PositionStore;
pub use schema::{FileOffset, PositionMap};
