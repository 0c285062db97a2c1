//! `forgeledger-core`: ledger foundation building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! identifiers, the fixed-point [`Money`] type and the entity/value markers.

pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod value_object;

pub use entity::{Entity, index_by_id};
pub use error::{CoreError, CoreResult};
pub use id::{AccountId, EntryId, LineId, TenantId, UserId};
pub use money::Money;
pub use value_object::ValueObject;
