//! Entity handles and reference identity.

mod handle;

pub use handle::{ClientEntity, EntityRef, ObjectKey};
