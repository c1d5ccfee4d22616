//! Clone orchestration: field resolution, uniqueness repair, identity
//! mapping, relinking, commit and the traversal that drives them.

pub mod commit;
pub mod fields;
pub mod identity;
pub mod relink;
pub mod traversal;
pub mod unique;

pub use commit::{CommitBoundary, CommitMode};
pub use fields::{apply_lookups, resolve, Resolved};
pub use identity::IdentityMap;
pub use relink::relink;
pub use traversal::{Cloner, PrepareHook};
pub use unique::repair;
