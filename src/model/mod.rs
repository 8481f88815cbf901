//! # Property Graph Model
//!
//! Clean DTOs for the property graph that annotation corpora are stored in.
//! These types cross every boundary: storage ↔ execution ↔ loader ↔ user.
//!
//! Pure data: no I/O and no state.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::Value;
pub use property_map::{props, PropertyMap};
