//! Model store for the L3 gateway control plane.
//!
//! The store exclusively owns persisted state. Device adapters only ever
//! hold a projection of it, rebuilt on restart by replaying what the store
//! returns from [`ModelStore::all_subnets`] and
//! [`ModelStore::all_routetables`].

mod memory;
mod model_store;
pub mod snapshot;

pub use memory::MemoryStore;
pub use model_store::{
    ModelStore, NewRoute, NewSubnet, RouteTableUpdate, RouteUpdate, SubnetUpdate,
};
