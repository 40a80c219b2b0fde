//! Domain model: aggregates, value objects, events and store contracts
pub mod aggregates;
pub mod events;
pub mod repository;
pub mod shipping;
pub mod value_objects;
