//! Store and publisher implementations
pub mod memory;
pub mod nats;
pub mod postgres;

pub use memory::{EventLog, InMemoryCouponStore, InMemoryOrderStore, StaticSessionProvider, StaticShippingTable};
pub use nats::NatsPublisher;
pub use postgres::{PgCouponStore, PgOrderStore, PgShippingTable};
