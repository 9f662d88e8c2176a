pub mod converter;
pub mod events;
pub mod flight;
pub mod ports;
pub mod writer;

pub use converter::{BincodeConverter, Converter, JsonConverter};
pub use events::{CacheEvent, EventSink};
pub use flight::{Flights, compute_error};
pub use ports::{Cache, CacheValue, Connection, Dialer};
pub use shared::config::ConverterKind;
pub use writer::{Erased, write_to};
