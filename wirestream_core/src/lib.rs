pub mod codec;
pub mod connection;
pub mod error;
pub mod io_error;
pub mod packet;
pub mod stream;
pub mod utils;

pub use connection::Connection;
pub use io_error::IoError;
pub use packet::Packet;
pub use stream::{Stream, StreamConfig};
