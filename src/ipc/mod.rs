//! Length-prefixed JSON request/response protocol over a UNIX stream
//! socket.

pub mod connection;
pub mod methods;
pub mod server;

pub use connection::IpcConnection;
pub use methods::HandlerTable;
pub use server::IpcServer;
