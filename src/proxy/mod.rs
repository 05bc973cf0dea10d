pub mod connection;
pub mod forwarder;
pub mod listener;
pub mod registry;
pub mod socket;
pub mod upstream;

pub use connection::{Connection, ForwarderState, Link, State};
pub use forwarder::Direction;
pub use listener::SniListener;
pub use registry::ConnectionRegistry;
pub use socket::SocketOptions;
pub use upstream::{ProxyTarget, UpstreamDialer};
