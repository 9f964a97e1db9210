// flagstream-api: Wire boundary for the flagstream push channel (auth handshake, event stream, tokens)

pub mod auth;
pub mod error;
pub mod stream;
pub mod token;
pub mod transport;

pub use auth::{AuthFetcher, AuthPayload, HttpAuthFetcher};
pub use error::Error;
pub use stream::{HttpStreamTransport, LineStream, StreamResponse, StreamTransport};
pub use token::{AuthToken, OCCUPANCY_PREFIX};
pub use transport::{TlsMode, TransportConfig};
