pub mod clock;
pub mod send_log_store;
pub mod sender;

pub use clock::*;
pub use send_log_store::*;
pub use sender::*;
