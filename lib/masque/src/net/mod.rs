pub mod framed;
pub mod listener;

pub use framed::{Connection, Framed, NetError, NetResult, SendHandle, EOT};
pub use listener::{Acceptor, RebindHandle};
