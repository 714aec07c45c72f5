use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// A parsed command that can run against the store and produce the reply for the client.
pub trait Executable {
    fn exec(self, store: Store) -> Result<Frame, Error>;
}
