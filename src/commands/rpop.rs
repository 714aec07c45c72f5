use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Removes and returns the last element of the list stored at `key`.
///
/// Ref: <https://redis.io/docs/latest/commands/rpop/>
#[derive(Debug, PartialEq)]
pub struct Rpop {
    pub key: Bytes,
}

impl Executable for Rpop {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let res = store.lock().pop_back(&self.key);

        match res {
            Ok(Some(value)) => Ok(Frame::Bulk(value)),
            Ok(None) => Ok(Frame::Null),
            Err(err) => Ok(Frame::Error(err.to_string())),
        }
    }
}

impl TryFrom<&mut CommandParser> for Rpop {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        Ok(Self { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[test]
    fn pops_tail() {
        let store = Store::new();
        store
            .lock()
            .push_back(Bytes::from("list"), vec![Bytes::from("a"), Bytes::from("b")])
            .unwrap();

        let frame = Frame::Array(vec![
            Frame::Bulk(Bytes::from("RPOP")),
            Frame::Bulk(Bytes::from("list")),
        ]);
        let cmd = Command::try_from(frame).unwrap();

        assert_eq!(cmd.exec(store.clone()).unwrap(), Frame::Bulk(Bytes::from("b")));
        assert_eq!(store.lock().list_len(b"list"), Ok(1));
    }

    #[test]
    fn missing_key() {
        let cmd = Rpop {
            key: Bytes::from("nope"),
        };

        assert_eq!(cmd.exec(Store::new()).unwrap(), Frame::Null);
    }
}
