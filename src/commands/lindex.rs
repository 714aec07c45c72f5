use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns the element at `index` in the list stored at `key`. Negative indices start at the
/// tail. `nil` is returned when the key is missing or the index is out of range.
///
/// Ref: <https://redis.io/docs/latest/commands/lindex/>
#[derive(Debug, PartialEq)]
pub struct Lindex {
    pub key: Bytes,
    pub index: i64,
}

impl Executable for Lindex {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let res = store.lock().list_index(&self.key, self.index);

        match res {
            Ok(Some(value)) => Ok(Frame::Bulk(value)),
            Ok(None) => Ok(Frame::Null),
            Err(err) => Ok(Frame::Error(err.to_string())),
        }
    }
}

impl TryFrom<&mut CommandParser> for Lindex {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let index = parser.next_integer()?;

        Ok(Self { key, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    fn lindex(index: &str) -> Result<Command, CommandParserError> {
        Command::try_from(Frame::Array(vec![
            Frame::Bulk(Bytes::from("LINDEX")),
            Frame::Bulk(Bytes::from("list")),
            Frame::Bulk(Bytes::copy_from_slice(index.as_bytes())),
        ]))
    }

    #[test]
    fn parse_index() {
        assert_eq!(
            lindex("-1").unwrap(),
            Command::Lindex(Lindex {
                key: Bytes::from("list"),
                index: -1
            })
        );
    }

    #[test]
    fn parse_invalid_index() {
        let err = lindex("first").unwrap_err();

        assert_eq!(err, CommandParserError::NotAnInteger);
        assert!(!err.is_protocol_error());
    }

    #[test]
    fn element_at_index() {
        let store = Store::new();
        store
            .lock()
            .push_back(Bytes::from("list"), vec![Bytes::from("a"), Bytes::from("b")])
            .unwrap();

        let at = |index| lindex(index).unwrap().exec(store.clone()).unwrap();

        assert_eq!(at("0"), Frame::Bulk(Bytes::from("a")));
        assert_eq!(at("-1"), Frame::Bulk(Bytes::from("b")));
        assert_eq!(at("2"), Frame::Null);
    }
}
