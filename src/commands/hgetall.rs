use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Returns every field of the hash stored at `key` followed by its value. The order of the
/// pairs is unspecified.
#[derive(Debug, PartialEq)]
pub struct HGetAll {
    pub key: String,
}

impl Executable for HGetAll {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let hashes = store.hashes();

        let Some(hash) = hashes.get(&self.key) else {
            return Ok(Frame::Null);
        };

        let frames = hash
            .iter()
            .flat_map(|(field, value)| {
                [
                    Frame::Bulk(field.clone().into()),
                    Frame::Bulk(value.clone()),
                ]
            })
            .collect();

        Ok(Frame::Array(frames))
    }
}

impl TryFrom<&mut CommandParser> for HGetAll {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        parser.finish()?;

        Ok(Self { key })
    }
}
