use bytes::Bytes;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::{now_millis, Entry, Store};
use crate::Error;

/// Set `key` to hold the string `value`. If `key` already holds a value, it is overwritten,
/// and any previous time to live is discarded unless `KEEPTTL` is given.
///
/// Options:
///
/// * `EX seconds` / `PX milliseconds`: set the expiry, a non-positive amount means none.
/// * `KEEPTTL`: retain the time to live of the current value. Fails with `nil` if there is no
///   current value.
/// * `NX` / `XX`: only set the key if it does not / does already exist. When both appear the
///   last one wins.
/// * `GET`: reply with the value just written instead of `OK`.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub condition: Option<Condition>,
    pub expiry: Option<Expiry>,
    pub get: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Condition {
    /// Only set the key if it does not already exist.
    Nx,
    /// Only set the key if it already exists.
    Xx,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Expiry {
    Ex(i64),
    Px(i64),
    KeepTtl,
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        let now = now_millis();

        // The existence check and the write happen under the same lock, so NX and XX can't race
        // with a concurrent SET on the same key.
        let mut strings = store.strings_mut();

        let current = strings.get(&self.key).filter(|entry| !entry.is_expired(now));

        match self.condition {
            Some(Condition::Nx) if current.is_some() => return Ok(Frame::Null),
            Some(Condition::Xx) if current.is_none() => return Ok(Frame::Null),
            _ => {}
        }

        let expires_at = match self.expiry {
            Some(Expiry::KeepTtl) => match current {
                Some(entry) => entry.expires_at,
                None => return Ok(Frame::Null),
            },
            Some(Expiry::Ex(seconds)) if seconds > 0 => {
                Some(now.saturating_add(seconds.saturating_mul(1000)))
            }
            Some(Expiry::Px(millis)) if millis > 0 => Some(now.saturating_add(millis)),
            _ => None,
        };

        let res = if self.get {
            Frame::Bulk(self.value.clone())
        } else {
            Frame::Simple("OK".to_string())
        };

        strings.insert(self.key, Entry::with_expiry(self.value, expires_at));

        Ok(res)
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_string()?;
        let value = parser.next_bytes()?;

        let mut set = Self {
            key,
            value,
            condition: None,
            expiry: None,
            get: false,
        };

        while parser.remaining() > 0 {
            let option = parser.next_string()?.to_uppercase();

            match &option[..] {
                "NX" => set.condition = Some(Condition::Nx),
                "XX" => set.condition = Some(Condition::Xx),
                "GET" => set.get = true,
                "KEEPTTL" => {
                    if matches!(set.expiry, Some(Expiry::Ex(_) | Expiry::Px(_))) {
                        return Err(CommandParserError::Syntax);
                    }
                    set.expiry = Some(Expiry::KeepTtl);
                }
                "EX" | "PX" => {
                    if set.expiry == Some(Expiry::KeepTtl) {
                        return Err(CommandParserError::Syntax);
                    }

                    let amount = match parser.next_integer() {
                        Ok(amount) => amount,
                        Err(CommandParserError::EndOfStream) => {
                            return Err(CommandParserError::Syntax)
                        }
                        Err(e) => return Err(e),
                    };

                    set.expiry = Some(if option == "EX" {
                        Expiry::Ex(amount)
                    } else {
                        Expiry::Px(amount)
                    });
                }
                _ => return Err(CommandParserError::Syntax),
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::get::Get;
    use crate::commands::Command;
    use std::thread;
    use std::time::Duration;

    fn run(store: &Store, parts: &[&str]) -> Frame {
        let frame = Frame::Array(
            parts
                .iter()
                .map(|part| Frame::Bulk(Bytes::from(part.to_string())))
                .collect(),
        );

        match Command::try_from(frame) {
            Ok(cmd) => cmd.exec(store.clone()).unwrap(),
            Err(e) => e.reply(),
        }
    }

    fn get(store: &Store, key: &str) -> Frame {
        Get {
            key: key.to_string(),
        }
        .exec(store.clone())
        .unwrap()
    }

    fn ok() -> Frame {
        Frame::Simple("OK".to_string())
    }

    fn syntax_error() -> Frame {
        Frame::Error("ERR syntax error".to_string())
    }

    #[test]
    fn parse_options() {
        let frame = Frame::Array(
            ["set", "k", "v", "xx", "Get", "PX", "100"]
                .iter()
                .map(|part| Frame::Bulk(Bytes::from(*part)))
                .collect(),
        );

        assert_eq!(
            Command::try_from(frame).unwrap(),
            Command::Set(Set {
                key: "k".to_string(),
                value: Bytes::from("v"),
                condition: Some(Condition::Xx),
                expiry: Some(Expiry::Px(100)),
                get: true,
            })
        );
    }

    #[test]
    fn plain_set_overwrites() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v1"]), ok());
        assert_eq!(run(&store, &["SET", "k", "v2"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v2")));
    }

    #[test]
    fn set_ex_within_window() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "EX", "10"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v")));

        let expires_at = store.strings()["k"].expires_at.unwrap();
        let remaining = expires_at - now_millis();
        assert!(remaining > 9_000 && remaining <= 10_000);
    }

    #[test]
    fn set_px_expires() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "PX", "100"]), ok());
        assert_eq!(store.len(), 1);

        thread::sleep(Duration::from_millis(150));

        assert_eq!(get(&store, "k"), Frame::Null);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn non_positive_expiry_means_none() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "EX", "0"]), ok());
        assert_eq!(run(&store, &["SET", "j", "v", "PX", "-10"]), ok());

        assert_eq!(store.strings()["k"].expires_at, None);
        assert_eq!(store.strings()["j"].expires_at, None);
    }

    #[test]
    fn nx() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "NX"]), ok());
        assert_eq!(run(&store, &["SET", "k", "v2", "NX"]), Frame::Null);
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v")));
    }

    #[test]
    fn nx_on_expired_key() {
        let store = Store::new();
        store.strings_mut().insert(
            "k".to_string(),
            Entry::with_expiry(Bytes::from("old"), Some(now_millis() - 1)),
        );

        assert_eq!(run(&store, &["SET", "k", "new", "NX"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("new")));
    }

    #[test]
    fn xx() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "XX"]), Frame::Null);
        assert_eq!(get(&store, "k"), Frame::Null);
        assert!(store.is_empty());

        run(&store, &["SET", "k", "v"]);
        assert_eq!(run(&store, &["SET", "k", "v2", "XX"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v2")));
    }

    #[test]
    fn last_condition_wins() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "XX", "NX"]), ok());
        assert_eq!(run(&store, &["SET", "k", "v2", "NX", "XX"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v2")));
    }

    #[test]
    fn get_option_replies_with_written_value() {
        let store = Store::new();

        assert_eq!(
            run(&store, &["SET", "k", "v", "GET"]),
            Frame::Bulk(Bytes::from("v"))
        );
        assert_eq!(
            run(&store, &["SET", "k", "v2", "NX", "GET"]),
            Frame::Null
        );
    }

    #[test]
    fn keepttl_preserves_expiry() {
        let store = Store::new();

        run(&store, &["SET", "k", "v1", "EX", "10"]);
        let original = store.strings()["k"].expires_at;

        thread::sleep(Duration::from_millis(5));

        assert_eq!(run(&store, &["SET", "k", "v2", "KEEPTTL"]), ok());
        assert_eq!(get(&store, "k"), Frame::Bulk(Bytes::from("v2")));
        assert_eq!(store.strings()["k"].expires_at, original);
    }

    #[test]
    fn keepttl_on_missing_key() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "KEEPTTL"]), Frame::Null);
        assert!(store.is_empty());
    }

    #[test]
    fn plain_set_clears_expiry() {
        let store = Store::new();

        run(&store, &["SET", "k", "v1", "EX", "10"]);
        run(&store, &["SET", "k", "v2"]);

        assert_eq!(store.strings()["k"].expires_at, None);
    }

    #[test]
    fn keepttl_conflicts_with_ex_and_px() {
        let store = Store::new();

        assert_eq!(
            run(&store, &["SET", "k", "v", "KEEPTTL", "EX", "10"]),
            syntax_error()
        );
        assert_eq!(
            run(&store, &["SET", "k", "v", "PX", "10", "KEEPTTL"]),
            syntax_error()
        );
        assert!(store.is_empty());
    }

    #[test]
    fn invalid_options() {
        let store = Store::new();

        assert_eq!(run(&store, &["SET", "k", "v", "FOO"]), syntax_error());
        assert_eq!(run(&store, &["SET", "k", "v", "EX"]), syntax_error());
        assert_eq!(
            run(&store, &["SET", "k", "v", "EX", "ten"]),
            Frame::Error("ERR value is not an integer or out of range".to_string())
        );
        assert_eq!(
            run(&store, &["SET", "k"]),
            Frame::Error("ERR wrong number of arguments for 'set' command".to_string())
        );
        assert!(store.is_empty());
    }
}
