//! Sharding functions and their persisted descriptor format.
//!
//! A shard maps a key (without its leading slash) to a short label used as
//! the key's parent directory. Its canonical string form,
//! `/repo/flatfs/shard/v1/<name>/<param>`, is what gets persisted next to the
//! data so a store can be reopened without restating its layout.

use std::fmt;
use std::iter;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dsx_store::{StoreError, StoreResult};

/// Path prefix of every shard descriptor.
pub const PREFIX: &str = "/repo/flatfs/shard/";

/// The only descriptor version understood.
pub const VERSION: &str = "v1";

/// Text stored in the `_README` sentinel when a sharded store is created.
pub const README: &str = "\
This is a repository of key-value data, sharded into directories
based on a function of each key. The sharding function in use is
recorded in the SHARDING file at the root of this store.

Do not edit or remove the SHARDING file: without it the store cannot
locate its data. The sharding functions are:

  prefix/<n>        the first n characters of the key, right-padded with '_'
  suffix/<n>        the last n characters of the key, left-padded with '_'
  next-to-last/<n>  the n characters before the last one, left-padded with '_'
";

const PAD: char = '_';

/// A deterministic key-to-label function.
///
/// The parameter is the label length in characters and should be at least 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Shard {
    /// The first `n` characters.
    Prefix(usize),
    /// The last `n` characters.
    Suffix(usize),
    /// The `n` characters immediately before the last one.
    NextToLast(usize),
}

impl Shard {
    /// The descriptor name of this function.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prefix(_) => "prefix",
            Self::Suffix(_) => "suffix",
            Self::NextToLast(_) => "next-to-last",
        }
    }

    pub fn param(&self) -> usize {
        match *self {
            Self::Prefix(n) | Self::Suffix(n) | Self::NextToLast(n) => n,
        }
    }

    /// Compute the shard label for a key string without its leading slash.
    ///
    /// ```
    /// use dsx_adapters::Shard;
    ///
    /// assert_eq!(Shard::Prefix(3).fun("ab"), "ab_");
    /// assert_eq!(Shard::Suffix(3).fun("ab"), "_ab");
    /// assert_eq!(Shard::NextToLast(2).fun("hello"), "ll");
    /// ```
    pub fn fun(&self, noslash: &str) -> String {
        match *self {
            Self::Prefix(n) => noslash.chars().chain(iter::repeat(PAD)).take(n).collect(),
            Self::Suffix(n) => {
                let padded = left_padded(noslash, n);
                padded[padded.len() - n..].iter().collect()
            }
            Self::NextToLast(n) => {
                let padded = left_padded(noslash, n + 1);
                let end = padded.len() - 1;
                padded[end - n..end].iter().collect()
            }
        }
    }

    /// Parse a shard descriptor.
    pub fn parse(input: &str) -> StoreResult<Self> {
        let fail = |reason: String| StoreError::Parse {
            input: input.to_string(),
            reason,
        };

        let s = input.trim();
        if s.is_empty() {
            return Err(fail("empty shard string".into()));
        }
        let Some(rest) = s.strip_prefix(PREFIX) else {
            return Err(fail("invalid or no path prefix".into()));
        };

        let mut parts = rest.split('/');
        let version = parts.next().unwrap_or_default();
        if version != VERSION {
            return Err(fail(format!("expected '{VERSION}' version, got '{version}'")));
        }
        let name = parts.next().unwrap_or_default();
        let param = match parts.next() {
            Some(p) if !p.is_empty() => p,
            _ => return Err(fail("missing param".into())),
        };
        let n: usize = param
            .parse()
            .map_err(|_| fail(format!("invalid param '{param}'")))?;
        if n == 0 {
            return Err(fail("param must be at least 1".into()));
        }

        match name {
            "prefix" => Ok(Self::Prefix(n)),
            "suffix" => Ok(Self::Suffix(n)),
            "next-to-last" => Ok(Self::NextToLast(n)),
            other => Err(fail(format!("unknown sharding function: {other}"))),
        }
    }
}

/// `s` as characters, left-padded to at least `min` of them.
fn left_padded(s: &str, min: usize) -> Vec<char> {
    let len = s.chars().count();
    iter::repeat(PAD)
        .take(min.saturating_sub(len))
        .chain(s.chars())
        .collect()
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{VERSION}/{}/{}", self.name(), self.param())
    }
}

impl FromStr for Shard {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Shard {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Shard> for String {
    fn from(shard: Shard) -> Self {
        shard.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsx_store::ErrorKind;
    use proptest::prelude::*;

    #[test]
    fn prefix_pads_right() {
        assert_eq!(Shard::Prefix(3).fun("ab"), "ab_");
        assert_eq!(Shard::Prefix(3).fun("abcdef"), "abc");
        assert_eq!(Shard::Prefix(2).fun(""), "__");
    }

    #[test]
    fn suffix_pads_left() {
        assert_eq!(Shard::Suffix(3).fun("ab"), "_ab");
        assert_eq!(Shard::Suffix(3).fun("abcdef"), "def");
    }

    #[test]
    fn next_to_last_skips_final_char() {
        assert_eq!(Shard::NextToLast(2).fun("hello"), "ll");
        assert_eq!(Shard::NextToLast(2).fun("ab"), "_a");
        assert_eq!(Shard::NextToLast(2).fun("a"), "__");
        assert_eq!(Shard::NextToLast(3).fun("CIQABCD"), "ABC");
    }

    #[test]
    fn counts_characters_not_bytes() {
        assert_eq!(Shard::Prefix(2).fun("ééé"), "éé");
        assert_eq!(Shard::Suffix(2).fun("aé"), "aé");
    }

    #[test]
    fn descriptor_format() {
        assert_eq!(Shard::Prefix(2).to_string(), "/repo/flatfs/shard/v1/prefix/2");
        assert_eq!(Shard::Suffix(5).to_string(), "/repo/flatfs/shard/v1/suffix/5");
        assert_eq!(
            Shard::NextToLast(2).to_string(),
            "/repo/flatfs/shard/v1/next-to-last/2"
        );
    }

    #[test]
    fn parse_accepts_trailing_newline() {
        let shard = Shard::parse("/repo/flatfs/shard/v1/next-to-last/2\n").unwrap();
        assert_eq!(shard, Shard::NextToLast(2));
    }

    #[test]
    fn parse_rejects_malformed_input() {
        let bad = [
            "",
            "   ",
            "/wrong/prefix/v1/prefix/2",
            "/repo/flatfs/shard/v2/prefix/2",
            "/repo/flatfs/shard/v1/prefix",
            "/repo/flatfs/shard/v1/prefix/",
            "/repo/flatfs/shard/v1/prefix/two",
            "/repo/flatfs/shard/v1/prefix/0",
            "/repo/flatfs/shard/v1/middle/2",
        ];
        for input in bad {
            let err = Shard::parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "input {input:?}");
        }
    }

    #[test]
    fn serde_uses_descriptor() {
        let json = serde_json::to_string(&Shard::Suffix(4)).unwrap();
        assert_eq!(json, "\"/repo/flatfs/shard/v1/suffix/4\"");
        let back: Shard = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Shard::Suffix(4));
        assert!(serde_json::from_str::<Shard>("\"/repo/flatfs/shard/v1/nope/1\"").is_err());
    }

    fn any_shard() -> impl Strategy<Value = Shard> {
        (1usize..8).prop_flat_map(|n| {
            prop_oneof![
                Just(Shard::Prefix(n)),
                Just(Shard::Suffix(n)),
                Just(Shard::NextToLast(n)),
            ]
        })
    }

    proptest! {
        #[test]
        fn label_has_param_length(shard in any_shard(), key in "[a-zA-Z0-9]{0,20}") {
            prop_assert_eq!(shard.fun(&key).chars().count(), shard.param());
        }

        #[test]
        fn descriptor_roundtrips(shard in any_shard()) {
            prop_assert_eq!(Shard::parse(&shard.to_string()).unwrap(), shard);
        }
    }
}
