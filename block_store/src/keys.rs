// Keys are formatted as strings so that numbers sort in chain order.
// Numbers are zero-padded to the width of `u64::MAX`.

use std::borrow::Cow;

use anyhow::{Error as AnyhowError, Result};
use database::PrefixableKey;
use derive_more::Display;
use types::primitives::{BlockNumber, H256};

use crate::error::Error;

#[derive(Display)]
#[display("{}{_0:020}{_1:x}", Self::PREFIX)]
pub struct HeaderByHash(pub BlockNumber, pub H256);

impl PrefixableKey for HeaderByHash {
    const PREFIX: &'static str = "h";
}

#[derive(Display)]
#[display("{}{_0:020}{_1:x}", Self::PREFIX)]
pub struct BodyByHash(pub BlockNumber, pub H256);

impl PrefixableKey for BodyByHash {
    const PREFIX: &'static str = "b";
}

#[derive(Display)]
#[display("{}{_0:020}{_1:x}", Self::PREFIX)]
pub struct ReceiptsByHash(pub BlockNumber, pub H256);

impl PrefixableKey for ReceiptsByHash {
    const PREFIX: &'static str = "r";
}

#[derive(Display)]
#[display("{}{_0:020}{_1:x}", Self::PREFIX)]
pub struct TotalDifficultyByHash(pub BlockNumber, pub H256);

impl PrefixableKey for TotalDifficultyByHash {
    const PREFIX: &'static str = "t";
}

#[derive(Display)]
#[display("{}{_0:020}{_1:x}", Self::PREFIX)]
pub struct UnpaidRewardsByHash(pub BlockNumber, pub H256);

impl PrefixableKey for UnpaidRewardsByHash {
    const PREFIX: &'static str = "u";
}

#[derive(Display)]
#[display("{}{_0:x}", Self::PREFIX)]
pub struct NumberByHash(pub H256);

impl PrefixableKey for NumberByHash {
    const PREFIX: &'static str = "n";
}

#[derive(Display)]
#[display("{}{_0:x}", Self::PREFIX)]
pub struct StateByRoot(pub H256);

impl PrefixableKey for StateByRoot {
    const PREFIX: &'static str = "s";
}

#[derive(Display)]
#[display("{}{_0:x}", Self::PREFIX)]
pub struct TransactionLookup(pub H256);

impl PrefixableKey for TransactionLookup {
    const PREFIX: &'static str = "l";
}

#[derive(PartialEq, Eq, Debug, Display)]
#[display("{}{_0:020}", Self::PREFIX)]
pub struct CanonicalHashByNumber(pub BlockNumber);

impl TryFrom<Cow<'_, [u8]>> for CanonicalHashByNumber {
    type Error = AnyhowError;

    fn try_from(bytes: Cow<[u8]>) -> Result<Self> {
        let payload =
            bytes
                .strip_prefix(Self::PREFIX.as_bytes())
                .ok_or_else(|| Error::IncorrectPrefix {
                    bytes: bytes.to_vec(),
                })?;

        let string = core::str::from_utf8(payload)?;
        let number = string.parse()?;

        Ok(Self(number))
    }
}

impl PrefixableKey for CanonicalHashByNumber {
    const PREFIX: &'static str = "c";
}

#[derive(Display)]
#[display("{}", Self::PREFIX)]
pub struct HeadBlockHash;

impl PrefixableKey for HeadBlockHash {
    const PREFIX: &'static str = "head";
}
