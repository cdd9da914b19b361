//! Base58 addresses and hashes used on the wire and in the store

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const USER_PREFIXES: [&str; 3] = ["tz1", "tz2", "tz3"];
const CONTRACT_PREFIX: &str = "KT1";

/// Checks the base58 alphabet, length and allowed prefixes of a hash string
fn check_base58(value: &str, what: &'static str, len: usize, prefixes: &[&str]) -> Result<(), ValidationError> {
    if value.len() != len
        || !prefixes.iter().any(|p| value.starts_with(p))
        || bs58::decode(value).into_vec().is_err()
    {
        return Err(ValidationError::BadHash {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Account address - user (tz1/tz2/tz3) or originated contract (KT1)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let mut prefixes = USER_PREFIXES.to_vec();
        prefixes.push(CONTRACT_PREFIX);
        check_base58(&value, "address", 36, &prefixes)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_contract(&self) -> bool {
        self.0.starts_with(CONTRACT_PREFIX)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! hash_newtype {
    ($name:ident, $what:literal, $len:literal, [$($prefix:literal),+], $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                let value = value.into();
                check_base58(&value, $what, $len, &[$($prefix),+])?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

hash_newtype!(BlockHash, "block hash", 51, ["B"], "Block hash - 51 chars, `B` prefix");
hash_newtype!(OpHash, "operation hash", 54, ["o"], "Operation hash - 54 chars, `o` prefix");
hash_newtype!(ProtocolHash, "protocol hash", 51, ["P"], "Protocol hash - 51 chars, `P` prefix");
hash_newtype!(ProposalHash, "proposal hash", 51, ["P"], "Proposal hash - 51 chars, `P` prefix");

#[cfg(test)]
mod tests {
    use super::*;

    const TZ1: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const KT1: &str = "KT1BEqzn5Wx8uJrZNvuS9DVHmLvG9td3fDLi";

    #[test]
    fn accepts_user_and_contract_addresses() {
        assert!(!Address::new(TZ1).unwrap().is_contract());
        assert!(Address::new(KT1).unwrap().is_contract());
    }

    #[test]
    fn rejects_wrong_prefix_and_length() {
        assert!(Address::new("xy1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx").is_err());
        assert!(Address::new("tz1short").is_err());
        // 0, O, I and l are outside the base58 alphabet
        assert!(Address::new("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxO0Il").is_err());
    }

    #[test]
    fn block_hash_is_51_chars() {
        let good = "BLzGD63HA4RP8Fh5xEtvdQSMKa2WzJMZjQPNVUW4nimjFDL45gN";
        assert_eq!(good.len(), 51);
        assert!(BlockHash::new(good).is_ok());
        assert!(BlockHash::new(&good[..50]).is_err());
        assert!(OpHash::new(good).is_err());
    }

    #[test]
    fn op_hash_is_54_chars() {
        let good = "ooPMQcQYa6HykEGJRVJPrG7iG5nnWBoobGsGYYUvMeGv8UhGPRT233";
        assert_eq!(good.len(), 54);
        assert!(OpHash::new(good).is_ok());
    }
}
