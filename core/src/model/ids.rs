use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};

fn is_valid_id(s: &str) -> bool {
    if s.contains("..") {
        return false;
    }
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphanumeric() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = LakeError;

            fn try_from(value: String) -> Result<Self> {
                if !is_valid_id(&value) {
                    return Err(LakeError::InvalidId(value));
                }
                Ok(Self(value))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = LakeError;

            fn try_from(value: &str) -> Result<Self> {
                Self::try_from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(RepoId);
id_newtype!(ArtifactId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(RepoId::try_from("r2").is_ok());
        assert!(RepoId::try_from("rel-4.2.2").is_ok());
        assert!(RepoId::try_from("a_b.c-9").is_ok());
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(RepoId::try_from("").is_err());
        assert!(RepoId::try_from("-leading-dash").is_err());
        assert!(RepoId::try_from("has..dotdot").is_err());
        assert!(RepoId::try_from("has/slash").is_err());
        assert!(RepoId::try_from("has space").is_err());
    }
}
