// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Password hashing scheme advertised during authentication. `Cleartext`
/// sends the password unhashed and is only meaningful together with
/// `cleartext = true`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashScheme {
    #[serde(rename = "SHA256", alias = "sha256")]
    #[default]
    Sha256,
    #[serde(rename = "SHA1", alias = "sha1")]
    Sha1,
    #[serde(rename = "Cleartext", alias = "cleartext", alias = "none")]
    Cleartext,
}
impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashScheme::Sha256 => "SHA256",
            HashScheme::Sha1 => "SHA1",
            HashScheme::Cleartext => "Cleartext",
        })
    }
}

/// Boolean enumeration with string serialization support, kept for
/// configuration keys that favor a Yes/No spelling over a bare bool.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    #[serde(
        rename = "Yes",
        alias = "yes",
        alias = "YES",
        alias = "true",
        alias = "True",
        alias = "1"
    )]
    Yes,
    #[serde(
        rename = "No",
        alias = "no",
        alias = "NO",
        alias = "false",
        alias = "False",
        alias = "0"
    )]
    No,
}
impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        })
    }
}
impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}
impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}
