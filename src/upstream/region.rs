//! LibreLinkUp API regions.
//!
//! Accounts live in one regional cluster. Logging in anywhere else answers with
//! a redirect naming the right region, see [`super::librelinkup`].

use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Global,
    Us,
    Eu,
    Eu2,
    De,
    Fr,
    Jp,
    Ap,
    Au,
    Ae,
    Ca,
    La,
    Ru,
}

#[derive(Debug, Error)]
#[error("unknown LibreLinkUp region '{0}'")]
pub struct UnknownRegion(pub String);

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Global => "https://api.libreview.io",
            Region::Us     => "https://api-us.libreview.io",
            Region::Eu     => "https://api-eu.libreview.io",
            Region::Eu2    => "https://api-eu2.libreview.io",
            Region::De     => "https://api-de.libreview.io",
            Region::Fr     => "https://api-fr.libreview.io",
            Region::Jp     => "https://api-jp.libreview.io",
            Region::Ap     => "https://api-ap.libreview.io",
            Region::Au     => "https://api-au.libreview.io",
            Region::Ae     => "https://api-ae.libreview.io",
            Region::Ca     => "https://api-ca.libreview.io",
            Region::La     => "https://api-la.libreview.io",
            Region::Ru     => "https://api.libreview.ru",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Global => "GLOBAL",
            Region::Us     => "US",
            Region::Eu     => "EU",
            Region::Eu2    => "EU2",
            Region::De     => "DE",
            Region::Fr     => "FR",
            Region::Jp     => "JP",
            Region::Ap     => "AP",
            Region::Au     => "AU",
            Region::Ae     => "AE",
            Region::Ca     => "CA",
            Region::La     => "LA",
            Region::Ru     => "RU",
        }
    }
}

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let region = match raw.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Region::Global,
            "US"     => Region::Us,
            "EU"     => Region::Eu,
            "EU2"    => Region::Eu2,
            "DE"     => Region::De,
            "FR"     => Region::Fr,
            "JP"     => Region::Jp,
            "AP"     => Region::Ap,
            "AU"     => Region::Au,
            "AE"     => Region::Ae,
            "CA"     => Region::Ca,
            "LA"     => Region::La,
            "RU"     => Region::Ru,
            _ => return Err(UnknownRegion(raw.to_string())),
        };
        Ok(region)
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
