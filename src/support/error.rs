//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of Mailbag.
//
// Mailbag is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mailbag is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailbag. If not, see <http://www.gnu.org/licenses/>.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::delivery::DeliveryKind;
use crate::retrieval::RetrieverKind;

/// Which half of the configuration an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendFamily {
    Delivery,
    Retrieval,
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BackendFamily::Delivery => write!(f, "delivery"),
            BackendFamily::Retrieval => write!(f, "retrieval"),
        }
    }
}

/// The error type for every fallible operation in Mailbag.
///
/// `settings` fields always hold the *redacted* rendering of the backend
/// settings, so these values are safe to log or show to users.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown {family} backend kind {kind:?}")]
    UnknownBackendKind { family: BackendFamily, kind: String },
    #[error("Delivery via {kind} failed: {cause} (settings: {settings})")]
    DeliveryFailed {
        kind: DeliveryKind,
        settings: String,
        cause: String,
    },
    #[error("Retrieval via {kind} failed: {cause} (settings: {settings})")]
    RetrievalFailed {
        kind: RetrieverKind,
        settings: String,
        cause: String,
    },
    #[error("Malformed mbox envelope line: {0:?}")]
    MalformedEnvelope(String),
    #[error("No {0} backend configured")]
    NotConfigured(BackendFamily),
    #[error("Invalid value for setting {key:?}: {reason}")]
    InvalidSetting { key: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
