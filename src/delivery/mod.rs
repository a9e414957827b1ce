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

//! Delivery methods: the ways a `Message` can be sent.
//!
//! Every method implements `DeliveryMethod`. Which one is used is selected by
//! a `DeliveryKind`, which doubles as the registry mapping configuration
//! names to constructors.

use std::fmt;
use std::str::FromStr;

use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::error::{BackendFamily, Error};

pub mod file;
pub mod ledger;
pub mod sendmail;
pub mod smtp;
pub mod test_mailer;

pub use self::ledger::Deliveries;

/// A way of delivering messages.
///
/// Implementations record each message they successfully deliver in the
/// `Deliveries` ledger they were constructed with.
pub trait DeliveryMethod: Send + Sync + fmt::Debug {
    fn kind(&self) -> DeliveryKind;

    /// The effective settings, i.e., after merging over the defaults.
    fn settings(&self) -> &Settings;

    /// Transmits `message`, returning it unchanged on success.
    fn deliver<'a>(&self, message: &'a Message) -> Result<&'a Message, Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    Smtp,
    Sendmail,
    File,
    Test,
}

static KINDS: &[(&str, DeliveryKind)] = &[
    ("smtp", DeliveryKind::Smtp),
    ("sendmail", DeliveryKind::Sendmail),
    ("file", DeliveryKind::File),
    ("test", DeliveryKind::Test),
];

impl DeliveryKind {
    pub fn name(self) -> &'static str {
        KINDS
            .iter()
            .find(|&&(_, kind)| kind == self)
            .map(|&(name, _)| name)
            .unwrap_or("unknown")
    }

    /// The settings this kind of method uses for anything the caller does not
    /// specify.
    pub fn default_settings(self) -> Settings {
        match self {
            DeliveryKind::Smtp => settings! {
                "address" => "localhost",
                "port" => 25,
                "domain" => "localhost.localdomain",
                "user_name" => None::<String>,
                "password" => None::<String>,
                "authentication" => None::<String>,
                "enable_starttls_auto" => true,
            },
            DeliveryKind::Sendmail => settings! {
                "location" => "/usr/sbin/sendmail",
                "arguments" => "-i -t",
                "timeout" => None::<i64>,
            },
            DeliveryKind::File => settings! {
                "location" => "mails",
            },
            DeliveryKind::Test => Settings::new(),
        }
    }

    /// Constructs a method of this kind.
    ///
    /// `settings` is merged over `default_settings()`.
    pub fn instantiate(
        self,
        settings: &Settings,
        deliveries: &Deliveries,
    ) -> Result<Box<dyn DeliveryMethod>, Error> {
        let deliveries = deliveries.clone();
        Ok(match self {
            DeliveryKind::Smtp => {
                Box::new(smtp::Smtp::new(settings, deliveries)?)
            },
            DeliveryKind::Sendmail => {
                Box::new(sendmail::Sendmail::new(settings, deliveries)?)
            },
            DeliveryKind::File => {
                Box::new(file::FileDelivery::new(settings, deliveries)?)
            },
            DeliveryKind::Test => {
                Box::new(test_mailer::TestMailer::new(settings, deliveries))
            },
        })
    }
}

impl FromStr for DeliveryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        KINDS
            .iter()
            .find(|&&(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, kind)| kind)
            .ok_or_else(|| Error::UnknownBackendKind {
                family: BackendFamily::Delivery,
                kind: s.to_owned(),
            })
    }
}

impl fmt::Display for DeliveryKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Builds a `DeliveryFailed` error which only carries redacted settings.
pub(crate) fn failure(
    kind: DeliveryKind,
    settings: &Settings,
    cause: impl fmt::Display,
) -> Error {
    Error::DeliveryFailed {
        kind,
        settings: settings.redacted().to_string(),
        cause: cause.to_string(),
    }
}
