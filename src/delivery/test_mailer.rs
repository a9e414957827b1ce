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

use log::info;

use super::{failure, Deliveries, DeliveryKind, DeliveryMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// A delivery method which sends nothing anywhere; delivered messages only
/// show up in the `Deliveries` ledger.
///
/// It still insists on the message having an envelope sender and at least
/// one destination, so tests catch messages that a real transport would
/// reject.
#[derive(Debug)]
pub struct TestMailer {
    settings: Settings,
    deliveries: Deliveries,
}

impl TestMailer {
    pub fn new(settings: &Settings, deliveries: Deliveries) -> Self {
        Self {
            settings: DeliveryKind::Test.default_settings().merged(settings),
            deliveries,
        }
    }
}

impl DeliveryMethod for TestMailer {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Test
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn deliver<'a>(&self, message: &'a Message) -> Result<&'a Message, Error> {
        if message.envelope_from().is_none() {
            return Err(failure(
                DeliveryKind::Test,
                &self.settings,
                "message has no sender address",
            ));
        }

        if message.destinations().is_empty() {
            return Err(failure(
                DeliveryKind::Test,
                &self.settings,
                "message has no destination addresses",
            ));
        }

        self.deliveries.record(message);
        info!(
            "{} Captured message for {} destination(s)",
            LogPrefix::new("delivery:test".to_owned())
                .with_message_id(message.message_id()),
            message.destinations().len(),
        );
        Ok(message)
    }
}
