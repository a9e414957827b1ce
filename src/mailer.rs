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

use std::path::Path;
use std::sync::{
    Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use log::debug;

use crate::config::{settings::Settings, Configuration};
use crate::delivery::{Deliveries, DeliveryMethod};
use crate::message::Message;
use crate::retrieval::RetrieverMethod;
use crate::support::error::Error;

/// A configuration plus the ledger of everything delivered through it.
///
/// Backends are instantiated afresh for each operation, and no lock is held
/// while one is doing I/O, so concurrent deliveries don't serialise on the
/// `Mailer`.
#[derive(Debug, Default)]
pub struct Mailer {
    config: RwLock<Configuration>,
    // Serialises `defaults` calls without holding `config` while the
    // caller's closure runs
    update: Mutex<()>,
    deliveries: Deliveries,
}

impl Mailer {
    pub fn new(config: Configuration) -> Self {
        Mailer {
            config: RwLock::new(config),
            update: Mutex::new(()),
            deliveries: Deliveries::new(),
        }
    }

    /// Changes the configuration through `f`.
    ///
    /// `f` works on a copy which replaces the configuration only if `f`
    /// succeeds, so a failed declaration has no effect at all. No lock on the
    /// configuration is held while `f` runs, so `f` may read the current
    /// configuration, but must not call `defaults` itself.
    pub fn defaults(
        &self,
        f: impl FnOnce(&mut Configuration) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let _update =
            self.update.lock().unwrap_or_else(PoisonError::into_inner);
        let mut updated = self.configuration();
        f(&mut updated)?;
        *self.write_config() = updated;
        Ok(())
    }

    /// Returns a copy of the current configuration.
    pub fn configuration(&self) -> Configuration {
        self.read_config().clone()
    }

    /// Instantiates the configured delivery method.
    pub fn delivery_method(&self) -> Result<Box<dyn DeliveryMethod>, Error> {
        self.read_config().delivery_backend(&self.deliveries)
    }

    /// Instantiates the configured retriever method.
    pub fn retriever_method(&self) -> Result<Box<dyn RetrieverMethod>, Error> {
        self.read_config().retriever_backend()
    }

    /// Delivers `message` through its own delivery method if it has one,
    /// otherwise through the configured one.
    ///
    /// `Message-ID` and `Date` are added first if missing. The message is
    /// returned as sent.
    pub fn deliver(&self, mut message: Message) -> Result<Message, Error> {
        let method = match message.delivery_override() {
            Some((kind, settings)) => {
                kind.instantiate(settings, &self.deliveries)?
            },
            None => self.delivery_method()?,
        };

        message.ready_to_send(None);
        debug!(
            "Delivering {} via {}",
            message.message_id().unwrap_or("(no id)"),
            method.kind()
        );
        method.deliver(&message)?;
        Ok(message)
    }

    pub fn find(&self, criteria: &Settings) -> Result<Vec<Message>, Error> {
        self.retriever_method()?.find(criteria)
    }

    pub fn first(&self, criteria: &Settings) -> Result<Option<Message>, Error> {
        self.retriever_method()?.first(criteria)
    }

    pub fn last(&self, criteria: &Settings) -> Result<Option<Message>, Error> {
        self.retriever_method()?.last(criteria)
    }

    pub fn all(&self, criteria: &Settings) -> Result<Vec<Message>, Error> {
        self.retriever_method()?.all(criteria)
    }

    /// Reads a message from a file.
    pub fn read(&self, path: impl AsRef<Path>) -> Result<Message, Error> {
        Message::read(path)
    }

    /// The ledger of successful deliveries.
    pub fn deliveries(&self) -> &Deliveries {
        &self.deliveries
    }

    /// Restores the built-in configuration and empties the ledger.
    pub fn reset(&self) {
        *self.write_config() = Configuration::new();
        self.deliveries.clear();
    }

    // The configuration is only ever replaced wholesale, so a panic while a
    // guard was held cannot have left it half-updated.
    fn read_config(&self) -> RwLockReadGuard<'_, Configuration> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_config(&self) -> RwLockWriteGuard<'_, Configuration> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }
}
