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

//! Which delivery and retriever methods are in effect, and with what settings.

use std::fs;
use std::path::Path;

use log::info;

use super::settings::Settings;
use crate::delivery::{Deliveries, DeliveryKind, DeliveryMethod};
use crate::retrieval::{RetrieverKind, RetrieverMethod, TestMailbox};
use crate::support::error::{BackendFamily, Error};
use crate::support::system_config::{MethodConfig, SystemConfig};

/// A backend choice: its kind plus the caller's settings, which are merged
/// over the kind's defaults when the backend is instantiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection<K> {
    pub kind: K,
    pub settings: Settings,
}

/// The delivery and retrieval defaults.
///
/// A fresh configuration delivers over SMTP to `localhost:25` and retrieves
/// over POP3 from `localhost:995`. Declaring a method replaces the previous
/// selection for that family outright; settings from an earlier declaration
/// never leak into a later one.
///
/// Clones share the same `TestMailbox`.
#[derive(Clone, Debug)]
pub struct Configuration {
    delivery: Option<Selection<DeliveryKind>>,
    retrieval: Option<Selection<RetrieverKind>>,
    test_mailbox: TestMailbox,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Configuration {
            delivery: Some(Selection {
                kind: DeliveryKind::Smtp,
                settings: Settings::new(),
            }),
            retrieval: Some(Selection {
                kind: RetrieverKind::Pop3,
                settings: Settings::new(),
            }),
            test_mailbox: TestMailbox::new(),
        }
    }

    /// Selects the delivery method named `kind`.
    ///
    /// An unknown kind is rejected here, leaving the configuration unchanged.
    pub fn delivery_method(
        &mut self,
        kind: &str,
        settings: Settings,
    ) -> Result<&mut Self, Error> {
        let kind = kind.parse::<DeliveryKind>()?;
        self.delivery = Some(Selection { kind, settings });
        Ok(self)
    }

    /// Selects the retriever method named `kind`.
    pub fn retriever_method(
        &mut self,
        kind: &str,
        settings: Settings,
    ) -> Result<&mut Self, Error> {
        let kind = kind.parse::<RetrieverKind>()?;
        self.retrieval = Some(Selection { kind, settings });
        Ok(self)
    }

    pub fn clear_delivery_method(&mut self) -> &mut Self {
        self.delivery = None;
        self
    }

    pub fn clear_retriever_method(&mut self) -> &mut Self {
        self.retrieval = None;
        self
    }

    pub fn delivery(&self) -> Option<&Selection<DeliveryKind>> {
        self.delivery.as_ref()
    }

    pub fn retrieval(&self) -> Option<&Selection<RetrieverKind>> {
        self.retrieval.as_ref()
    }

    /// The settings the configured delivery method would run with.
    pub fn effective_delivery_settings(&self) -> Option<Settings> {
        self.delivery
            .as_ref()
            .map(|s| s.kind.default_settings().merged(&s.settings))
    }

    /// The settings the configured retriever method would run with.
    pub fn effective_retrieval_settings(&self) -> Option<Settings> {
        self.retrieval
            .as_ref()
            .map(|s| s.kind.default_settings().merged(&s.settings))
    }

    /// The mailbox the test retriever reads from.
    pub fn test_mailbox(&self) -> &TestMailbox {
        &self.test_mailbox
    }

    /// Instantiates the configured delivery method, recording into
    /// `deliveries`.
    pub fn delivery_backend(
        &self,
        deliveries: &Deliveries,
    ) -> Result<Box<dyn DeliveryMethod>, Error> {
        let selection = self
            .delivery
            .as_ref()
            .ok_or(Error::NotConfigured(BackendFamily::Delivery))?;
        selection.kind.instantiate(&selection.settings, deliveries)
    }

    /// Instantiates the configured retriever method.
    pub fn retriever_backend(&self) -> Result<Box<dyn RetrieverMethod>, Error> {
        let selection = self
            .retrieval
            .as_ref()
            .ok_or(Error::NotConfigured(BackendFamily::Retrieval))?;
        selection
            .kind
            .instantiate(&selection.settings, &self.test_mailbox)
    }

    /// Applies the sections present in `config` over the built-in defaults.
    pub fn from_system_config(config: SystemConfig) -> Result<Self, Error> {
        let mut this = Self::new();
        if let Some(MethodConfig { method, settings }) = config.delivery {
            this.delivery_method(&method, settings)?;
        }
        if let Some(MethodConfig { method, settings }) = config.retrieval {
            this.retriever_method(&method, settings)?;
        }
        Ok(this)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Self::from_system_config(toml::from_str(s)?)
    }

    /// Loads the configuration from the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let this = Self::from_toml_str(&fs::read_to_string(path)?)?;
        info!(
            "Loaded mail configuration from {}: delivery via {}, retrieval via {}",
            path.display(),
            this.delivery.as_ref().map_or("nothing", |s| s.kind.name()),
            this.retrieval.as_ref().map_or("nothing", |s| s.kind.name()),
        );
        Ok(this)
    }
}
