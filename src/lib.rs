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

//! Mailbag builds email messages and dispatches them through pluggable
//! delivery and retrieval methods.
//!
//! The methods in effect are held by a `Configuration`, usually inside a
//! `Mailer`. The free functions in this module operate on a process-wide
//! `Mailer` created on first use:
//!
//! ```no_run
//! mailbag::defaults(|c| {
//!     c.delivery_method("sendmail", mailbag::settings! { "timeout" => 30 })?;
//!     Ok(())
//! })?;
//!
//! let message = mailbag::Message::builder()
//!     .from("bob@example.com")
//!     .to("alice@example.com")
//!     .subject("Hello")
//!     .body("Hi Alice!\n")
//!     .build();
//! mailbag::deliver(message)?;
//! # Ok::<(), mailbag::Error>(())
//! ```

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            unexpected => panic!(
                "Expected {} matches {}, got {:?}",
                stringify!($expected),
                stringify!($actual),
                unexpected
            ),
        }
    };
}

#[macro_use]
pub mod config;
pub mod delivery;
pub mod envelope;
pub mod mailer;
pub mod message;
pub mod retrieval;
pub mod support;

use std::path::Path;

use lazy_static::lazy_static;

pub use crate::config::{Configuration, Settings, Value};
pub use crate::delivery::{Deliveries, DeliveryKind, DeliveryMethod};
pub use crate::envelope::Envelope;
pub use crate::mailer::Mailer;
pub use crate::message::{Message, MessageBuilder};
pub use crate::retrieval::{RetrieverKind, RetrieverMethod, TestMailbox};
pub use crate::support::error::Error;

lazy_static! {
    static ref MAILER: Mailer = Mailer::default();
}

/// The process-wide `Mailer` behind the free functions of this module.
pub fn mailer() -> &'static Mailer {
    &MAILER
}

/// Starts a new, empty message.
pub fn new() -> Message {
    Message::new()
}

/// Changes the process-wide configuration. See `Mailer::defaults`.
pub fn defaults(
    f: impl FnOnce(&mut Configuration) -> Result<(), Error>,
) -> Result<(), Error> {
    MAILER.defaults(f)
}

pub fn delivery_method() -> Result<Box<dyn DeliveryMethod>, Error> {
    MAILER.delivery_method()
}

pub fn retriever_method() -> Result<Box<dyn RetrieverMethod>, Error> {
    MAILER.retriever_method()
}

/// Delivers `message`. See `Mailer::deliver`.
pub fn deliver(message: Message) -> Result<Message, Error> {
    MAILER.deliver(message)
}

pub fn find(criteria: &Settings) -> Result<Vec<Message>, Error> {
    MAILER.find(criteria)
}

pub fn first(criteria: &Settings) -> Result<Option<Message>, Error> {
    MAILER.first(criteria)
}

pub fn last(criteria: &Settings) -> Result<Option<Message>, Error> {
    MAILER.last(criteria)
}

pub fn all(criteria: &Settings) -> Result<Vec<Message>, Error> {
    MAILER.all(criteria)
}

pub fn read(path: impl AsRef<Path>) -> Result<Message, Error> {
    MAILER.read(path)
}

/// Every message delivered through the process-wide `Mailer`.
pub fn deliveries() -> Deliveries {
    MAILER.deliveries().clone()
}

/// Restores the built-in configuration and empties the ledger.
pub fn reset() {
    MAILER.reset()
}

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} [{}][{}] {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    record.level(),
                    record.target(),
                    message,
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(std::io::stderr())
            .apply()
            .unwrap();
    })
}
