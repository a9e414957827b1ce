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
use std::sync::{Arc, Mutex};

use log::debug;

use super::{FindOptions, RetrieverKind, RetrieverMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::error::Error;

/// An in-memory mailbox for the test retriever to read from.
///
/// Clones share the same messages. Messages are kept in the order they were
/// pushed, which the retriever treats as oldest first.
#[derive(Clone, Default)]
pub struct TestMailbox {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl TestMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.inner.lock().unwrap().push(message);
    }

    pub fn replace(&self, messages: Vec<Message>) {
        *self.inner.lock().unwrap() = messages;
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Atomically selects messages according to `options`, removing them
    /// from the mailbox if requested.
    fn take(&self, options: &FindOptions) -> Vec<Message> {
        let mut messages = self.inner.lock().unwrap();
        let selected = options.select(messages.len());
        let found = selected
            .iter()
            .map(|&ix| messages[ix].clone())
            .collect::<Vec<_>>();

        if options.delete_after_find {
            let mut doomed = selected;
            doomed.sort_unstable();
            for ix in doomed.into_iter().rev() {
                messages.remove(ix);
            }
        }

        found
    }
}

impl fmt::Debug for TestMailbox {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TestMailbox({} messages)", self.len())
    }
}

/// Retrieves messages from a `TestMailbox`.
#[derive(Debug)]
pub struct TestRetriever {
    settings: Settings,
    mailbox: TestMailbox,
}

impl TestRetriever {
    pub fn new(settings: &Settings, mailbox: TestMailbox) -> Self {
        Self {
            settings: RetrieverKind::Test.default_settings().merged(settings),
            mailbox,
        }
    }
}

impl RetrieverMethod for TestRetriever {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Test
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn find(&self, criteria: &Settings) -> Result<Vec<Message>, Error> {
        let options = FindOptions::from_criteria(criteria)?;
        let found = self.mailbox.take(&options);
        debug!(
            "retrieval:test Found {} message(s) with {:?}",
            found.len(),
            options
        );
        Ok(found)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mailbox_of(n: usize) -> TestMailbox {
        let mailbox = TestMailbox::new();
        for i in 0..n {
            mailbox.push(Message::builder().subject(i.to_string()).build());
        }
        mailbox
    }

    fn subjects(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.subject().unwrap()).collect()
    }

    #[test]
    fn find_variants() {
        let retriever = TestRetriever::new(&Settings::new(), mailbox_of(12));

        assert_eq!(
            (0..10).map(|i| i.to_string()).collect::<Vec<_>>(),
            subjects(&retriever.find(&Settings::new()).unwrap())
        );
        assert_eq!(
            vec!["9", "10", "11"],
            subjects(
                &retriever
                    .find(&settings! { "what" => "last", "count" => 3 })
                    .unwrap()
            )
        );
        assert_eq!(
            vec!["11", "10"],
            subjects(
                &retriever
                    .find(&settings! {
                        "what" => "last",
                        "count" => 2,
                        "order" => "desc",
                    })
                    .unwrap()
            )
        );
        assert_eq!(12, retriever.all(&Settings::new()).unwrap().len());
        assert_eq!(
            Some("0"),
            retriever
                .first(&Settings::new())
                .unwrap()
                .as_ref()
                .and_then(Message::subject)
        );
        assert_eq!(
            Some("11"),
            retriever
                .last(&Settings::new())
                .unwrap()
                .as_ref()
                .and_then(Message::subject)
        );
    }

    #[test]
    fn first_and_last_of_empty_mailbox() {
        let retriever = TestRetriever::new(&Settings::new(), TestMailbox::new());
        assert_eq!(None, retriever.first(&Settings::new()).unwrap());
        assert_eq!(None, retriever.last(&Settings::new()).unwrap());
        assert!(retriever.all(&Settings::new()).unwrap().is_empty());
    }

    #[test]
    fn forced_criteria_win() {
        let retriever = TestRetriever::new(&Settings::new(), mailbox_of(5));
        // `last` ignores a caller asking for the first 3
        assert_eq!(
            Some("4"),
            retriever
                .last(&settings! { "what" => "first", "count" => 3 })
                .unwrap()
                .as_ref()
                .and_then(Message::subject)
        );
        assert_eq!(
            5,
            retriever.all(&settings! { "count" => 1 }).unwrap().len()
        );
    }

    #[test]
    fn delete_after_find() {
        let mailbox = mailbox_of(5);
        let retriever = TestRetriever::new(&Settings::new(), mailbox.clone());

        let found = retriever
            .find(&settings! {
                "what" => "last",
                "count" => 2,
                "delete_after_find" => true,
            })
            .unwrap();
        assert_eq!(vec!["3", "4"], subjects(&found));
        assert_eq!(vec!["0", "1", "2"], subjects(&mailbox.snapshot()));

        // Without the flag, nothing is removed
        retriever.all(&Settings::new()).unwrap();
        assert_eq!(3, mailbox.len());
    }

    #[test]
    fn invalid_criteria() {
        let retriever = TestRetriever::new(&Settings::new(), mailbox_of(1));
        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            retriever.find(&settings! { "order" => "sideways" })
        );
        assert_eq!(1, retriever.all(&Settings::new()).unwrap().len());
    }
}
