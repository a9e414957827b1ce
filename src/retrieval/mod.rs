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

//! Retriever methods: the ways messages can be fetched from a mailbox.

use std::fmt;
use std::str::FromStr;

use crate::config::settings::{Settings, Value};
use crate::message::Message;
use crate::support::error::{BackendFamily, Error};

pub mod pop3;
pub mod test_retriever;

pub use self::test_retriever::TestMailbox;

/// A way of fetching messages.
///
/// Only `find` needs implementing; `first`, `last` and `all` are `find` with
/// some criteria forced.
pub trait RetrieverMethod: Send + Sync + fmt::Debug {
    fn kind(&self) -> RetrieverKind;

    /// The effective settings, i.e., after merging over the defaults.
    fn settings(&self) -> &Settings;

    /// Fetches messages matching `criteria`, which are interpreted by
    /// `FindOptions::from_criteria`.
    fn find(&self, criteria: &Settings) -> Result<Vec<Message>, Error>;

    fn first(&self, criteria: &Settings) -> Result<Option<Message>, Error> {
        let criteria =
            criteria.merged(&settings! { "what" => "first", "count" => 1 });
        Ok(self.find(&criteria)?.into_iter().next())
    }

    fn last(&self, criteria: &Settings) -> Result<Option<Message>, Error> {
        let criteria =
            criteria.merged(&settings! { "what" => "last", "count" => 1 });
        Ok(self.find(&criteria)?.into_iter().next())
    }

    fn all(&self, criteria: &Settings) -> Result<Vec<Message>, Error> {
        self.find(&criteria.merged(&settings! { "count" => "all" }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetrieverKind {
    Pop3,
    Test,
}

static KINDS: &[(&str, RetrieverKind)] =
    &[("pop3", RetrieverKind::Pop3), ("test", RetrieverKind::Test)];

impl RetrieverKind {
    pub fn name(self) -> &'static str {
        KINDS
            .iter()
            .find(|&&(_, kind)| kind == self)
            .map(|&(name, _)| name)
            .unwrap_or("unknown")
    }

    pub fn default_settings(self) -> Settings {
        match self {
            RetrieverKind::Pop3 => settings! {
                "address" => "localhost",
                "port" => 995,
                "user_name" => None::<String>,
                "password" => None::<String>,
                "enable_ssl" => true,
                "read_timeout" => 60,
            },
            RetrieverKind::Test => Settings::new(),
        }
    }

    /// Constructs a method of this kind.
    ///
    /// The test retriever reads from `mailbox`; other kinds ignore it.
    pub fn instantiate(
        self,
        settings: &Settings,
        mailbox: &TestMailbox,
    ) -> Result<Box<dyn RetrieverMethod>, Error> {
        Ok(match self {
            RetrieverKind::Pop3 => Box::new(pop3::Pop3::new(settings)?),
            RetrieverKind::Test => Box::new(test_retriever::TestRetriever::new(
                settings,
                mailbox.clone(),
            )),
        })
    }
}

impl FromStr for RetrieverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        KINDS
            .iter()
            .find(|&&(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, kind)| kind)
            .ok_or_else(|| Error::UnknownBackendKind {
                family: BackendFamily::Retrieval,
                kind: s.to_owned(),
            })
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum What {
    First,
    Last,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Parsed search criteria.
///
/// The criteria keys are:
///
/// - `what`: `"first"` (oldest messages) or `"last"` (newest). Default first.
/// - `count`: a non-negative integer or `"all"`. Default 10.
/// - `order`: `"asc"` (oldest first) or `"desc"`. Default asc.
/// - `delete_after_find`: remove found messages from the mailbox. Default
///   false.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FindOptions {
    pub what: What,
    /// `None` means all messages.
    pub count: Option<usize>,
    pub order: Order,
    pub delete_after_find: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            what: What::First,
            count: Some(10),
            order: Order::Asc,
            delete_after_find: false,
        }
    }
}

impl FindOptions {
    pub fn from_criteria(criteria: &Settings) -> Result<Self, Error> {
        let mut options = Self::default();

        match criteria.str("what")? {
            None => (),
            Some(w) if w.eq_ignore_ascii_case("first") => {
                options.what = What::First
            },
            Some(w) if w.eq_ignore_ascii_case("last") => {
                options.what = What::Last
            },
            Some(w) => return Err(invalid("what", w)),
        }

        match criteria.get("count") {
            None | Some(&Value::Nil) => (),
            Some(&Value::Str(ref s)) if s.eq_ignore_ascii_case("all") => {
                options.count = None
            },
            Some(_) => match criteria.int("count")? {
                Some(n) if n >= 0 => options.count = Some(n as usize),
                _ => {
                    return Err(Error::InvalidSetting {
                        key: "count".to_owned(),
                        reason: "expected a non-negative integer or \"all\""
                            .to_owned(),
                    })
                },
            },
        }

        match criteria.str("order")? {
            None => (),
            Some(o) if o.eq_ignore_ascii_case("asc") => options.order = Order::Asc,
            Some(o) if o.eq_ignore_ascii_case("desc") => {
                options.order = Order::Desc
            },
            Some(o) => return Err(invalid("order", o)),
        }

        if let Some(delete) = criteria.bool("delete_after_find")? {
            options.delete_after_find = delete;
        }

        Ok(options)
    }

    /// Selects which of `total` messages (numbered from 0, oldest first) to
    /// return, in the order they are to be returned.
    pub fn select(&self, total: usize) -> Vec<usize> {
        let count = self.count.map_or(total, |c| c.min(total));
        let mut selected = match self.what {
            What::First => (0..count).collect::<Vec<_>>(),
            What::Last => (total - count..total).collect::<Vec<_>>(),
        };

        if Order::Desc == self.order {
            selected.reverse();
        }

        selected
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidSetting {
        key: key.to_owned(),
        reason: format!("unrecognised value {:?}", value),
    }
}

/// Builds a `RetrievalFailed` error which only carries redacted settings.
pub(crate) fn failure(
    kind: RetrieverKind,
    settings: &Settings,
    cause: impl fmt::Display,
) -> Error {
    Error::RetrievalFailed {
        kind,
        settings: settings.redacted().to_string(),
        cause: cause.to_string(),
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(
            RetrieverKind::Pop3,
            "POP3".parse::<RetrieverKind>().unwrap()
        );
        assert_eq!("test", RetrieverKind::Test.to_string());
        match "imap".parse::<RetrieverKind>() {
            Err(Error::UnknownBackendKind { family, kind }) => {
                assert_eq!(BackendFamily::Retrieval, family);
                assert_eq!("imap", kind);
            },
            r => panic!("Unexpected result: {:?}", r),
        }
    }

    #[test]
    fn default_options() {
        assert_eq!(
            FindOptions::default(),
            FindOptions::from_criteria(&Settings::new()).unwrap()
        );
    }

    #[test]
    fn parse_options() {
        assert_eq!(
            FindOptions {
                what: What::Last,
                count: None,
                order: Order::Desc,
                delete_after_find: true,
            },
            FindOptions::from_criteria(&settings! {
                "what" => "last",
                "count" => "all",
                "order" => "desc",
                "delete_after_find" => true,
            })
            .unwrap()
        );
        assert_eq!(
            Some(3),
            FindOptions::from_criteria(&settings! { "count" => 3 })
                .unwrap()
                .count
        );

        for bad in &[
            settings! { "what" => "middle" },
            settings! { "order" => "random" },
            settings! { "count" => -1 },
            settings! { "count" => "some" },
            settings! { "delete_after_find" => "maybe" },
        ] {
            assert_matches!(
                Err(Error::InvalidSetting { .. }),
                FindOptions::from_criteria(bad)
            );
        }
    }

    #[test]
    fn selection() {
        let opts = |what, count, order| FindOptions {
            what,
            count,
            order,
            delete_after_find: false,
        };

        assert_eq!(
            vec![0, 1, 2],
            opts(What::First, Some(3), Order::Asc).select(5)
        );
        assert_eq!(
            vec![2, 1, 0],
            opts(What::First, Some(3), Order::Desc).select(5)
        );
        assert_eq!(
            vec![2, 3, 4],
            opts(What::Last, Some(3), Order::Asc).select(5)
        );
        assert_eq!(
            vec![4, 3, 2],
            opts(What::Last, Some(3), Order::Desc).select(5)
        );
        assert_eq!(
            vec![0, 1],
            opts(What::Last, None, Order::Asc).select(2)
        );
        assert_eq!(
            Vec::<usize>::new(),
            opts(What::First, Some(0), Order::Asc).select(5)
        );
        assert_eq!(
            Vec::<usize>::new(),
            opts(What::Last, Some(3), Order::Asc).select(0)
        );
    }

    proptest! {
        #[test]
        fn selection_is_bounded_and_distinct(
            last in any::<bool>(),
            desc in any::<bool>(),
            count in prop::option::of(0usize..20),
            total in 0usize..20,
        ) {
            let opts = FindOptions {
                what: if last { What::Last } else { What::First },
                count,
                order: if desc { Order::Desc } else { Order::Asc },
                delete_after_find: false,
            };
            let selected = opts.select(total);

            prop_assert_eq!(
                count.map_or(total, |c| c.min(total)),
                selected.len()
            );
            prop_assert!(selected.iter().all(|&ix| ix < total));
            let mut sorted = selected.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(selected.len(), sorted.len());
        }
    }
}
