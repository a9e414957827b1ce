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

use crate::message::Message;

/// An append-only record of every message handed successfully to a delivery
/// method.
///
/// Clones share the same underlying list. Entries appear in the order the
/// deliveries completed. Nothing is ever removed except by `clear()`, which
/// exists so tests can start from a clean slate.
#[derive(Clone, Default)]
pub struct Deliveries {
    inner: Arc<Mutex<Vec<Message>>>,
}

impl Deliveries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: &Message) {
        self.inner.lock().unwrap().push(message.clone());
    }

    /// Returns a copy of every recorded message, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Message> {
        self.inner.lock().unwrap().last().cloned()
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
}

impl fmt::Debug for Deliveries {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Deliveries({} messages)", self.len())
    }
}
