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

/// Text included at the start of every log statement about one delivery or
/// retrieval operation, e.g. `delivery:sendmail[<1234@host.mail>]`.
#[derive(Clone, Debug)]
pub struct LogPrefix {
    operation: String,
    message_id: Option<String>,
    host: Option<String>,
}

impl LogPrefix {
    pub fn new(operation: String) -> Self {
        Self {
            operation,
            message_id: None,
            host: None,
        }
    }

    pub fn with_message_id(mut self, message_id: Option<&str>) -> Self {
        self.message_id = message_id.map(|m| sanitise(m.to_owned()));
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(sanitise(host.to_owned()));
        self
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.operation)?;
        match (&self.message_id, &self.host) {
            (None, None) => Ok(()),
            (Some(id), None) => write!(f, "[{}]", id),
            (None, Some(host)) => write!(f, "[host={}]", host),
            (Some(id), Some(host)) => write!(f, "[{} host={}]", id, host),
        }
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}
