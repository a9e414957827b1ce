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

use serde::Deserialize;

use crate::config::settings::Settings;

/// The on-disk form of a `Configuration`, usually `mailbag.toml`.
///
/// ```toml
/// [delivery]
/// method = "sendmail"
/// location = "/usr/sbin/sendmail"
/// arguments = "-i"
///
/// [retrieval]
/// method = "pop3"
/// address = "pop.example.com"
/// user_name = "bob"
/// ```
///
/// A missing section leaves the corresponding built-in default in place.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub delivery: Option<MethodConfig>,
    #[serde(default)]
    pub retrieval: Option<MethodConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MethodConfig {
    /// The kind of backend, e.g. `smtp` or `pop3`.
    pub method: String,
    /// Every other key in the section is a backend setting.
    #[serde(flatten)]
    pub settings: Settings,
}
