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

//! Constants from `sysexits.h`
//!
//! sendmail and friends report why a submission failed through these exit
//! codes, so they are used to explain a failed sendmail invocation.

use std::fmt;
use std::process::ExitStatus;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_OK: Sysexit = Sysexit(0);
pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_DATAERR: Sysexit = Sysexit(65);
pub const EX_NOINPUT: Sysexit = Sysexit(66);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_NOHOST: Sysexit = Sysexit(68);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_OSFILE: Sysexit = Sysexit(72);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_TEMPFAIL: Sysexit = Sysexit(75);
pub const EX_PROTOCOL: Sysexit = Sysexit(76);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

static NAMES: &[(Sysexit, &str, &str)] = &[
    (EX_OK, "EX_OK", "successful termination"),
    (EX_USAGE, "EX_USAGE", "command line usage error"),
    (EX_DATAERR, "EX_DATAERR", "data format error"),
    (EX_NOINPUT, "EX_NOINPUT", "cannot open input"),
    (EX_NOUSER, "EX_NOUSER", "addressee unknown"),
    (EX_NOHOST, "EX_NOHOST", "host name unknown"),
    (EX_UNAVAILABLE, "EX_UNAVAILABLE", "service unavailable"),
    (EX_SOFTWARE, "EX_SOFTWARE", "internal software error"),
    (EX_OSERR, "EX_OSERR", "system error"),
    (EX_OSFILE, "EX_OSFILE", "critical OS file missing"),
    (EX_CANTCREAT, "EX_CANTCREAT", "can't create output file"),
    (EX_IOERR, "EX_IOERR", "input/output error"),
    (EX_TEMPFAIL, "EX_TEMPFAIL", "temporary failure"),
    (EX_PROTOCOL, "EX_PROTOCOL", "remote error in protocol"),
    (EX_NOPERM, "EX_NOPERM", "permission denied"),
    (EX_CONFIG, "EX_CONFIG", "configuration error"),
];

impl Sysexit {
    /// Returns the exit code of `status`, or `None` if the process was killed
    /// by a signal.
    pub fn from_status(status: ExitStatus) -> Option<Self> {
        status.code().map(Sysexit)
    }

    pub fn is_success(self) -> bool {
        EX_OK == self
    }

    /// The symbolic name and meaning of this code, if it is one of the
    /// standard values.
    pub fn describe(self) -> Option<(&'static str, &'static str)> {
        NAMES
            .iter()
            .find(|&&(code, _, _)| code == self)
            .map(|&(_, name, meaning)| (name, meaning))
    }
}

impl fmt::Display for Sysexit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.describe() {
            Some((name, meaning)) => {
                write!(f, "exit status {} ({}: {})", self.0, name, meaning)
            },
            None => write!(f, "exit status {}", self.0),
        }
    }
}

/// Describes how a child process terminated, for use in error messages.
pub fn describe_status(status: ExitStatus) -> String {
    match Sysexit::from_status(status) {
        Some(code) => code.to_string(),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("killed by signal {}", signal);
                }
            }

            "terminated abnormally".to_owned()
        },
    }
}
