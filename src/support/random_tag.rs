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

//! Generation of unique tags, used for things like `Message-ID` values.
//!
//! A tag combines the current time, the process id, a hash of the calling
//! thread's identity, a process-wide counter, and a random byte:
//!
//! ```text
//! {secs:x}{usec:05x}_{pid:x}{thread:016x}{counter:010}{random:02x}
//! ```
//!
//! Everything after the pid is fixed-width (the counter is only ever wider
//! than 10 digits after 10 billion tags), so two tags from the same process
//! can only be equal if they were built from the same counter value, which
//! the atomic increment rules out.

use std::collections::hash_map::DefaultHasher;
use std::ffi::CStr;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;
use log::warn;
use rand::Rng;

lazy_static! {
    static ref UNIQ: AtomicU64 = AtomicU64::new(something_random());
    static ref HOST_NAME: String = system_host_name();
}

/// Returns a new tag, distinct from every other tag produced by this process.
pub fn random_tag() -> String {
    let now = now();
    format!(
        "{:x}{:05x}_{:x}{:016x}{:010}{:02x}",
        now.as_secs(),
        now.subsec_micros(),
        std::process::id(),
        thread_hash(),
        next_uniq(),
        rand::thread_rng().gen_range(0u32..255),
    )
}

/// Builds a `Message-ID` value of the form `<tag@domain.mail>`.
///
/// If `domain` is `None`, the system host name is used.
pub fn message_id(domain: Option<&str>) -> String {
    format!(
        "<{}@{}.mail>",
        random_tag(),
        domain.unwrap_or_else(|| HOST_NAME.as_str()),
    )
}

fn next_uniq() -> u64 {
    UNIQ.fetch_add(1, Ordering::Relaxed) + 1
}

fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn thread_hash() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// The initial counter value: the low three decimal digits of a value mixing
/// the thread identity, a random factor and the time, so that restarted
/// processes don't trivially start counting from the same place.
fn something_random() -> u64 {
    let factor = f64::from(rand::thread_rng().gen_range(0u32..255));
    let secs = now().as_secs_f64().max(1.0);
    // Shifted so the hash fits in the mantissa of an f64
    let mixed = (thread_hash() >> 11) as f64 * factor / secs;
    (mixed as u64) % 1000
}

fn system_host_name() -> String {
    let mut buf = [0u8; 256];
    match nix::unistd::gethostname(&mut buf) {
        Ok(name) => host_name_from_cstr(name),
        Err(e) => {
            warn!("Failed to determine host name, using localhost: {}", e);
            "localhost".to_owned()
        },
    }
}

fn host_name_from_cstr(name: &CStr) -> String {
    match name.to_str() {
        Ok(name) if !name.is_empty() => name.to_owned(),
        _ => "localhost".to_owned(),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use rayon::prelude::*;
    use regex::Regex;

    use super::*;

    #[test]
    fn tag_layout() {
        let rx = Regex::new("^[0-9a-f]+[0-9a-f]{5}_[0-9a-f]+[0-9a-f]{16}[0-9]{10,}[0-9a-f]{2}$")
            .unwrap();
        let tag = random_tag();
        assert!(rx.is_match(&tag), "Bad tag: {}", tag);
    }

    #[test]
    fn message_id_layout() {
        let id = message_id(Some("example.com"));
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com.mail>"));

        let id = message_id(None);
        assert!(id.ends_with(".mail>"));
        assert!(!id.contains(' '));
    }

    #[test]
    fn seed_is_three_digits() {
        for _ in 0..100 {
            assert!(something_random() < 1000);
        }
    }

    #[test]
    fn counter_increases_within_thread() {
        let a = next_uniq();
        let b = next_uniq();
        assert!(b > a);
    }

    #[test]
    fn sequential_tags_are_distinct() {
        let tags = (0..1000).map(|_| random_tag()).collect::<HashSet<_>>();
        assert_eq!(1000, tags.len());
    }

    #[test]
    fn concurrent_tags_are_distinct() {
        let tags = (0..10_000)
            .into_par_iter()
            .map(|_| random_tag())
            .collect::<Vec<_>>();
        let distinct = tags.iter().collect::<HashSet<_>>();
        assert_eq!(tags.len(), distinct.len());
    }
}
