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

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::{failure, Deliveries, DeliveryKind, DeliveryMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::{
    error::Error, log_prefix::LogPrefix, safe_name::is_safe_name,
};

/// Appends each message to one file per destination address under
/// `location`, creating the directory if needed.
#[derive(Debug)]
pub struct FileDelivery {
    settings: Settings,
    location: PathBuf,
    deliveries: Deliveries,
}

impl FileDelivery {
    pub fn new(
        settings: &Settings,
        deliveries: Deliveries,
    ) -> Result<Self, Error> {
        let settings = DeliveryKind::File.default_settings().merged(settings);
        let location = settings.str("location")?.ok_or_else(|| {
            Error::InvalidSetting {
                key: "location".to_owned(),
                reason: "no directory given".to_owned(),
            }
        })?;

        Ok(Self {
            location: PathBuf::from(location),
            settings,
            deliveries,
        })
    }

    /// Appends `data` to the file of every destination, or to none of them.
    ///
    /// Every file is opened before anything is written. If an open or a
    /// write fails, files created by this call are removed and the others
    /// are truncated back to their previous length.
    fn write_all(
        &self,
        destinations: &[String],
        data: &[u8],
    ) -> io::Result<()> {
        fs::create_dir_all(&self.location)?;

        let mut targets = Vec::with_capacity(destinations.len());
        let result = open_targets(&self.location, destinations, &mut targets)
            .and_then(|()| {
                for target in &mut targets {
                    target.file.write_all(data)?;
                    target.file.flush()?;
                }
                Ok(())
            });

        if result.is_err() {
            for target in targets {
                target.roll_back();
            }
        }
        result
    }
}

struct Target {
    path: PathBuf,
    file: fs::File,
    /// The length before this delivery, or `None` if the file is new.
    original_len: Option<u64>,
}

impl Target {
    fn roll_back(self) {
        let result = match self.original_len {
            None => fs::remove_file(&self.path),
            Some(len) => self.file.set_len(len),
        };
        if let Err(e) = result {
            warn!("Failed to roll back {}: {}", self.path.display(), e);
        }
    }
}

fn open_targets(
    location: &Path,
    destinations: &[String],
    targets: &mut Vec<Target>,
) -> io::Result<()> {
    for destination in destinations {
        let path = location.join(destination);
        let existed = path.exists();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let original_len = if existed {
            Some(file.metadata()?.len())
        } else {
            None
        };
        targets.push(Target {
            path,
            file,
            original_len,
        });
    }
    Ok(())
}

impl DeliveryMethod for FileDelivery {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::File
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn deliver<'a>(&self, message: &'a Message) -> Result<&'a Message, Error> {
        let log_prefix = LogPrefix::new("delivery:file".to_owned())
            .with_message_id(message.message_id());
        let destinations = message.destinations();

        if destinations.is_empty() {
            return Err(failure(
                DeliveryKind::File,
                &self.settings,
                "message has no destination addresses",
            ));
        }

        // Addresses become file names, so anything that could escape the
        // directory is refused before anything is written.
        if let Some(unsafe_name) =
            destinations.iter().find(|d| !is_safe_name(d))
        {
            warn!("{} Refusing destination {:?}", log_prefix, unsafe_name);
            return Err(failure(
                DeliveryKind::File,
                &self.settings,
                format!("unsafe destination address {:?}", unsafe_name),
            ));
        }

        self.write_all(&destinations, message.encoded().as_bytes())
            .map_err(|e| {
                warn!("{} Delivery failed: {}", log_prefix, e);
                failure(DeliveryKind::File, &self.settings, e)
            })?;

        self.deliveries.record(message);
        info!(
            "{} Wrote message for {} destination(s) under {}",
            log_prefix,
            destinations.len(),
            self.location.display()
        );
        Ok(message)
    }
}
