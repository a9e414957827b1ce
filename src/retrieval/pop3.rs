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

//! A small blocking POP3 client, enough to list, fetch and delete messages.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use log::{debug, info, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};

use super::{failure, FindOptions, RetrieverKind, RetrieverMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Longest response line accepted from the server.
const MAX_LINE: usize = 65536;

/// Retrieves messages from a POP3 maildrop.
///
/// Messages are numbered by the server from oldest to newest; `FindOptions`
/// selects among those numbers. Deletions requested by `delete_after_find`
/// only take effect when the session ends cleanly with `QUIT`.
///
/// Besides the defaults, `openssl_verify_mode = "none"` disables certificate
/// checks.
pub struct Pop3 {
    settings: Settings,
    address: String,
    port: u16,
    credentials: Option<(String, String)>,
    enable_ssl: bool,
    verify_certificates: bool,
    read_timeout: Option<Duration>,
}

impl Pop3 {
    pub fn new(settings: &Settings) -> Result<Self, Error> {
        let settings = RetrieverKind::Pop3.default_settings().merged(settings);
        let credentials =
            match (settings.str("user_name")?, settings.str("password")?) {
                (Some(user), Some(pass)) => {
                    Some((user.to_owned(), pass.to_owned()))
                },
                _ => None,
            };

        Ok(Self {
            address: settings.str("address")?.unwrap_or("localhost").to_owned(),
            port: settings.port("port")?.unwrap_or(995),
            credentials,
            enable_ssl: settings.bool("enable_ssl")?.unwrap_or(true),
            verify_certificates: !settings
                .str("openssl_verify_mode")?
                .map_or(false, |m| m.eq_ignore_ascii_case("none")),
            read_timeout: settings.seconds("read_timeout")?,
            settings,
        })
    }

    fn connect(&self) -> Result<Session, String> {
        let log_prefix = LogPrefix::new("retrieval:pop3".to_owned())
            .with_host(&self.address);
        let tcp = TcpStream::connect((self.address.as_str(), self.port))
            .map_err(|e| {
                format!("connecting to {}:{}: {}", self.address, self.port, e)
            })?;
        tcp.set_read_timeout(self.read_timeout)
            .and_then(|()| tcp.set_write_timeout(self.read_timeout))
            .map_err(|e| e.to_string())?;

        let stream: Box<dyn Stream> = if self.enable_ssl {
            let mut connector = SslConnector::builder(SslMethod::tls())
                .map_err(|e| format!("TLS setup failed: {}", e))?;
            if !self.verify_certificates {
                connector.set_verify(SslVerifyMode::NONE);
            }
            let ssl_stream = connector
                .build()
                .connect(&self.address, tcp)
                .map_err(|e| format!("TLS handshake failed: {}", e))?;
            Box::new(ssl_stream)
        } else {
            Box::new(tcp)
        };

        let mut session = Session {
            io: BufReader::new(stream),
            log_prefix,
        };
        let greeting = session.read_status()?;
        debug!("{} Connected: {}", session.log_prefix, greeting);
        Ok(session)
    }

    fn fetch(&self, options: &FindOptions) -> Result<Vec<Message>, String> {
        let mut session = self.connect()?;
        if let Some((ref user, ref pass)) = self.credentials {
            session.command(&format!("USER {}", user))?;
            session.command_secret("PASS", pass)?;
        }

        let total = session.stat()?;
        let selected = options.select(total);
        let mut found = Vec::with_capacity(selected.len());
        for &ix in &selected {
            // POP3 message numbers start at 1
            let data = session.retr(ix + 1)?;
            found.push(Message::parse_bytes(&data));
        }

        if options.delete_after_find {
            for &ix in &selected {
                session.command(&format!("DELE {}", ix + 1))?;
            }
        }

        session.command("QUIT")?;
        info!(
            "{} Retrieved {} of {} message(s){}",
            session.log_prefix,
            found.len(),
            total,
            if options.delete_after_find {
                " and deleted them"
            } else {
                ""
            }
        );
        Ok(found)
    }
}

impl std::fmt::Debug for Pop3 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Pop3 {}", self.settings.redacted())
    }
}

impl RetrieverMethod for Pop3 {
    fn kind(&self) -> RetrieverKind {
        RetrieverKind::Pop3
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn find(&self, criteria: &Settings) -> Result<Vec<Message>, Error> {
        let options = FindOptions::from_criteria(criteria)?;
        self.fetch(&options).map_err(|cause| {
            warn!(
                "{} Retrieval failed: {}",
                LogPrefix::new("retrieval:pop3".to_owned())
                    .with_host(&self.address),
                cause
            );
            failure(RetrieverKind::Pop3, &self.settings, cause)
        })
    }
}

trait Stream: Read + Write + Send {}
impl<T: Read + Write + Send> Stream for T {}

struct Session {
    io: BufReader<Box<dyn Stream>>,
    log_prefix: LogPrefix,
}

impl Session {
    fn command(&mut self, command: &str) -> Result<String, String> {
        debug!("{} >> {}", self.log_prefix, command);
        self.send(command)?;
        self.read_status()
    }

    /// Like `command`, but keeps the argument out of the logs.
    fn command_secret(
        &mut self,
        verb: &str,
        secret: &str,
    ) -> Result<String, String> {
        debug!("{} >> {} [redacted]", self.log_prefix, verb);
        self.send(&format!("{} {}", verb, secret))?;
        self.read_status()
    }

    fn send(&mut self, line: &str) -> Result<(), String> {
        let stream = self.io.get_mut();
        stream
            .write_all(line.as_bytes())
            .and_then(|()| stream.write_all(b"\r\n"))
            .and_then(|()| stream.flush())
            .map_err(|e| format!("writing to server: {}", e))
    }

    fn read_line(&mut self) -> Result<Vec<u8>, String> {
        let mut line = Vec::new();
        (&mut self.io)
            .take(MAX_LINE as u64)
            .read_until(b'\n', &mut line)
            .map_err(|e| format!("reading from server: {}", e))?;

        if line.is_empty() {
            return Err("connection closed by server".to_owned());
        }
        if !line.ends_with(b"\n") {
            return Err("response line too long".to_owned());
        }

        Ok(line)
    }

    /// Reads a `+OK` / `-ERR` status line, returning the text after `+OK`.
    fn read_status(&mut self) -> Result<String, String> {
        let line = self.read_line()?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();
        debug!("{} << {}", self.log_prefix, line);

        if let Some(rest) = line.strip_prefix("+OK") {
            Ok(rest.trim_start().to_owned())
        } else if line.starts_with("-ERR") {
            Err(format!("server said: {}", line))
        } else {
            Err(format!("unexpected response: {:?}", line))
        }
    }

    /// Reads the body of a multi-line response, undoing dot-stuffing and
    /// converting line endings to LF.
    fn read_multiline(&mut self) -> Result<Vec<u8>, String> {
        let mut data = Vec::new();
        loop {
            let line = self.read_line()?;
            let content = line
                .strip_suffix(b"\r\n")
                .or_else(|| line.strip_suffix(b"\n"))
                .unwrap_or(&line[..]);

            if b"." == content {
                return Ok(data);
            }

            let content = if content.starts_with(b".") {
                &content[1..]
            } else {
                content
            };
            data.extend_from_slice(content);
            data.push(b'\n');
        }
    }

    fn stat(&mut self) -> Result<usize, String> {
        let response = self.command("STAT")?;
        response
            .split_whitespace()
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| format!("unparsable STAT response {:?}", response))
    }

    fn retr(&mut self, number: usize) -> Result<Vec<u8>, String> {
        self.command(&format!("RETR {}", number))?;
        self.read_multiline()
    }
}
