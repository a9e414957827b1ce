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

//! Delivery to an SMTP relay.

use std::time::Duration;

use lettre::address::{Address, Envelope};
use lettre::transport::smtp::{
    authentication::{Credentials, Mechanism},
    client::{Tls, TlsParameters},
    extension::ClientId,
};
use lettre::{SmtpTransport, Transport};
use log::{debug, info, warn};

use super::{failure, Deliveries, DeliveryKind, DeliveryMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Delivers messages to an SMTP server.
///
/// Recognised settings beyond the defaults:
///
/// - `tls`: use implicit TLS (SMTPS) instead of STARTTLS.
/// - `openssl_verify_mode`: `"none"` accepts any certificate.
/// - `read_timeout`: seconds to wait on the server.
pub struct Smtp {
    settings: Settings,
    address: String,
    port: u16,
    domain: String,
    credentials: Option<(String, String)>,
    mechanism: Option<Mechanism>,
    security: Security,
    verify_certificates: bool,
    timeout: Option<Duration>,
    deliveries: Deliveries,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Security {
    None,
    StartTls,
    Implicit,
}

impl Smtp {
    pub fn new(
        settings: &Settings,
        deliveries: Deliveries,
    ) -> Result<Self, Error> {
        let settings = DeliveryKind::Smtp.default_settings().merged(settings);

        let mechanism = match settings.str("authentication")? {
            None => None,
            Some(m) if m.eq_ignore_ascii_case("plain") => Some(Mechanism::Plain),
            Some(m) if m.eq_ignore_ascii_case("login") => Some(Mechanism::Login),
            Some(m) if m.eq_ignore_ascii_case("xoauth2") => {
                Some(Mechanism::Xoauth2)
            },
            Some(m) => {
                return Err(Error::InvalidSetting {
                    key: "authentication".to_owned(),
                    reason: format!("unsupported mechanism {:?}", m),
                })
            },
        };

        let credentials =
            match (settings.str("user_name")?, settings.str("password")?) {
                (Some(user), Some(pass)) => {
                    Some((user.to_owned(), pass.to_owned()))
                },
                _ => None,
            };

        let security = if settings.bool("tls")?.unwrap_or(false)
            || settings.bool("ssl")?.unwrap_or(false)
        {
            Security::Implicit
        } else if settings.bool("enable_starttls_auto")?.unwrap_or(true) {
            Security::StartTls
        } else {
            Security::None
        };

        let verify_certificates = !settings
            .str("openssl_verify_mode")?
            .map_or(false, |m| m.eq_ignore_ascii_case("none"));

        Ok(Self {
            address: settings.str("address")?.unwrap_or("localhost").to_owned(),
            port: settings.port("port")?.unwrap_or(25),
            domain: settings
                .str("domain")?
                .unwrap_or("localhost.localdomain")
                .to_owned(),
            credentials,
            mechanism,
            security,
            verify_certificates,
            timeout: settings.seconds("read_timeout")?,
            settings,
            deliveries,
        })
    }

    /// Derives the SMTP envelope for `message`.
    pub fn envelope(&self, message: &Message) -> Result<Envelope, Error> {
        let from = message
            .envelope_from()
            .ok_or_else(|| self.failure("message has no sender address"))?;
        let from = parse_address(&from).map_err(|e| self.failure(e))?;

        let to = message
            .destinations()
            .iter()
            .map(|d| parse_address(d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.failure(e))?;
        if to.is_empty() {
            return Err(self.failure("message has no destination addresses"));
        }

        Envelope::new(Some(from), to).map_err(|e| self.failure(e))
    }

    fn transport(&self) -> Result<SmtpTransport, String> {
        let mut builder = SmtpTransport::builder_dangerous(self.address.as_str())
            .port(self.port)
            .hello_name(ClientId::Domain(self.domain.clone()))
            .timeout(self.timeout);

        let tls = match self.security {
            Security::None => Tls::None,
            Security::StartTls => Tls::Opportunistic(self.tls_parameters()?),
            Security::Implicit => Tls::Wrapper(self.tls_parameters()?),
        };
        builder = builder.tls(tls);

        if let Some((ref user, ref pass)) = self.credentials {
            builder =
                builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        if let Some(mechanism) = self.mechanism {
            builder = builder.authentication(vec![mechanism]);
        }

        Ok(builder.build())
    }

    fn tls_parameters(&self) -> Result<TlsParameters, String> {
        TlsParameters::builder(self.address.clone())
            .dangerous_accept_invalid_certs(!self.verify_certificates)
            .build()
            .map_err(|e| format!("TLS setup failed: {}", e))
    }

    fn failure(&self, cause: impl std::fmt::Display) -> Error {
        failure(DeliveryKind::Smtp, &self.settings, cause)
    }
}

impl std::fmt::Debug for Smtp {
    // Hand-written so the password never ends up in debug output
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Smtp {}", self.settings.redacted())
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse::<Address>()
        .map_err(|e| format!("invalid address {:?}: {}", s, e))
}

impl DeliveryMethod for Smtp {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Smtp
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn deliver<'a>(&self, message: &'a Message) -> Result<&'a Message, Error> {
        let log_prefix = LogPrefix::new("delivery:smtp".to_owned())
            .with_message_id(message.message_id())
            .with_host(&self.address);
        let envelope = self.envelope(message)?;
        let transport = self.transport().map_err(|e| self.failure(e))?;

        debug!(
            "{} Sending to {}:{} for {} recipient(s)",
            log_prefix,
            self.address,
            self.port,
            envelope.to().len()
        );
        match transport.send_raw(&envelope, message.encoded().as_bytes()) {
            Ok(response) => {
                self.deliveries.record(message);
                info!(
                    "{} Accepted: {} {}",
                    log_prefix,
                    response.code(),
                    response.message().collect::<Vec<_>>().join(" ")
                );
                Ok(message)
            },
            Err(e) => {
                warn!("{} Delivery failed: {}", log_prefix, e);
                Err(self.failure(e))
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    fn message() -> Message {
        Message::builder()
            .from("Bob <bob@x.com>")
            .to("a@x.com")
            .cc("c@x.com")
            .bcc("secret@x.com")
            .subject("hello")
            .body("Hi\n.leading dot\n")
            .build()
    }

    #[test]
    fn settings_validation() {
        Smtp::new(&Settings::new(), Deliveries::new()).unwrap();
        Smtp::new(
            &settings! { "authentication" => "login", "user_name" => "bob" },
            Deliveries::new(),
        )
        .unwrap();

        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            Smtp::new(
                &settings! { "authentication" => "cram_md5" },
                Deliveries::new()
            )
        );
        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            Smtp::new(&settings! { "port" => 0 }, Deliveries::new())
        );
    }

    #[test]
    fn envelope_from_message() {
        let smtp = Smtp::new(&Settings::new(), Deliveries::new()).unwrap();
        let envelope = smtp.envelope(&message()).unwrap();
        assert_eq!(
            Some("bob@x.com"),
            envelope.from().map(AsRef::<str>::as_ref)
        );
        assert_eq!(
            vec!["a@x.com", "c@x.com", "secret@x.com"],
            envelope
                .to()
                .iter()
                .map(AsRef::<str>::as_ref)
                .collect::<Vec<_>>()
        );

        assert_matches!(
            Err(Error::DeliveryFailed { .. }),
            smtp.envelope(&Message::builder().from("bob@x.com").build())
        );
        assert_matches!(
            Err(Error::DeliveryFailed { .. }),
            smtp.envelope(&Message::builder().to("a@x.com").build())
        );
        assert_matches!(
            Err(Error::DeliveryFailed { .. }),
            smtp.envelope(
                &Message::builder().from("bob@x.com").to("not an address").build()
            )
        );
    }

    #[test]
    fn connection_refused_is_delivery_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let deliveries = Deliveries::new();
        let smtp = Smtp::new(
            &settings! {
                "address" => "127.0.0.1",
                "port" => port,
                "enable_starttls_auto" => false,
                "password" => "hunter2",
                "read_timeout" => 5,
            },
            deliveries.clone(),
        )
        .unwrap();

        match smtp.deliver(&message()) {
            Err(e @ Error::DeliveryFailed { .. }) => {
                assert!(!e.to_string().contains("hunter2"));
            },
            r => panic!("Unexpected result: {:?}", r),
        }
        assert!(deliveries.is_empty());
    }

    /// Runs a minimal SMTP server for one session, returning the commands it
    /// received and the message data.
    fn fake_server(listener: TcpListener) -> (Vec<String>, String) {
        let (sock, _) = listener.accept().unwrap();
        let mut writer = sock.try_clone().unwrap();
        let mut reader = BufReader::new(sock);
        let mut commands = Vec::new();
        let mut data = String::new();

        writer.write_all(b"220 fake.example.com ESMTP\r\n").unwrap();
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => (),
            }
            let line = line.trim_end().to_owned();
            let verb = line
                .split(' ')
                .next()
                .unwrap_or("")
                .to_ascii_uppercase();
            commands.push(line);

            match verb.as_str() {
                "EHLO" => writer.write_all(b"250 fake.example.com\r\n"),
                "DATA" => {
                    writer.write_all(b"354 go ahead\r\n").unwrap();
                    loop {
                        let mut line = String::new();
                        reader.read_line(&mut line).unwrap();
                        if ".\r\n" == line {
                            break;
                        }
                        data.push_str(&line);
                    }
                    writer.write_all(b"250 2.0.0 queued as 1234\r\n")
                },
                "QUIT" => {
                    let _ = writer.write_all(b"221 bye\r\n");
                    break;
                },
                _ => writer.write_all(b"250 ok\r\n"),
            }
            .unwrap();
        }

        (commands, data)
    }

    #[test]
    fn delivers_through_server() {
        crate::init_test_log();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || fake_server(listener));

        let deliveries = Deliveries::new();
        let smtp = Smtp::new(
            &settings! {
                "address" => "127.0.0.1",
                "port" => port,
                "domain" => "client.example.com",
                "enable_starttls_auto" => false,
                "read_timeout" => 10,
            },
            deliveries.clone(),
        )
        .unwrap();

        let message = message();
        smtp.deliver(&message).unwrap();
        let (commands, data) = server.join().unwrap();

        assert_eq!("EHLO client.example.com", commands[0]);
        assert!(commands.iter().any(|c| c.starts_with("MAIL FROM:<bob@x.com>")));
        for rcpt in &["a@x.com", "c@x.com", "secret@x.com"] {
            let expected = format!("RCPT TO:<{}>", rcpt);
            assert!(commands.iter().any(|c| c.starts_with(&expected)));
        }
        assert!(data.contains("Subject: hello\r\n"));
        assert!(!data.contains("Bcc"));
        // Dot-stuffed on the wire
        assert!(data.contains("\r\n..leading dot\r\n"));

        assert_eq!(vec![message], deliveries.snapshot());
    }
}
