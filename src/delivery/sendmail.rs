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

//! Delivery by piping the message into a local `sendmail` program.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::{failure, Deliveries, DeliveryKind, DeliveryMethod};
use crate::config::settings::Settings;
use crate::message::Message;
use crate::support::{
    error::Error, log_prefix::LogPrefix, sysexits::describe_status,
};

/// How much of the program's standard error is kept for error messages.
const MAX_STDERR: u64 = 4096;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Delivers messages by running a sendmail-compatible program.
///
/// The program is run directly, never through a shell. Its arguments are the
/// configured `arguments` (split with shell word rules), then `-f` and the
/// return path if the message has one, then every destination address. The
/// message is written to its standard input with bare LF line endings.
///
/// A non-zero exit status is a failure. If `timeout` is set and the program
/// runs longer than that many seconds, it is killed and the delivery fails.
#[derive(Debug)]
pub struct Sendmail {
    settings: Settings,
    location: PathBuf,
    arguments: Vec<String>,
    timeout: Option<Duration>,
    deliveries: Deliveries,
}

impl Sendmail {
    pub fn new(
        settings: &Settings,
        deliveries: Deliveries,
    ) -> Result<Self, Error> {
        let settings = DeliveryKind::Sendmail.default_settings().merged(settings);
        let location = settings.str("location")?.ok_or_else(|| {
            Error::InvalidSetting {
                key: "location".to_owned(),
                reason: "no sendmail program given".to_owned(),
            }
        })?;
        let arguments = shell_words::split(
            settings.str("arguments")?.unwrap_or(""),
        )
        .map_err(|e| Error::InvalidSetting {
            key: "arguments".to_owned(),
            reason: e.to_string(),
        })?;
        let timeout = settings.seconds("timeout")?;

        Ok(Self {
            location: PathBuf::from(location),
            arguments,
            timeout,
            settings,
            deliveries,
        })
    }

    /// The argument vector the program is run with for `message`.
    pub fn arguments_for(&self, message: &Message) -> Vec<String> {
        let mut args = self.arguments.clone();
        if let Some(return_path) = message.return_path() {
            args.push("-f".to_owned());
            args.push(return_path);
        }
        args.extend(message.destinations());
        args
    }

    /// The arguments for `message` rendered as one string, the way a
    /// traditional sendmail invocation would spell them.
    ///
    /// This is only used for display; the program itself gets the vector
    /// from `arguments_for()`.
    pub fn command_line(&self, message: &Message) -> String {
        let mut parts = Vec::new();
        if let Ok(Some(arguments)) = self.settings.str("arguments") {
            if !arguments.is_empty() {
                parts.push(arguments.to_owned());
            }
        }
        if let Some(return_path) = message.return_path() {
            parts.push(format!("-f \"{}\"", return_path));
        }
        parts.extend(message.destinations());
        parts.join(" ")
    }

    fn run(&self, args: &[String], data: Vec<u8>) -> Result<(), String> {
        let mut child = Command::new(&self.location)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                format!("failed to run {}: {}", self.location.display(), e)
            })?;

        // Both pipes are serviced on their own threads so that a program
        // which stops reading (or floods its stderr) can neither block us
        // nor escape the timeout.
        let writer = child.stdin.take().map(|mut stdin| {
            thread::spawn(move || -> io::Result<()> {
                stdin.write_all(&data)?;
                stdin.flush()
            })
        });
        let stderr = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut kept = Vec::new();
                let _ = (&mut stderr).take(MAX_STDERR).read_to_end(&mut kept);
                let _ = io::copy(&mut stderr, &mut io::sink());
                kept
            })
        });

        let status = self
            .wait(&mut child)
            .map_err(|e| format!("failed to wait for sendmail: {}", e))?;

        // On timeout the pipe threads are left to finish on their own, since
        // orphaned grandchildren of the program may still hold the pipes.
        let status = match status {
            Some(status) => status,
            None => {
                return Err(format!(
                    "killed after exceeding the timeout of {}s",
                    self.timeout.map_or(0, |t| t.as_secs()),
                ))
            },
        };

        if !status.success() {
            let stderr = stderr
                .and_then(|t| t.join().ok())
                .map(|b| String::from_utf8_lossy(&b).trim().to_owned())
                .unwrap_or_default();
            let mut cause = describe_status(status);
            if !stderr.is_empty() {
                cause.push_str(": ");
                cause.push_str(&stderr);
            }
            return Err(cause);
        }

        match writer.map(thread::JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(format!("failed to write message: {}", e)),
            Some(Err(_)) => Err("message writer panicked".to_owned()),
        }
    }

    /// Waits for `child` to exit.
    ///
    /// Returns `None` if the timeout elapsed first, in which case the child
    /// has been killed and reaped.
    fn wait(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let deadline = match self.timeout {
            None => return child.wait().map(Some),
            Some(timeout) => Instant::now() + timeout,
        };

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }

            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl DeliveryMethod for Sendmail {
    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Sendmail
    }

    fn settings(&self) -> &Settings {
        &self.settings
    }

    fn deliver<'a>(&self, message: &'a Message) -> Result<&'a Message, Error> {
        let log_prefix = LogPrefix::new("delivery:sendmail".to_owned())
            .with_message_id(message.message_id());
        let args = self.arguments_for(message);
        debug!(
            "{} Running {} {}",
            log_prefix,
            self.location.display(),
            self.command_line(message)
        );

        match self.run(&args, message.to_lf()) {
            Ok(()) => {
                self.deliveries.record(message);
                info!(
                    "{} Handed message to {} for {} destination(s)",
                    log_prefix,
                    self.location.display(),
                    message.destinations().len()
                );
                Ok(message)
            },
            Err(cause) => {
                warn!("{} Delivery failed: {}", log_prefix, cause);
                Err(failure(DeliveryKind::Sendmail, &self.settings, cause))
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn message() -> Message {
        Message::builder()
            .from("bob@x.com")
            .to("a@x.com")
            .cc("b@x.com")
            .subject("hello")
            .body("first line\nsecond line\n")
            .build()
    }

    #[test]
    fn argument_construction() {
        let sendmail =
            Sendmail::new(&Settings::new(), Deliveries::new()).unwrap();
        assert_eq!(
            "-i -t a@x.com b@x.com",
            sendmail.command_line(&message())
        );
        assert_eq!(
            vec!["-i", "-t", "a@x.com", "b@x.com"],
            sendmail.arguments_for(&message())
        );

        let mut with_return_path = message();
        with_return_path.set_header("Return-Path", "<bounces@x.com>");
        assert_eq!(
            "-i -t -f \"bounces@x.com\" a@x.com b@x.com",
            sendmail.command_line(&with_return_path)
        );
        assert_eq!(
            vec!["-i", "-t", "-f", "bounces@x.com", "a@x.com", "b@x.com"],
            sendmail.arguments_for(&with_return_path)
        );
    }

    #[test]
    fn empty_arguments() {
        let sendmail =
            Sendmail::new(&settings! { "arguments" => "" }, Deliveries::new())
                .unwrap();
        assert_eq!("a@x.com b@x.com", sendmail.command_line(&message()));
        assert_eq!(
            vec!["a@x.com", "b@x.com"],
            sendmail.arguments_for(&message())
        );
    }

    #[test]
    fn quoted_arguments_stay_whole() {
        let sendmail = Sendmail::new(
            &settings! { "arguments" => "-i -F 'Mail Robot'" },
            Deliveries::new(),
        )
        .unwrap();
        assert_eq!(
            vec!["-i", "-F", "Mail Robot", "a@x.com", "b@x.com"],
            sendmail.arguments_for(&message())
        );
    }

    #[test]
    fn bad_settings_rejected() {
        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            Sendmail::new(
                &settings! { "arguments" => "-i 'unterminated" },
                Deliveries::new()
            )
        );
        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            Sendmail::new(&settings! { "timeout" => "soon" }, Deliveries::new())
        );
        assert_matches!(
            Err(Error::InvalidSetting { .. }),
            Sendmail::new(&settings! { "location" => 42 }, Deliveries::new())
        );
    }

    #[test]
    fn missing_program() {
        let deliveries = Deliveries::new();
        let sendmail = Sendmail::new(
            &settings! { "location" => "/nonexistent/mailbag/sendmail" },
            deliveries.clone(),
        )
        .unwrap();

        assert_matches!(
            Err(Error::DeliveryFailed {
                kind: DeliveryKind::Sendmail,
                ..
            }),
            sendmail.deliver(&message())
        );
        assert!(deliveries.is_empty());
    }

    #[cfg(unix)]
    mod fake_sendmail {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use tempfile::TempDir;

        use super::*;

        /// Writes a shell script standing in for sendmail into `dir`.
        ///
        /// The script stores its arguments (one per line) in `args` and its
        /// input in `input`, both in `dir`, then runs `tail`.
        fn install(dir: &Path, tail: &str) -> PathBuf {
            let script = dir.join("sendmail");
            fs::write(
                &script,
                format!(
                    "#!/bin/sh\n\
                     for arg in \"$@\"; do echo \"$arg\"; done > '{dir}/args'\n\
                     cat > '{dir}/input'\n\
                     {tail}\n",
                    dir = dir.display(),
                    tail = tail,
                ),
            )
            .unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
                .unwrap();
            script
        }

        fn sendmail_at(
            script: &Path,
            extra: Settings,
            deliveries: &Deliveries,
        ) -> Sendmail {
            Sendmail::new(
                &settings! { "location" => script.to_str().unwrap() }
                    .merged(&extra),
                deliveries.clone(),
            )
            .unwrap()
        }

        #[test]
        fn successful_delivery() {
            crate::init_test_log();

            let dir = TempDir::new().unwrap();
            let script = install(dir.path(), "exit 0");
            let deliveries = Deliveries::new();
            let sendmail = sendmail_at(&script, Settings::new(), &deliveries);

            let message = message();
            sendmail.deliver(&message).unwrap();

            assert_eq!(
                "-i\n-t\na@x.com\nb@x.com\n",
                fs::read_to_string(dir.path().join("args")).unwrap()
            );
            let input = fs::read_to_string(dir.path().join("input")).unwrap();
            assert!(!input.contains('\r'));
            assert!(input.contains("Subject: hello\n"));
            assert!(input.ends_with("first line\nsecond line\n"));

            assert_eq!(vec![message], deliveries.snapshot());
        }

        #[test]
        fn hostile_addresses_are_not_interpreted() {
            let dir = TempDir::new().unwrap();
            let script = install(dir.path(), "exit 0");
            let deliveries = Deliveries::new();
            let sendmail = sendmail_at(&script, Settings::new(), &deliveries);

            let canary = dir.path().join("canary");
            let hostile = format!("<x@y.com && touch {}>", canary.display());
            let message = Message::builder()
                .from("bob@x.com")
                .header("To", hostile)
                .build();
            sendmail.deliver(&message).unwrap();

            assert!(!canary.exists());
            let args = fs::read_to_string(dir.path().join("args")).unwrap();
            assert!(args.contains("touch"));
        }

        #[test]
        fn nonzero_exit_is_failure() {
            let dir = TempDir::new().unwrap();
            let script = install(dir.path(), "echo 'no such user' >&2; exit 67");
            let deliveries = Deliveries::new();
            let sendmail = sendmail_at(&script, Settings::new(), &deliveries);

            match sendmail.deliver(&message()) {
                Err(Error::DeliveryFailed { kind, cause, .. }) => {
                    assert_eq!(DeliveryKind::Sendmail, kind);
                    assert!(cause.contains("67"), "cause: {}", cause);
                    assert!(cause.contains("EX_NOUSER"), "cause: {}", cause);
                    assert!(cause.contains("no such user"), "cause: {}", cause);
                },
                r => panic!("Unexpected result: {:?}", r),
            }
            assert!(deliveries.is_empty());
        }

        #[test]
        fn timeout_kills_program() {
            let dir = TempDir::new().unwrap();
            let script = install(dir.path(), "exec sleep 30");
            let deliveries = Deliveries::new();
            let sendmail =
                sendmail_at(&script, settings! { "timeout" => 1 }, &deliveries);

            let start = Instant::now();
            match sendmail.deliver(&message()) {
                Err(Error::DeliveryFailed { cause, .. }) => {
                    assert!(cause.contains("timeout"), "cause: {}", cause);
                },
                r => panic!("Unexpected result: {:?}", r),
            }
            assert!(start.elapsed() < Duration::from_secs(20));
            assert!(deliveries.is_empty());
        }
    }
}
