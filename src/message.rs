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

//! A deliberately small email message model.
//!
//! This is the boundary between the dispatch layer and the rest of an email
//! implementation. It knows enough about RFC 5322 to split header from body,
//! unfold headers, and pull bare addresses out of address fields, and renders
//! messages verbatim. It does no MIME processing and no header encoding.

use std::convert::Infallible;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::prelude::*;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::config::settings::Settings;
use crate::delivery::DeliveryKind;
use crate::support::{error::Error, line_ending};

lazy_static! {
    // RFC 5322 field-name is any printable ASCII other than ':'
    static ref RX_HEADER: Regex =
        Regex::new("^([!-9;-~]+):[ \t]*(.*)$").unwrap();
}

/// An email message: an ordered list of header fields plus a body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    headers: Vec<(String, String)>,
    body: String,
    delivery_override: Option<(DeliveryKind, Settings)>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a message field by field.
    pub fn builder() -> MessageBuilder {
        MessageBuilder {
            message: Self::new(),
        }
    }

    /// Creates a message from key/value pairs.
    ///
    /// Keys are case-insensitive and may use `_` in place of `-`, so
    /// `reply_to`, `Reply-To` and `REPLY-TO` are all the same field. The key
    /// `body` sets the body; every other key sets a header.
    pub fn from_fields<K, V>(
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut message = Self::new();
        for (key, value) in fields {
            let key = key.as_ref();
            if key.eq_ignore_ascii_case("body") {
                message.set_body(value);
            } else {
                message.set_header(&canonical_header_name(key), value);
            }
        }
        message
    }

    /// Reads and parses the message stored at `path`.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path)?;
        Ok(Self::parse_bytes(&data))
    }

    /// Parses raw RFC 5322 text.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn parse_bytes(data: &[u8]) -> Self {
        let normalised = line_ending::to_lf(data);
        let text = String::from_utf8_lossy(&normalised);

        let (head, body) = match text.find("\n\n") {
            Some(ix) => (&text[..ix], &text[ix + 2..]),
            None if text.starts_with('\n') => ("", &text[1..]),
            None => (&text[..], ""),
        };

        let mut message = Self::new();
        if head.is_empty() {
            message.body = body.to_owned();
            return message;
        }

        let mut lines = head.split('\n').peekable();
        // Text that doesn't start with a header is all body
        if !lines.peek().map_or(false, |l| RX_HEADER.is_match(l)) {
            message.body = text.to_string();
            return message;
        }

        for line in lines {
            if line.starts_with(' ') || line.starts_with('\t') {
                // Unfolding simply removes the line break
                if let Some(&mut (_, ref mut value)) = message.headers.last_mut()
                {
                    value.push_str(line);
                }
            } else if let Some(cap) = RX_HEADER.captures(line) {
                message.headers.push((
                    cap.get(1).unwrap().as_str().to_owned(),
                    cap.get(2).unwrap().as_str().trim_end().to_owned(),
                ));
            } else {
                debug!("Ignoring malformed header line {:?}", line);
            }
        }

        message.body = body.to_owned();
        message
    }

    /// The value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    /// All header fields, in order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers.iter().map(|&(ref n, ref v)| (n.as_str(), v.as_str()))
    }

    /// Sets the header `name`, replacing any existing fields of that name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter()
            .position(|&(ref n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(ix) => {
                self.headers[ix].1 = value;
                let mut ix = ix + 1;
                while ix < self.headers.len() {
                    if self.headers[ix].0.eq_ignore_ascii_case(name) {
                        self.headers.remove(ix);
                    } else {
                        ix += 1;
                    }
                }
            },
            None => self.headers.push((name.to_owned(), value)),
        }
    }

    /// Appends a header field without touching existing ones.
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_owned(), value.into()));
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = body.into();
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.header("Message-ID")
    }

    pub fn from_addrs(&self) -> Vec<String> {
        self.addresses("From")
    }

    pub fn to_addrs(&self) -> Vec<String> {
        self.addresses("To")
    }

    pub fn cc_addrs(&self) -> Vec<String> {
        self.addresses("Cc")
    }

    pub fn bcc_addrs(&self) -> Vec<String> {
        self.addresses("Bcc")
    }

    /// The bare address in the `Return-Path` header, if there is a non-empty
    /// one.
    pub fn return_path(&self) -> Option<String> {
        self.addresses("Return-Path").into_iter().next()
    }

    /// The bare address in the `Sender` header, if any.
    pub fn sender(&self) -> Option<String> {
        self.addresses("Sender").into_iter().next()
    }

    /// The address to use as the envelope sender: the return path, else the
    /// sender, else the first `From` address.
    pub fn envelope_from(&self) -> Option<String> {
        self.return_path()
            .or_else(|| self.sender())
            .or_else(|| self.from_addrs().into_iter().next())
    }

    /// Every recipient address (To, then Cc, then Bcc), display names
    /// stripped.
    pub fn destinations(&self) -> Vec<String> {
        let mut destinations = self.to_addrs();
        destinations.extend(self.cc_addrs());
        destinations.extend(self.bcc_addrs());
        destinations
    }

    /// Overrides the configured delivery method for this message only.
    pub fn set_delivery_method(
        &mut self,
        kind: &str,
        settings: Settings,
    ) -> Result<(), Error> {
        let kind = kind.parse::<DeliveryKind>()?;
        self.delivery_override = Some((kind, settings));
        Ok(())
    }

    pub fn delivery_override(&self) -> Option<(DeliveryKind, &Settings)> {
        self.delivery_override
            .as_ref()
            .map(|&(kind, ref settings)| (kind, settings))
    }

    /// Adds the `Message-ID` and `Date` fields a message needs before it is
    /// sent, if they are missing.
    pub fn ready_to_send(&mut self, domain: Option<&str>) {
        if self.message_id().is_none() {
            self.set_header(
                "Message-ID",
                crate::support::random_tag::message_id(domain),
            );
        }

        if self.header("Date").is_none() {
            self.set_header("Date", Utc::now().to_rfc2822());
        }
    }

    /// Renders the message in canonical form: CRLF line endings, `Bcc`
    /// omitted.
    pub fn encoded(&self) -> String {
        let mut out = String::new();
        for &(ref name, ref value) in &self.headers {
            if name.eq_ignore_ascii_case("Bcc") {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&line_ending::to_crlf(
            self.body.as_bytes(),
        )));
        out
    }

    /// The encoded message with UNIX line endings, as local transports
    /// expect.
    pub fn to_lf(&self) -> Vec<u8> {
        line_ending::to_lf(self.encoded().as_bytes())
    }

    fn addresses(&self, header: &str) -> Vec<String> {
        self.headers
            .iter()
            .filter(|&&(ref n, _)| n.eq_ignore_ascii_case(header))
            .flat_map(|&(_, ref v)| split_addresses(v))
            .collect()
    }
}

impl FromStr for Message {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Infallible> {
        Ok(Self::parse_bytes(s.as_bytes()))
    }
}

/// Builds a `Message` one field at a time.
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    message: Message,
}

macro_rules! header_setters {
    ($($method:ident => $header:expr),* $(,)?) => {
        $(
            pub fn $method(self, value: impl Into<String>) -> Self {
                self.header($header, value)
            }
        )*
    };
}

impl MessageBuilder {
    header_setters! {
        to => "To",
        cc => "Cc",
        bcc => "Bcc",
        from => "From",
        sender => "Sender",
        reply_to => "Reply-To",
        return_path => "Return-Path",
        subject => "Subject",
        message_id => "Message-ID",
    }

    pub fn date(self, date: DateTime<FixedOffset>) -> Self {
        self.header("Date", date.to_rfc2822())
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.message.set_header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.message.set_body(body);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

/// Converts `reply_to` style keys into `Reply-To` style header names.
fn canonical_header_name(key: &str) -> String {
    if key.eq_ignore_ascii_case("message_id")
        || key.eq_ignore_ascii_case("message-id")
    {
        return "Message-ID".to_owned();
    }

    key.split(|c| '_' == c || '-' == c)
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Extracts bare addresses from an address-list header value.
///
/// Display names, comments, source routes and group syntax are discarded;
/// only the addr-spec parts remain, in order.
pub fn split_addresses(value: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    // Text outside of comments and angle brackets
    let mut plain = String::new();
    // Content of the angle brackets of the current address, if any
    let mut angle = None::<String>;
    let mut in_angle = false;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut comment_depth = 0u32;

    for ch in value.chars() {
        if escaped {
            escaped = false;
        } else if in_quotes {
            match ch {
                '\\' => escaped = true,
                '"' => in_quotes = false,
                _ => (),
            }
        } else if comment_depth > 0 {
            match ch {
                '(' => comment_depth += 1,
                ')' => comment_depth -= 1,
                _ => (),
            }
            continue;
        } else {
            match ch {
                '"' => in_quotes = true,
                '(' => {
                    comment_depth = 1;
                    continue;
                },
                '<' if !in_angle => {
                    in_angle = true;
                    angle = Some(String::new());
                    continue;
                },
                '>' if in_angle => {
                    in_angle = false;
                    continue;
                },
                ',' | ';' if !in_angle => {
                    push_address(&mut addresses, &mut plain, &mut angle);
                    continue;
                },
                _ => (),
            }
        }

        match (in_angle, angle.as_mut()) {
            (true, Some(a)) => a.push(ch),
            _ => plain.push(ch),
        }
    }
    push_address(&mut addresses, &mut plain, &mut angle);

    addresses
}

fn push_address(
    addresses: &mut Vec<String>,
    plain: &mut String,
    angle: &mut Option<String>,
) {
    let plain = std::mem::take(plain);
    let addr = match angle.take() {
        // Obsolete source routes: <@a.com,@b.com:user@c.com>
        Some(ref a) if a.starts_with('@') => {
            a.rsplit(':').next().unwrap_or("").to_owned()
        },
        Some(a) => a,
        None => strip_group_name(&plain).to_owned(),
    };

    let addr = addr.trim();
    if !addr.is_empty() {
        addresses.push(addr.to_owned());
    }
}

/// Strips a leading `group-name:` from `s`.
fn strip_group_name(s: &str) -> &str {
    let mut in_quotes = false;
    let mut start = 0;
    for (ix, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => start = ix + 1,
            _ => (),
        }
    }
    &s[start..]
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let message = Message::builder()
            .to("mikel@test.lindsaar.net")
            .from("bob@test.lindsaar.net")
            .subject("This is an email")
            .body("This is the body")
            .build();

        assert_eq!(vec!["mikel@test.lindsaar.net"], message.to_addrs());
        assert_eq!(vec!["bob@test.lindsaar.net"], message.from_addrs());
        assert_eq!(Some("This is an email"), message.subject());
        assert_eq!("This is the body", message.body());
    }

    #[test]
    fn string_hash_and_builder_agree() {
        let from_string: Message = "To: mikel@test.lindsaar.net\r\n\
             From: bob@test.lindsaar.net\r\n\
             Subject: This is an email\r\n\
             \r\n\
             This is the body"
            .parse()
            .unwrap();
        let from_fields = Message::from_fields(vec![
            ("to", "mikel@test.lindsaar.net"),
            ("FROM", "bob@test.lindsaar.net"),
            ("subject", "This is an email"),
            ("body", "This is the body"),
        ]);
        let from_builder = Message::builder()
            .to("mikel@test.lindsaar.net")
            .from("bob@test.lindsaar.net")
            .subject("This is an email")
            .body("This is the body")
            .build();

        assert_eq!(from_builder, from_string);
        assert_eq!(from_builder, from_fields);
    }

    #[test]
    fn parse_unfolds_headers() {
        let message: Message = "Subject: a very\n long subject\n\
                                X-Thing:\tvalue  \n\nbody\nmore body\n"
            .parse()
            .unwrap();
        assert_eq!(Some("a very long subject"), message.subject());
        assert_eq!(Some("value"), message.header("x-thing"));
        assert_eq!("body\nmore body\n", message.body());
    }

    #[test]
    fn parse_without_headers_is_all_body() {
        let message: Message = "just some text\nhere".parse().unwrap();
        assert_eq!(0, message.headers().count());
        assert_eq!("just some text\nhere", message.body());

        let message: Message = "\nbody".parse().unwrap();
        assert_eq!(0, message.headers().count());
        assert_eq!("body", message.body());
    }

    #[test]
    fn parse_without_body() {
        let message: Message = "To: a@b.com\r\nSubject: hi".parse().unwrap();
        assert_eq!(vec!["a@b.com"], message.to_addrs());
        assert_eq!(Some("hi"), message.subject());
        assert_eq!("", message.body());
    }

    #[test]
    fn from_fields_canonicalises_names() {
        let message = Message::from_fields(vec![
            ("reply_to", "r@example.com"),
            ("message_id", "<abc@example.com>"),
            ("return-path", "bounce@example.com"),
        ]);
        let names = message.headers().map(|(n, _)| n).collect::<Vec<_>>();
        assert_eq!(vec!["Reply-To", "Message-ID", "Return-Path"], names);
    }

    #[test]
    fn set_header_replaces_all_instances() {
        let mut message: Message =
            "To: a@b.com\nX-A: 1\nto: c@d.com\n\n".parse().unwrap();
        message.set_header("TO", "e@f.com");
        assert_eq!(vec!["e@f.com"], message.to_addrs());
        assert_eq!(2, message.headers().count());

        message.add_header("To", "g@h.com");
        assert_eq!(vec!["e@f.com", "g@h.com"], message.to_addrs());
    }

    #[test]
    fn address_extraction() {
        assert_eq!(
            vec!["a@x.com", "b@x.com", "c@x.com"],
            split_addresses(
                "\"Smith, Alice\" <a@x.com>, b@x.com (Bob), Carol <c@x.com>"
            )
        );
        assert_eq!(
            vec!["a@x.com", "b@x.com"],
            split_addresses("Friends: a@x.com, <b@x.com>;")
        );
        assert_eq!(Vec::<String>::new(), split_addresses("undisclosed:;"));
        assert_eq!(Vec::<String>::new(), split_addresses("<>"));
        assert_eq!(
            vec!["\"odd,local\"@x.com"],
            split_addresses("\"odd,local\"@x.com")
        );
    }

    #[test]
    fn destinations_and_envelope() {
        let message = Message::builder()
            .to("A <a@x.com>, b@x.com")
            .cc("c@x.com")
            .bcc("d@x.com")
            .from("Ed <e@x.com>")
            .build();
        assert_eq!(
            vec!["a@x.com", "b@x.com", "c@x.com", "d@x.com"],
            message.destinations()
        );
        assert_eq!(None, message.return_path());
        assert_eq!(Some("e@x.com".to_owned()), message.envelope_from());

        let message = Message::builder()
            .from("e@x.com")
            .sender("s@x.com")
            .build();
        assert_eq!(Some("s@x.com".to_owned()), message.envelope_from());

        let message = Message::builder()
            .from("e@x.com")
            .return_path("<bounce@x.com>")
            .build();
        assert_eq!(Some("bounce@x.com".to_owned()), message.return_path());
        assert_eq!(Some("bounce@x.com".to_owned()), message.envelope_from());
    }

    #[test]
    fn empty_return_path_is_none() {
        let message = Message::builder().return_path("<>").build();
        assert_eq!(None, message.return_path());
        let message = Message::builder().return_path("").build();
        assert_eq!(None, message.return_path());
    }

    #[test]
    fn encoding() {
        let message = Message::builder()
            .to("a@x.com")
            .bcc("secret@x.com")
            .subject("hi")
            .body("line one\nline two\n")
            .build();
        assert_eq!(
            "To: a@x.com\r\nSubject: hi\r\n\r\nline one\r\nline two\r\n",
            message.encoded()
        );
        assert_eq!(
            b"To: a@x.com\nSubject: hi\n\nline one\nline two\n".to_vec(),
            message.to_lf()
        );
    }

    #[test]
    fn ready_to_send_fills_missing_fields() {
        let mut message = Message::builder().to("a@x.com").build();
        message.ready_to_send(Some("example.com"));
        let id = message.message_id().unwrap().to_owned();
        assert!(id.ends_with("@example.com.mail>"));
        assert!(message.header("Date").is_some());

        message.ready_to_send(Some("example.com"));
        assert_eq!(Some(&*id), message.message_id());
    }

    #[test]
    fn per_message_delivery_override() {
        let mut message = Message::new();
        assert!(message.delivery_override().is_none());

        message
            .set_delivery_method("sendmail", settings! { "location" => "/x" })
            .unwrap();
        let (kind, settings) = message.delivery_override().unwrap();
        assert_eq!(DeliveryKind::Sendmail, kind);
        assert_eq!(Some("/x"), settings.str("location").unwrap());

        assert_matches!(
            Err(Error::UnknownBackendKind { .. }),
            message.set_delivery_method("carrier_pigeon", Settings::new())
        );
        // The failed call leaves the previous override in place
        assert_eq!(
            Some(DeliveryKind::Sendmail),
            message.delivery_override().map(|(k, _)| k)
        );
    }

    #[test]
    fn read_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("email.eml");
        fs::write(&path, "From: a@x.com\r\nTo: b@x.com\r\n\r\nHello\r\n")
            .unwrap();

        let message = Message::read(&path).unwrap();
        assert_eq!(vec!["b@x.com"], message.to_addrs());
        assert_eq!("Hello\n", message.body());

        assert_matches!(
            Err(Error::Io(_)),
            Message::read(dir.path().join("missing.eml"))
        );
    }
}
