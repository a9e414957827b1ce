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

//! Parsing of mbox envelope lines (RFC 4155), e.g.
//!
//! ```text
//! From mikel@test.lindsaar.net Mon Aug 17 00:39:21 2009
//! ```
//!
//! The line is the literal `From `, the sender's addr-spec, a space, and the
//! UTC receipt time in UNIX `ctime` format without a zone.

use std::fmt;
use std::str;

use chrono::prelude::*;
use nom::*;

use crate::support::error::Error;

fn ascii_digit(b: u8) -> bool {
    b >= b'0' && b <= b'9'
}

fn parse_digits(s: &[u8]) -> u32 {
    // Only called on 1 to 4 ASCII digits, so this cannot overflow
    s.iter().fold(0, |n, &d| n * 10 + u32::from(d - b'0'))
}

fn lossy(parts: &[&[u8]]) -> Vec<String> {
    parts
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect()
}

// RFC 2822 3.2.4 "Atom text", amended by RFC 6532 to include all non-ASCII
// characters
fn is_atext(ch: u8) -> bool {
    ch.is_ascii_alphanumeric()
        || b"!#$%&'*+-/=?^_`{|}~".contains(&ch)
        || ch >= 0x80
}

named!(atext, take_while1!(is_atext));
named!(quoted_pair, preceded!(char!('\\'), take!(1)));
named!(qtext, is_not!("\\\"\r\n"));
// The quotes are kept: the sender is reported verbatim
named!(
    quoted_string,
    recognize!(delimited!(
        char!('"'),
        many0_count!(alt!(qtext | quoted_pair)),
        char!('"')
    ))
);
named!(word, alt!(atext | quoted_string));

// Formally `dot-atom / quoted-string / obs-local-part`; `obs-local-part` is
// `word *("." word)` which covers the other two.
named!(
    local_part<Vec<&[u8]>>,
    separated_nonempty_list!(char!('.'), word)
);

named!(dtext, is_not!("[]\\ \t\r\n"));
named!(
    domain_literal,
    recognize!(delimited!(
        char!('['),
        many0_count!(alt!(dtext | quoted_pair)),
        char!(']')
    ))
);

fn is_label_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || b'-' == ch || ch >= 0x80
}

// A host name label: no leading or trailing hyphen
fn domain_label(i: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, label) = take_while1!(i, is_label_char)?;
    if label.starts_with(b"-") || label.ends_with(b"-") {
        Err(nom::Err::Error((i, nom::error::ErrorKind::Verify)))
    } else {
        Ok((rest, label))
    }
}

named!(
    domain<Vec<&[u8]>>,
    alt!(
        separated_nonempty_list!(char!('.'), domain_label)
            | map!(domain_literal, |d| vec![d])
    )
);

named!(
    addr_spec<AddressTree>,
    do_parse!(
        local_part: local_part
            >> char!('@')
            >> domain: domain
            >> (AddressTree {
                local_part: lossy(&local_part),
                domain: lossy(&domain),
            })
    )
);

/// `addr_spec`, also returning the exact text it matched.
fn sender(i: &[u8]) -> IResult<&[u8], (&[u8], AddressTree)> {
    let (rest, tree) = addr_spec(i)?;
    Ok((rest, (&i[..i.len() - rest.len()], tree)))
}

named!(
    weekday<Weekday>,
    alt!(
        map!(tag_no_case!("mon"), |_| Weekday::Mon)
            | map!(tag_no_case!("tue"), |_| Weekday::Tue)
            | map!(tag_no_case!("wed"), |_| Weekday::Wed)
            | map!(tag_no_case!("thu"), |_| Weekday::Thu)
            | map!(tag_no_case!("fri"), |_| Weekday::Fri)
            | map!(tag_no_case!("sat"), |_| Weekday::Sat)
            | map!(tag_no_case!("sun"), |_| Weekday::Sun)
    )
);

named!(
    month<u32>,
    alt!(
        map!(tag_no_case!("jan"), |_| 1)
            | map!(tag_no_case!("feb"), |_| 2)
            | map!(tag_no_case!("mar"), |_| 3)
            | map!(tag_no_case!("apr"), |_| 4)
            | map!(tag_no_case!("may"), |_| 5)
            | map!(tag_no_case!("jun"), |_| 6)
            | map!(tag_no_case!("jul"), |_| 7)
            | map!(tag_no_case!("aug"), |_| 8)
            | map!(tag_no_case!("sep"), |_| 9)
            | map!(tag_no_case!("oct"), |_| 10)
            | map!(tag_no_case!("nov"), |_| 11)
            | map!(tag_no_case!("dec"), |_| 12)
    )
);

// ctime pads a single-digit day with a space; some writers don't pad at all
named!(
    day<u32>,
    map!(
        alt!(
            preceded!(char!(' '), take_while_m_n!(1, 1, ascii_digit))
                | take_while_m_n!(1, 2, ascii_digit)
        ),
        parse_digits
    )
);

named!(
    two_digit<u32>,
    map!(take_while_m_n!(2, 2, ascii_digit), parse_digits)
);

named!(
    year<i32>,
    map!(take_while_m_n!(4, 4, ascii_digit), |s| parse_digits(s) as i32)
);

named!(
    ctime<CtimeTree>,
    do_parse!(
        weekday: weekday
            >> char!(' ')
            >> month: month
            >> char!(' ')
            >> day: day
            >> char!(' ')
            >> hour: two_digit
            >> char!(':')
            >> minute: two_digit
            >> char!(':')
            >> second: two_digit
            >> char!(' ')
            >> year: year
            >> (CtimeTree {
                weekday,
                month,
                day,
                hour,
                minute,
                second,
                year,
            })
    )
);

named!(
    envelope_value<(&[u8], EnvelopeTree)>,
    do_parse!(
        sender: sender
            >> char!(' ')
            >> timestamp: ctime
            >> ((
                sender.0,
                EnvelopeTree {
                    address: sender.1,
                    timestamp,
                }
            ))
    )
);

named!(
    envelope_line<(&[u8], EnvelopeTree)>,
    preceded!(tag!("From "), envelope_value)
);

/// The parsed sender address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressTree {
    /// The dot-separated words of the local part. Quoted words keep their
    /// quotes and escapes.
    pub local_part: Vec<String>,
    /// The dot-separated labels of the domain, or a single element holding
    /// a bracketed domain literal.
    pub domain: Vec<String>,
}

/// The parsed timestamp fields, exactly as written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtimeTree {
    pub weekday: Weekday,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub year: i32,
}

impl CtimeTree {
    /// Converts to a UTC timestamp, or `None` if the fields don't name a
    /// real time (e.g. February 30th).
    ///
    /// The weekday is not checked against the date.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_opt(self.hour, self.minute, self.second))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvelopeTree {
    pub address: AddressTree,
    pub timestamp: CtimeTree,
}

/// A parsed mbox envelope line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    sender: String,
    date: DateTime<Utc>,
    tree: EnvelopeTree,
}

impl Envelope {
    /// Parses a full envelope line, including the leading `From `.
    ///
    /// A single trailing `\n` or `\r\n` is permitted.
    pub fn parse(line: &str) -> Result<Self, Error> {
        Self::parse_with(line, envelope_line)
    }

    /// Parses the value of an envelope line, i.e., the part after `From `.
    pub fn parse_value(value: &str) -> Result<Self, Error> {
        Self::parse_with(value, envelope_value)
    }

    fn parse_with(
        raw: &str,
        parser: fn(&[u8]) -> IResult<&[u8], (&[u8], EnvelopeTree)>,
    ) -> Result<Self, Error> {
        let malformed = || Error::MalformedEnvelope(raw.to_owned());
        let input = raw
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(raw);

        // The input is complete, so running out of it (`Incomplete`) is as
        // much a syntax error as anything else.
        match parser(input.as_bytes()) {
            Ok((rest, (sender, tree))) if rest.is_empty() => {
                let date = tree.timestamp.to_datetime().ok_or_else(malformed)?;
                Ok(Envelope {
                    sender: String::from_utf8_lossy(sender).into_owned(),
                    date,
                    tree,
                })
            },
            _ => Err(malformed()),
        }
    }

    /// The sender's address exactly as written.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    pub fn tree(&self) -> &EnvelopeTree {
        &self.tree
    }
}

impl fmt::Display for Envelope {
    /// Formats as a full envelope line without line ending.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "From {} {}",
            self.sender,
            self.date.format("%a %b %e %H:%M:%S %Y")
        )
    }
}

impl str::FromStr for Envelope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}
