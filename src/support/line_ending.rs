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

//! Line ending normalisation.
//!
//! Messages are rendered with canonical CRLF line endings. Local transports
//! such as sendmail expect UNIX line endings instead, so the rendering is
//! converted on the way out. Bare CR characters are treated as line endings
//! as well, since that is how everything downstream will interpret them
//! anyway.

/// Convert every line ending (`\r\n`, bare `\r` or `\n`) in `src` to `\n`.
pub fn to_lf(src: &[u8]) -> Vec<u8> {
    let mut dst = Vec::with_capacity(src.len());
    let mut start = 0;
    for ix in memchr::memchr_iter(b'\r', src) {
        dst.extend_from_slice(&src[start..ix]);
        dst.push(b'\n');
        start = ix + 1;
        // Swallow the LF of a CRLF pair since we already emitted one
        if Some(&b'\n') == src.get(start) {
            start += 1;
        }
    }
    dst.extend_from_slice(&src[start..]);
    dst
}

/// Convert every line ending (`\r\n`, bare `\r` or `\n`) in `src` to `\r\n`.
pub fn to_crlf(src: &[u8]) -> Vec<u8> {
    let lf = to_lf(src);
    let mut dst = Vec::with_capacity(lf.len() + lf.len() / 16);
    let mut start = 0;
    for ix in memchr::memchr_iter(b'\n', &lf) {
        dst.extend_from_slice(&lf[start..ix]);
        dst.extend_from_slice(b"\r\n");
        start = ix + 1;
    }
    dst.extend_from_slice(&lf[start..]);
    dst
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn lf_conversion() {
        assert_eq!(b"a\nb\n".to_vec(), to_lf(b"a\r\nb\r\n"));
        assert_eq!(b"a\nb\n".to_vec(), to_lf(b"a\nb\n"));
        assert_eq!(b"a\nb\nc".to_vec(), to_lf(b"a\rb\nc"));
        assert_eq!(b"a\n\nb".to_vec(), to_lf(b"a\r\n\r\nb"));
        assert_eq!(b"a\n\n".to_vec(), to_lf(b"a\n\r"));
        assert_eq!(b"".to_vec(), to_lf(b""));
    }

    #[test]
    fn crlf_conversion() {
        assert_eq!(b"a\r\nb\r\n".to_vec(), to_crlf(b"a\nb\n"));
        assert_eq!(b"a\r\nb\r\n".to_vec(), to_crlf(b"a\r\nb\r\n"));
        assert_eq!(b"a\r\n\r\nb".to_vec(), to_crlf(b"a\n\r\nb"));
        assert_eq!(b"no newline".to_vec(), to_crlf(b"no newline"));
    }

    proptest! {
        #[test]
        fn lf_output_has_no_carriage_returns(content in "[x\r\n]{0,64}") {
            let converted = to_lf(content.as_bytes());
            prop_assert!(!converted.contains(&b'\r'));
            prop_assert_eq!(converted.clone(), to_lf(&to_crlf(&converted)));
        }
    }
}
