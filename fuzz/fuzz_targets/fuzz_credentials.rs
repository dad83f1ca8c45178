//! Fuzz target for `Authorization` header parsing.
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_credentials -- -max_total_time=60
//! ```
//!
//! Checks that `parse_credential` never panics and that any token it accepts
//! is non-empty, free of whitespace and a substring of the header.

#![no_main]

use arbitrary::Arbitrary;
use gatehouse::middleware::{CidrRange, parse_credential};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    header: Option<&'a str>,
    scheme: &'a str,
    cidr: &'a str,
}

fuzz_target!(|input: Input<'_>| {
    if let Ok(token) = parse_credential(input.header, input.scheme) {
        assert!(!token.is_empty());
        assert!(!token.contains(char::is_whitespace));
        assert!(input.header.is_some_and(|h| h.contains(token)));
    }

    // Trusted proxy parsing sees raw operator input too
    if let Some(range) = CidrRange::parse(input.cidr) {
        assert!(range.prefix_len() <= 128);
    }
});
