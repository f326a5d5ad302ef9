/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use ferry_url::{FerryUrl, ImmutableOrigin};

#[test]
fn test_relative_worker_url_resolves_against_base() {
    let base = FerryUrl::parse("https://example.com/app/index.html").unwrap();
    let url = FerryUrl::parse_with_base(Some(&base), "workers/echo.js").unwrap();
    assert_eq!(url.as_str(), "https://example.com/app/workers/echo.js");
    assert!(url.origin().same_origin(&base.origin()));
}

#[test]
fn test_parse_failure_without_base() {
    assert!(FerryUrl::parse_with_base(None, "echo.js").is_err());
}

#[test]
fn test_tuple_origin_serialization() {
    let url = FerryUrl::parse("http://example.com:8000/worker.js").unwrap();
    let origin = url.origin();
    assert!(origin.is_tuple());
    assert_eq!(origin.scheme(), Some("http"));
    assert_eq!(origin.port(), Some(8000));
    assert_eq!(origin.ascii_serialization(), "http://example.com:8000");
}

#[test]
fn test_opaque_origins_are_only_equal_to_themselves() {
    let data = FerryUrl::parse("data:text/javascript,1").unwrap();
    let first = data.origin();
    let second = data.origin();
    assert!(!first.is_tuple());
    assert!(first.same_origin(&first.clone()));
    assert!(!first.same_origin(&second));
    assert_eq!(ImmutableOrigin::new_opaque().ascii_serialization(), "null");
}

#[test]
fn test_cross_origin_ports_differ() {
    let a = FerryUrl::parse("https://example.com/").unwrap();
    let b = FerryUrl::parse("https://example.com:444/").unwrap();
    assert!(!a.origin().same_origin(&b.origin()));
}

#[test]
fn test_fetch_schemes() {
    assert!(FerryUrl::parse("https://example.com/w.js").unwrap().is_fetch_scheme());
    assert!(FerryUrl::parse("data:,x").unwrap().is_fetch_scheme());
    assert!(!FerryUrl::parse("javascript:void(0)").unwrap().is_fetch_scheme());
}
