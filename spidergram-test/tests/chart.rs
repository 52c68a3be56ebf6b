// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of spidergram.
//
// spidergram is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// spidergram is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with spidergram.  If not,
// see <http://www.gnu.org/licenses/>.

//! # The `/chart` Integration Tests
//!
//! End-to-end exercises of the chart endpoint: the legacy wire contract (statuses, messages,
//! headers), the cache's observable behavior (idempotence, literal keying, expiry) & the
//! normalizer's output as seen by the renderer.

use std::{thread::sleep, time::Duration};

use libtest_mimic::{Arguments, Failed, Trial};

use common::Test;
use spidergram_test::spawn_service;

mod common;

/// A representative legacy URL's worth of parameters (note the `-1` placeholders-- they're data,
/// not sentinels)
const CHART_QUERY: &str =
    "cht=r&chs=225x225&chd=t:69.12,77,58,61.5,72|-1,-1,-1,-1,72&chxl=0:|note|mus|reg|ent|pab|jock";

fn get(url: &str) -> reqwest::blocking::Response {
    reqwest::blocking::get(url).expect("GET failed")
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            the tests                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// Repeating an identical query within the TTL returns byte-identical output, & the second response
// comes from cache (one render, two responses).
fn cache_idempotence() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    let url = format!("{}/chart?{}", service.url, CHART_QUERY);

    let first = get(&url);
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["content-type"], "image/png");
    assert_eq!(first.headers()["cache-control"], "public, max-age=3600");
    let content_length = first.headers()["content-length"].clone();
    let first_body = first.bytes().expect("reading the first body");
    assert!(!first_body.is_empty());
    assert_eq!(content_length, first_body.len().to_string().as_str());

    let second = get(&url);
    assert_eq!(second.status(), 200);
    assert_eq!(second.headers()["content-type"], "image/png");
    assert_eq!(second.headers()["cache-control"], "public, max-age=3600");
    let second_body = second.bytes().expect("reading the second body");

    assert_eq!(first_body, second_body);
    assert_eq!(service.renderer.renders(), 1);
    Ok(())
}

inventory::submit! { Test { name: "cache_idempotence", test_fn: cache_idempotence } }

// The cache keys on the *literal* query string: the same parameters in a different order are a
// different entry. Documented behavior, not a bug.
fn literal_cache_keys() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    get(&format!(
        "{}/chart?cht=r&chs=10x10&chd=t:50,60,70&chxl=0:|n|a|b|c",
        service.url
    ));
    get(&format!(
        "{}/chart?chs=10x10&cht=r&chd=t:50,60,70&chxl=0:|n|a|b|c",
        service.url
    ));
    assert_eq!(service.renderer.renders(), 2);
    Ok(())
}

inventory::submit! { Test { name: "literal_cache_keys", test_fn: literal_cache_keys } }

// Entries past their TTL read as misses, sweeper or no sweeper.
fn expired_entries_miss() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_millis(50));
    let url = format!("{}/chart?{}", service.url, CHART_QUERY);
    get(&url);
    sleep(Duration::from_millis(150));
    get(&url);
    assert_eq!(service.renderer.renders(), 2);
    Ok(())
}

inventory::submit! { Test { name: "expired_entries_miss", test_fn: expired_entries_miss } }

// With exactly two series, the second's first point is overwritten with its last; the note is the
// first point of the first series, truncated.
fn mirrors_second_series() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    get(&format!(
        "{}/chart?cht=r&chs=225x225&chd=t:10,20,30|5,-1,15&chxl=0:|n|a|b|c",
        service.url
    ));
    let (chart, note) = service.renderer.last().expect("the renderer was never invoked");
    assert_eq!(
        chart.series(),
        &[vec![10.0, 20.0, 30.0], vec![15.0, -1.0, 15.0]]
    );
    assert_eq!(note, 10);
    Ok(())
}

inventory::submit! { Test { name: "mirrors_second_series", test_fn: mirrors_second_series } }

// A third series is dropped entirely; the (new) second series is mirrored per the rule above.
fn caps_at_two_series() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    get(&format!(
        "{}/chart?cht=r&chs=225x225&chd=t:10,20,30|1,2,3|4,5,6&chxl=0:|n|a|b|c",
        service.url
    ));
    let (chart, note) = service.renderer.last().expect("the renderer was never invoked");
    assert_eq!(
        chart.series(),
        &[vec![10.0, 20.0, 30.0], vec![3.0, 2.0, 3.0]]
    );
    assert_eq!(note, 10);
    Ok(())
}

inventory::submit! { Test { name: "caps_at_two_series", test_fn: caps_at_two_series } }

// The note truncates toward zero (69.12 -> 69); it does not round.
fn truncates_the_note() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    get(&format!("{}/chart?{}", service.url, CHART_QUERY));
    let (_chart, note) = service.renderer.last().expect("the renderer was never invoked");
    assert_eq!(note, 69);
    Ok(())
}

inventory::submit! { Test { name: "truncates_the_note", test_fn: truncates_the_note } }

// The legacy wire contract: each malformed parameter produces 400 & its exact plain-text message.
fn validation_messages() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    let table: &[(&str, u16, &str)] = &[
        ("cht=bar&chs=1x1&chd=t:1&chxl=0:|a|b", 400, "Unsupported chart type"),
        // An absent chart type is just as unsupported:
        ("chs=1x1&chd=t:1&chxl=0:|a|b", 400, "Unsupported chart type"),
        ("cht=r&chs=225&chd=t:1&chxl=0:|a|b", 400, "Invalid chart size"),
        ("cht=r&chs=abcx225&chd=t:1&chxl=0:|a|b", 400, "Invalid chart width"),
        ("cht=r&chs=225xabc&chd=t:1&chxl=0:|a|b", 400, "Invalid chart height"),
        ("cht=r&chs=225x225&chd=t:1,x,3&chxl=0:|a|b", 400, "Invalid data point"),
        ("cht=r&chs=225x225&chd=t:1&chxl=a|b", 400, "Invalid axis labels"),
        ("cht=r&chs=225x225&chd=t:&chxl=0:|a|b", 400, "No data points provided"),
    ];
    for &(query, status, msg) in table {
        let rsp = get(&format!("{}/chart?{}", service.url, query));
        assert_eq!(rsp.status(), status, "for query {:?}", query);
        assert_eq!(rsp.text().expect("reading the body"), msg, "for query {:?}", query);
    }
    // Nothing above should have reached the renderer:
    assert_eq!(service.renderer.renders(), 0);
    Ok(())
}

inventory::submit! { Test { name: "validation_messages", test_fn: validation_messages } }

// A failed render is a 500 with the generic message; it is not cached, & the service keeps
// serving (the legacy implementation would terminate the process here).
fn render_failure_is_recoverable() -> Result<(), Failed> {
    let service = spawn_service(Duration::from_secs(300));
    let url = format!("{}/chart?{}", service.url, CHART_QUERY);

    service.renderer.fail_renders(true);
    let rsp = get(&url);
    assert_eq!(rsp.status(), 500);
    assert_eq!(rsp.text().expect("reading the body"), "Failed to generate chart");

    service.renderer.fail_renders(false);
    let rsp = get(&url);
    assert_eq!(rsp.status(), 200);
    assert_eq!(service.renderer.renders(), 1);
    Ok(())
}

inventory::submit! { Test { name: "render_failure_is_recoverable", test_fn: render_failure_is_recoverable } }

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the harness                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn main() {
    let args = Arguments::from_args();
    let trials = inventory::iter::<Test>
        .into_iter()
        .map(|test| Trial::test(test.name, move || (test.test_fn)()))
        .collect();
    libtest_mimic::run(&args, trials).exit();
}
