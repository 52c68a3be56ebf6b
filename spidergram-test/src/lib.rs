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

//! # The spidergram Integration Tests
//!
//! # Introduction
//!
//! The Rust unit & integration testing framework is really oriented toward testing *libraries*,
//! not programs: there's no notion of test fixtures, nor even of simple setup & teardown
//! operations that apply to multiple tests. As elsewhere, I've chosen to change-out the default
//! test harness: in Cargo.toml, the `chart` integration test opts out of `libharness` &
//! [libtest-mimic] presents a compliant test program in its place, with tests registered through
//! [inventory] (see `tests/common`).
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! Happily, spidergram needs no external infrastructure: its sole collaborator is the renderer,
//! and the whole point of half these tests is to replace that with a test double. Each test
//! therefore spins-up the complete service *in-process*-- real listener, real axum stack, stub
//! renderer-- via [spawn_service], & talks to it over the loopback like any other client.
//! [CountingRenderer] counts its invocations (this is the cache-hit observable that the service's
//! idempotence contract calls for) & records the last request it was handed, so that tests can
//! assert on the normalizer's output end-to-end.

use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use spidergram::{
    cache::ImageCache,
    chart::make_router,
    metrics::Instruments,
    query::ChartRequest,
    render::{self, Renderer},
    spidergram::Spidergram,
};

/// A test double for the rendering collaborator
///
/// Renders are counted (successes only) & the last request recorded. The payload is a
/// deterministic function of the request, so identical requests produce byte-identical
/// "images"-- just like the real thing, only legible in assertion failures.
pub struct CountingRenderer {
    renders: AtomicUsize,
    fail: AtomicBool,
    last: Mutex<Option<(ChartRequest, i64)>>,
}

impl CountingRenderer {
    fn new() -> CountingRenderer {
        CountingRenderer {
            renders: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }
    /// The number of successful renders so far
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
    /// Make subsequent renders fail (or succeed again)
    pub fn fail_renders(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
    /// The most recent (request, note) pair handed to the renderer
    pub fn last(&self) -> Option<(ChartRequest, i64)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for CountingRenderer {
    async fn render(&self, chart: ChartRequest, note: i64) -> render::Result<Bytes> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(render::Error::Draw {
                what: "injected failure".to_string(),
            });
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        let payload = format!(
            "PNG|{}x{}|note={}|series={:?}",
            chart.width(),
            chart.height(),
            note,
            chart.series()
        );
        *self.last.lock().unwrap() = Some((chart, note));
        Ok(Bytes::from(payload))
    }
}

/// One in-process spidergram, listening on the loopback at an ephemeral port
pub struct TestService {
    pub url: String,
    pub renderer: Arc<CountingRenderer>,
}

/// Spin-up the service & detach it
///
/// The listener is bound before this function returns, so callers may issue requests immediately
/// (early connections simply queue in the backlog). The server thread is deliberately leaked; it
/// lives until the test process exits.
pub fn spawn_service(time_to_live: Duration) -> TestService {
    let renderer = Arc::new(CountingRenderer::new());
    let registry = prometheus::Registry::new();
    let instruments = Arc::new(Instruments::new(&registry).expect("building the instruments"));
    let state = Arc::new(Spidergram {
        instance_id: Uuid::new_v4(),
        cache: Arc::new(ImageCache::new(time_to_live)),
        renderer: renderer.clone(),
        registry,
        instruments,
        max_age: 3600,
    });

    let listener = TcpListener::bind("127.0.0.1:0").expect("binding an ephemeral port");
    let addr = listener.local_addr().expect("resolving the bound address");
    listener
        .set_nonblocking(true)
        .expect("marking the listener non-blocking");

    std::thread::spawn(move || {
        tokio::runtime::Runtime::new()
            .expect("instantiating a Tokio runtime")
            .block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("adopting the listener");
                axum::serve(listener, make_router(state.clone()).with_state(state))
                    .await
                    .expect("serving");
            })
    });

    TestService {
        url: format!("http://{}", addr),
        renderer,
    }
}
