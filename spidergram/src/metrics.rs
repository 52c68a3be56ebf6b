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

//! # spidergram metrics
//!
//! # Introduction
//!
//! spidergram counts things with [prometheus] instruments & serves them up at `/metrics`. The
//! instruments themselves are designed for re-use, which begs the question of where to keep them.
//! I'd prefer not to litter the application state type with a field per counter, nor to maintain
//! an inconvenient centralized list of metric names somewhere far from their use sites.
//!
//! [prometheus]: https://docs.rs/prometheus/latest/prometheus/index.html
//!
//! This module instead uses David Tolnay's [inventory] crate: each use site registers its metric
//! name & sort right where the metric is incremented:
//!
//! ```ignore
//! inventory::submit! { metrics::Registration::new("chart_renders", "charts rendered", Sort::IntegralCounter) }
//! // ...
//! counter_add!(state.instruments, "chart_renders", 1);
//! ```
//!
//! [Instruments::new] walks the registrations, builds every instrument, and registers each with
//! the [prometheus::Registry] that backs the `/metrics` endpoint. Name clashes are caught at
//! construction time (i.e. at process startup), not at the first increment.
//!
//! One aspect of this design with which I'm uncomfortable is the use of `panic!` to indicate a
//! lookup of an unregistered name, or incorrect typing of an instrument (calling `counter_add!` on
//! a gauge, say). These are logic errors that would be compile-time errors under a richer type
//! system, and the convention seems to be to panic in these instances; still, a bad metric name in
//! a little-used code path is a ticking time bomb. Caveat scriptor.

use std::collections::{hash_map::Entry, HashMap};

use prometheus::{IntCounter, IntGauge};
use snafu::prelude::*;

/// Instrument type
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sort {
    /// Corresponds to [IntCounter]
    IntegralCounter,
    /// Corresponds to [IntGauge]
    IntegralGauge,
    // more later?
}

/// The type of thing being inventoried
///
/// Register a metric by name, help text & sort using
///
/// ```ignore
/// inventory::submit! { metrics::Registration::new("cache_swept", "entries swept", Sort::IntegralCounter) }
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Registration {
    name: &'static str,
    help: &'static str,
    sort: Sort,
}

impl Registration {
    pub const fn new(name: &'static str, help: &'static str, sort: Sort) -> Registration {
        Registration { name, help, sort }
    }
    pub fn name(&self) -> String {
        self.name.to_string()
    }
    pub fn help(&self) -> String {
        self.help.to_string()
    }
    pub fn sort(&self) -> Sort {
        self.sort
    }
}

inventory::collect!(Registration);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to build instrument {name}: {source}"))]
    Build {
        name: String,
        source: prometheus::Error,
    },
    #[snafu(display("Failed to register instrument {name}: {source}"))]
    Register {
        name: String,
        source: prometheus::Error,
    },
}

type Result<T> = std::result::Result<T, Error>;

enum Instrument {
    Counter(IntCounter),
    Gauge(IntGauge),
}

/// Container for all registered instruments
pub struct Instruments {
    map: HashMap<String, Instrument>,
}

impl Instruments {
    /// Build every inventoried instrument & register it with `registry`
    ///
    /// Invoke once, at startup; a second invocation against the same [prometheus::Registry] will
    /// fail with [Error::Register] (prometheus rejects duplicate metric names).
    pub fn new(registry: &prometheus::Registry) -> Result<Instruments> {
        let mut m: HashMap<String, Instrument> = HashMap::new();
        for reg in inventory::iter::<Registration> {
            let name = reg.name();
            match m.entry(reg.name()) {
                Entry::Occupied(_occupied_entry) => {
                    panic!("The metric name {} was used twice", name)
                }
                Entry::Vacant(vacant_entry) => {
                    let instrument = match reg.sort() {
                        Sort::IntegralCounter => {
                            let counter = IntCounter::new(reg.name(), reg.help())
                                .context(BuildSnafu { name: &name })?;
                            registry
                                .register(Box::new(counter.clone()))
                                .context(RegisterSnafu { name: &name })?;
                            Instrument::Counter(counter)
                        }
                        Sort::IntegralGauge => {
                            let gauge = IntGauge::new(reg.name(), reg.help())
                                .context(BuildSnafu { name: &name })?;
                            registry
                                .register(Box::new(gauge.clone()))
                                .context(RegisterSnafu { name: &name })?;
                            Instrument::Gauge(gauge)
                        }
                    };
                    vacant_entry.insert(instrument);
                }
            }
        }
        Ok(Instruments { map: m })
    }
    // panics if `name` doesn't name a counter
    pub fn add(&self, name: &str, count: u64) {
        if let Some(Instrument::Counter(c)) = self.map.get(name) {
            c.inc_by(count);
        } else {
            panic!("{} does not name a counter", name);
        }
    }
    // panics if `name` doesn't name a gauge
    pub fn set(&self, name: &str, value: u64) {
        if let Some(Instrument::Gauge(g)) = self.map.get(name) {
            g.set(value as i64);
        } else {
            panic!("{} does not name a gauge", name);
        }
    }
}

#[macro_export]
macro_rules! counter_add {
    ($instr:expr, $name:expr, $count:expr) => {
        $instr.add($name, $count);
    };
}

#[macro_export]
macro_rules! gauge_set {
    ($instr:expr, $name:expr, $value:expr) => {
        $instr.set($name, $value);
    };
}
