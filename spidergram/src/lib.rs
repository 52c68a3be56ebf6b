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

//! # spidergram
//!
//! Radar charts over HTTP, the way the old chart-image services did it.
//!
//! A single endpoint, `GET /chart`, accepts the legacy query mini-language (`cht`, `chs`, `chd` &
//! `chxl`), renders a radar ("spider") chart as PNG, and caches the result in memory keyed by the
//! verbatim query string. The library crate has the same name as the binary (`spidergramd` lives
//! in `src/bin`), meaning that `rustdoc` will ignore the binary crate.
pub mod cache;
pub mod chart;
pub mod metrics;
pub mod query;
pub mod render;
pub mod spidergram;
