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

use std::sync::Arc;

use uuid::Uuid;

use crate::{cache::ImageCache, metrics::Instruments, render::Renderer};

/// Application state available to all handlers
///
/// The legacy service kept its cache & theme in mutable globals; everything here is constructed
/// once at startup & injected into the handlers behind an [Arc].
pub struct Spidergram {
    pub instance_id: Uuid,
    pub cache: Arc<ImageCache>,
    pub renderer: Arc<dyn Renderer + Send + Sync>,
    pub registry: prometheus::Registry,
    pub instruments: Arc<Instruments>,
    /// `max-age` advertised in `Cache-Control` on image responses
    pub max_age: u32,
}
