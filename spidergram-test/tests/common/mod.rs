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

use libtest_mimic::Failed;

/// One integration test, registered with the harness via inventory
///
/// Each test owns its fixture: it spawns a private in-process service (see
/// [spidergram_test::spawn_service]) so that render counters can't be perturbed by whatever the
/// harness happens to be running concurrently.
#[derive(Debug)]
pub struct Test {
    pub name: &'static str,
    pub test_fn: fn() -> Result<(), Failed>,
}

inventory::collect!(Test);
