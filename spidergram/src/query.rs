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

//! # query
//!
//! Parsing the legacy chart-image query mini-language.
//!
//! # Introduction
//!
//! The old chart-image services crammed an entire chart description into a handful of query
//! parameters, each with its own little delimiter-based grammar:
//!
//! ```text
//! cht  = "r"                                ; chart type-- only the radar type is accepted
//! chs  = width "x" height                   ; canvas size, in pixels
//! chd  = ["t:"] series *("|" series)        ; series = point *("," point), point a float
//! chxl = index ":" ["|"] label *("|" label) ; axis labels
//! ```
//!
//! Clients in the field are not consistent about the `t:` prefix on `chd`, so its absence is
//! tolerated (stripping a prefix that isn't there is a no-op, not an error). The first label in
//! `chxl` is a placeholder occupying the slot in which the chart's annotation is displayed; it is
//! discarded during parsing.
//!
//! Some clients also send runs of placeholder `-1` values to pad series out to a fixed length.
//! This module does *not* special-case them: `-1` parses as a perfectly good float and is retained
//! as an ordinary negative value. An empty series string, on the other hand, parses to zero points
//! and is dropped from the series list altogether.
//!
//! # Normalization
//!
//! [ChartRequest::normalize] applies the house business rule before rendering: keep at most the
//! first two series, and when exactly two remain, overwrite the first point of the second series
//! with its own last point so the outline closes on itself. The chart's annotation (the "note")
//! is the first point of the first series, truncated toward zero.

use std::backtrace::Backtrace;

use snafu::prelude::*;

/// query module error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unsupported chart type {value:?}"))]
    ChartType { value: String, backtrace: Backtrace },
    #[snafu(display("Failed to split {value:?} into a width & a height"))]
    Size { value: String, backtrace: Backtrace },
    #[snafu(display("{token:?} is not a valid chart width"))]
    Width { token: String, backtrace: Backtrace },
    #[snafu(display("{token:?} is not a valid chart height"))]
    Height { token: String, backtrace: Backtrace },
    #[snafu(display("{token:?} is not a valid data point"))]
    DataPoint { token: String, backtrace: Backtrace },
    #[snafu(display("No colon separating the axis index from its labels in {value:?}"))]
    AxisLabels { value: String, backtrace: Backtrace },
    #[snafu(display("The first series has no data points"))]
    NoData { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

/// Parsed representation of one incoming chart request
///
/// Instances are built by [parse](ChartRequest::parse), passed through
/// [normalize](ChartRequest::normalize), handed to the renderer & discarded-- there is no
/// post-normalization mutation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChartRequest {
    width: u32,
    height: u32,
    series: Vec<Vec<f64>>,
    axis_labels: Vec<String>,
}

impl ChartRequest {
    /// Parse the four legacy query parameters into a [ChartRequest]
    ///
    /// Validation proceeds in the legacy order (chart type, size, data, axis labels) & the first
    /// failure is returned immediately; there is no accumulation of errors.
    pub fn parse(cht: &str, chs: &str, chd: &str, chxl: &str) -> Result<ChartRequest> {
        ensure!("r" == cht, ChartTypeSnafu { value: cht });
        let (width, height) = parse_size(chs)?;
        let series = parse_series(chd)?;
        let axis_labels = parse_axis_labels(chxl)?;
        Ok(ChartRequest {
            width,
            height,
            series,
            axis_labels,
        })
    }
    /// Apply the two-series cap & the endpoint-mirroring rule
    ///
    /// Keep at most the first two series. If exactly two remain, the first point of the second is
    /// overwritten with its last (a no-op for a single-point series, which assigns the point to
    /// itself). Fewer than two series pass through untouched.
    pub fn normalize(mut self) -> ChartRequest {
        self.series.truncate(2);
        if 2 == self.series.len() {
            // Parsed series are never empty (zero-point series are dropped), so `last` is Some.
            if let Some(&last) = self.series[1].last() {
                self.series[1][0] = last;
            }
        }
        self
    }
    /// The chart's annotation: the first point of the first series, truncated toward zero
    ///
    /// The legacy service indexed into the first series unguarded & would blow up on a request
    /// with no data; here that's an ordinary validation failure.
    pub fn note(&self) -> Result<i64> {
        self.series
            .first()
            .and_then(|series| series.first())
            .map(|value| value.trunc() as i64)
            .context(NoDataSnafu)
    }
    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn series(&self) -> &[Vec<f64>] {
        &self.series
    }
    pub fn axis_labels(&self) -> &[String] {
        &self.axis_labels
    }
}

/// Split `chs` on 'x' into exactly two positive integers
///
/// The width is validated before the height; each failure names the offending dimension.
fn parse_size(chs: &str) -> Result<(u32, u32)> {
    let tokens = chs.split('x').collect::<Vec<&str>>();
    let (w, h) = match tokens.as_slice() {
        [w, h] => (*w, *h),
        _ => return SizeSnafu { value: chs }.fail(),
    };
    let width = w
        .parse::<u32>()
        .ok()
        .filter(|width| *width > 0)
        .context(WidthSnafu { token: w })?;
    let height = h
        .parse::<u32>()
        .ok()
        .filter(|height| *height > 0)
        .context(HeightSnafu { token: h })?;
    Ok((width, height))
}

/// Split `chd` (sans any `t:` prefix) on '|' into series, dropping those with zero points
fn parse_series(chd: &str) -> Result<Vec<Vec<f64>>> {
    chd.strip_prefix("t:")
        .unwrap_or(chd)
        .split('|')
        .map(parse_one_series)
        .filter_map(|parsed| match parsed {
            Ok(points) if points.is_empty() => None,
            other => Some(other),
        })
        .collect()
}

/// Split one series on ',' into floating-point data points
///
/// Only the empty string yields zero points; any non-empty string either parses in full or fails
/// on the first bad token (`"1,,2"` fails-- the empty token between the commas is not a float).
fn parse_one_series(text: &str) -> Result<Vec<f64>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .context(DataPointSnafu { token })
        })
        .collect()
}

/// Split `chxl` on its first ':' & return the labels, less the leading placeholder
///
/// The remainder after the colon may itself contain colons (they're legal in labels). An optional
/// leading '|' is stripped before splitting so that both "0:|a|b" and "0:a|b" read the same; the
/// first label is the placeholder slot & is discarded. No validation of the label count against
/// the series is performed.
fn parse_axis_labels(chxl: &str) -> Result<Vec<String>> {
    let (_index, labels) = chxl.split_once(':').context(AxisLabelsSnafu { value: chxl })?;
    Ok(labels
        .strip_prefix('|')
        .unwrap_or(labels)
        .split('|')
        .skip(1)
        .map(String::from)
        .collect())
}
