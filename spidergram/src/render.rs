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

//! # render
//!
//! Turning a [ChartRequest] into PNG bytes.
//!
//! # Introduction
//!
//! Rendering is a capability, not a core competence: the interesting contracts in this service are
//! the query language, the normalizer & the cache, and the handler shouldn't care *how* pixels get
//! made. To that end the chart module talks to a [Renderer]-- an object-safe, async trait-- and an
//! implementation is chosen at startup & injected through the application state. Production uses
//! [SpiderRenderer], built on [plotters]; the integration tests inject a counting stub.
//!
//! [plotters]: https://docs.rs/plotters/latest/plotters/index.html
//!
//! [plotters] draws synchronously, so [SpiderRenderer] hops onto a blocking thread for the
//! drawing section rather than stall a runtime worker.
//!
//! # The note
//!
//! The chart's annotation (the "note") is overlaid as text centered against a fixed 225x225
//! reference canvas-- *not* against the actual canvas. That's the legacy behavior: the service
//! was only ever asked for 225x225 charts & hard-coded the math. Since callers in the field
//! depend on where the number lands, we reproduce it.

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use plotters::{
    backend::BitMapBackend,
    drawing::IntoDrawingArea,
    element::{PathElement, Polygon, Text},
    style::{Color, IntoFont, RGBAColor, RGBColor, ShapeStyle, TextStyle},
};
use snafu::prelude::*;

use crate::query::ChartRequest;

/// render module error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Can't draw a radar chart on {count} axes"))]
    Axes { count: usize },
    #[snafu(display("Constructed an invalid {width}x{height} pixel buffer"))]
    Buffer { width: u32, height: u32 },
    #[snafu(display("Failed to draw the chart: {what}"))]
    Draw { what: String },
    #[snafu(display("Failed to encode the chart as PNG: {source}"))]
    Encode { source: image::ImageError },
    #[snafu(display("The rendering task failed to complete: {source}"))]
    Join { source: tokio::task::JoinError },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The rendering collaborator
///
/// Given a normalized [ChartRequest] & its note, produce image bytes (PNG). Implementations must
/// be safe to share among concurrent handler invocations.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, chart: ChartRequest, note: i64) -> Result<Bytes>;
}

/// Colors for the radar chart
///
/// The legacy service kept its palette in a mutable global registered under a theme name; here
/// it's plain data handed to the renderer at construction.
pub struct Theme {
    pub background: RGBColor,
    pub text: RGBAColor,
    pub grid: RGBAColor,
    pub axis: RGBAColor,
    pub series: Vec<RGBAColor>,
}

lazy_static! {
    /// The house theme: white canvas, translucent black text & axes, green & orange series
    static ref HOUSE_THEME: Theme = Theme {
        background: RGBColor(255, 255, 255),
        text: RGBAColor(0, 0, 0, 0.43),
        grid: RGBAColor(0, 0, 0, 0.08),
        axis: RGBAColor(0, 0, 0, 0.2),
        series: vec![RGBAColor(13, 136, 0, 1.0), RGBAColor(255, 111, 0, 1.0)],
    };
}

/// Edge length of the reference canvas against which the note is centered
const REFERENCE_CANVAS: i32 = 225;
/// Vertical nudge applied to the note's centered position
const NOTE_VERTICAL_OFFSET: i32 = 22;
const NOTE_FONT_SIZE: i32 = 28;
/// Data points are plotted as a fraction of this full-scale value
const MAX_VALUE: f64 = 100.0;
/// Concentric grid polygons drawn between the center & the rim
const RING_COUNT: usize = 5;
/// Fraction of the available half-canvas given to the chart (the rest is label margin)
const RIM_FRACTION: f64 = 0.78;

/// The production [Renderer]: radar charts via [plotters]
pub struct SpiderRenderer {
    theme: &'static Theme,
}

impl SpiderRenderer {
    pub fn new() -> SpiderRenderer {
        SpiderRenderer {
            theme: &*HOUSE_THEME,
        }
    }
}

impl Default for SpiderRenderer {
    fn default() -> Self {
        SpiderRenderer::new()
    }
}

#[async_trait]
impl Renderer for SpiderRenderer {
    async fn render(&self, chart: ChartRequest, note: i64) -> Result<Bytes> {
        let theme = self.theme;
        // plotters is synchronous-- do the drawing on a blocking thread.
        tokio::task::spawn_blocking(move || draw(&chart, note, theme))
            .await
            .context(JoinSnafu)?
    }
}

/// Locate the vertex for axis `index` of `count`, at `fraction` of `radius` from `center`
///
/// Axis zero points straight up; subsequent axes proceed clockwise.
fn vertex(
    center: (i32, i32),
    radius: f64,
    index: usize,
    count: usize,
    fraction: f64,
) -> (i32, i32) {
    let angle =
        -std::f64::consts::FRAC_PI_2 + (index as f64) * std::f64::consts::TAU / (count as f64);
    (
        center.0 + (radius * fraction * angle.cos()).round() as i32,
        center.1 + (radius * fraction * angle.sin()).round() as i32,
    )
}

fn draw(chart: &ChartRequest, note: i64, theme: &Theme) -> Result<Bytes> {
    let (width, height) = (chart.width(), chart.height());
    let axes = chart.axis_labels().len();
    ensure!(axes >= 3, AxesSnafu { count: axes });

    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&theme.background).map_err(draw_err)?;

        let center = (width as i32 / 2, height as i32 / 2);
        let radius = f64::from(width.min(height)) / 2.0 * RIM_FRACTION;

        // Concentric grid polygons, center out to the rim:
        for ring in 1..=RING_COUNT {
            let fraction = ring as f64 / RING_COUNT as f64;
            let mut points = (0..axes)
                .map(|index| vertex(center, radius, index, axes, fraction))
                .collect::<Vec<(i32, i32)>>();
            points.push(points[0]); // close the outline
            root.draw(&PathElement::new(
                points,
                ShapeStyle::from(&theme.grid).stroke_width(1),
            ))
            .map_err(draw_err)?;
        }

        // Spokes & axis labels:
        let label_style = TextStyle::from(("sans-serif", 12).into_font()).color(&theme.text);
        for (index, label) in chart.axis_labels().iter().enumerate() {
            let rim = vertex(center, radius, index, axes, 1.0);
            root.draw(&PathElement::new(
                vec![center, rim],
                ShapeStyle::from(&theme.axis).stroke_width(1),
            ))
            .map_err(draw_err)?;
            root.draw(&Text::new(
                label.clone(),
                vertex(center, radius, index, axes, 1.08),
                label_style.clone(),
            ))
            .map_err(draw_err)?;
        }

        // The series themselves-- a translucent fill under a solid outline. Values beyond the
        // axis count have no vertex to land on & are simply not plotted.
        for (series, color) in chart.series().iter().zip(theme.series.iter().cycle()) {
            let mut points = series
                .iter()
                .take(axes)
                .enumerate()
                .map(|(index, value)| {
                    let fraction = (value / MAX_VALUE).clamp(0.0, 1.0);
                    vertex(center, radius, index, axes, fraction)
                })
                .collect::<Vec<(i32, i32)>>();
            root.draw(&Polygon::new(points.clone(), color.mix(0.25).filled()))
                .map_err(draw_err)?;
            if let Some(&first) = points.first() {
                points.push(first);
            }
            root.draw(&PathElement::new(
                points,
                ShapeStyle::from(color).stroke_width(1),
            ))
            .map_err(draw_err)?;
        }

        // The note, centered against the *reference* canvas (see the module docs):
        let note_style =
            TextStyle::from(("sans-serif", NOTE_FONT_SIZE).into_font()).color(&theme.text);
        let text = note.to_string();
        let (text_width, text_height) = root
            .estimate_text_size(&text, &note_style)
            .map_err(draw_err)?;
        let x = (REFERENCE_CANVAS - text_width as i32) / 2;
        let y = (REFERENCE_CANVAS - text_height as i32) / 2 + NOTE_VERTICAL_OFFSET;
        root.draw(&Text::new(text, (x, y), note_style))
            .map_err(draw_err)?;

        root.present().map_err(draw_err)?;
    }

    let image = image::RgbImage::from_raw(width, height, buffer)
        .context(BufferSnafu { width, height })?;
    let mut cursor = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, image::ImageFormat::Png)
        .context(EncodeSnafu)?;
    Ok(Bytes::from(cursor.into_inner()))
}

// plotters' error types are generic over the backend; flatten 'em to text at the module boundary.
fn draw_err<E: std::error::Error>(err: E) -> Error {
    Error::Draw {
        what: err.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vertices() {
        // Four axes on a circle of radius 50 about (100, 100): up, right, down, left.
        assert_eq!(vertex((100, 100), 50.0, 0, 4, 1.0), (100, 50));
        assert_eq!(vertex((100, 100), 50.0, 1, 4, 1.0), (150, 100));
        assert_eq!(vertex((100, 100), 50.0, 2, 4, 1.0), (100, 150));
        assert_eq!(vertex((100, 100), 50.0, 3, 4, 1.0), (50, 100));
        // Fractions scale along the spoke:
        assert_eq!(vertex((100, 100), 50.0, 1, 4, 0.5), (125, 100));
        // Fraction zero is the center, whatever the axis:
        assert_eq!(vertex((100, 100), 50.0, 3, 4, 0.0), (100, 100));
    }

    #[test]
    fn too_few_axes() {
        let chart = ChartRequest::parse("r", "10x10", "t:1,2", "0:|note|mus")
            .unwrap()
            .normalize();
        assert!(matches!(
            draw(&chart, 1, &HOUSE_THEME),
            Err(Error::Axes { count: 1 })
        ));
    }
}
