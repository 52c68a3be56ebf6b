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

//! # chart
//!
//! Serving `GET /chart`.
//!
//! # Introduction
//!
//! This is the service's one real endpoint, & its job is orchestration: check the cache, else
//! parse, normalize, render, annotate, store & respond. Each request walks
//!
//! ```text
//! START -> CACHE_CHECK -> (HIT  -> RESPOND_CACHED)
//!                       | (MISS -> PARSE -> (FAIL -> RESPOND_ERROR)
//!                                         | (OK -> NORMALIZE -> RENDER -> STORE -> RESPOND_FRESH))
//! ```
//!
//! Contra the rest of the modern world (and the rest of my services), errors go out as *plain
//! text*, not JSON: the clients of this endpoint are legacy image consumers & that's what they
//! expect. The messages themselves are part of the wire contract-- see
//! [Error::as_status_and_msg]-- so resist the urge to reword them.
//!
//! A failed render is a 500 & nothing more; the process keeps serving. (The service this one
//! replaces would *terminate* on one render error path, taking every in-flight request with it.)

use std::sync::Arc;

use axum::{
    extract::{Query, RawQuery, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE},
        StatusCode,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use snafu::prelude::*;
use tracing::{debug, error};

use crate::{
    counter_add,
    metrics::{self, Sort},
    query::{self, ChartRequest},
    render,
    spidergram::Spidergram,
};

/// chart module error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Bad chart request: {source}"))]
    BadRequest { source: query::Error },
    #[snafu(display("Failed to render the chart: {source}"))]
    Render { source: render::Error },
}

impl Error {
    /// Map to the legacy wire contract: status code & exact plain-text message
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- the messages are load-bearing; clients match on them
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadRequest { source } => {
                let msg = match source {
                    query::Error::ChartType { .. } => "Unsupported chart type",
                    query::Error::Size { .. } => "Invalid chart size",
                    query::Error::Width { .. } => "Invalid chart width",
                    query::Error::Height { .. } => "Invalid chart height",
                    query::Error::DataPoint { .. } => "Invalid data point",
                    query::Error::AxisLabels { .. } => "Invalid axis labels",
                    query::Error::NoData { .. } => "No data points provided",
                };
                (StatusCode::BAD_REQUEST, msg.to_string())
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it, generically:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::Render { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate chart".to_string(),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        self.as_status_and_msg().into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            `/chart`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("chart_cache_hits", "chart requests served from cache", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("chart_cache_misses", "chart requests not found in cache", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("chart_renders", "charts rendered", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("chart_render_failures", "chart renders that failed", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("chart_rejected", "chart requests rejected as malformed", Sort::IntegralCounter) }

/// A deserializable struct representing the legacy query parameters for `/chart`
///
/// Everything is optional at the extraction layer; absent parameters read as empty strings in the
/// parser, which is where "absent" gets its meaning (an absent `cht` is an unsupported chart
/// type, an absent `chs` is an invalid size, & so on). Parameters this service never learned to
/// honor (`chco`, `chm`, `chls`, ...) are accepted & ignored, as the legacy service did.
#[derive(Clone, Debug, Deserialize)]
pub struct ChartParams {
    cht: Option<String>,
    chs: Option<String>,
    chd: Option<String>,
    chxl: Option<String>,
}

/// `/chart` handler
///
/// The cache key is the *raw* query string, exactly as received-- no decoding, no sorting. The
/// cache is consulted before any parsing, & populated only after a fully successful render.
async fn chart(
    State(state): State<Arc<Spidergram>>,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<ChartParams>,
) -> axum::response::Response {
    async fn chart1(state: &Spidergram, params: &ChartParams) -> Result<Bytes> {
        let request = ChartRequest::parse(
            params.cht.as_deref().unwrap_or(""),
            params.chs.as_deref().unwrap_or(""),
            params.chd.as_deref().unwrap_or(""),
            params.chxl.as_deref().unwrap_or(""),
        )
        .context(BadRequestSnafu)?
        .normalize();
        let note = request.note().context(BadRequestSnafu)?;
        state
            .renderer
            .render(request, note)
            .await
            .context(RenderSnafu)
    }

    let key = raw_query.unwrap_or_default();
    if let Some(image) = state.cache.get(&key).await {
        debug!("Serving {} cached bytes for {:?}.", image.len(), key);
        counter_add!(state.instruments, "chart_cache_hits", 1);
        return image_response(image, state.max_age);
    }
    counter_add!(state.instruments, "chart_cache_misses", 1);

    match chart1(&state, &params).await {
        Ok(image) => {
            counter_add!(state.instruments, "chart_renders", 1);
            state.cache.insert(key, image.clone()).await;
            image_response(image, state.max_age)
        }
        Err(err) => {
            match &err {
                Error::Render { .. } => {
                    error!("{:?}", err);
                    counter_add!(state.instruments, "chart_render_failures", 1);
                }
                Error::BadRequest { .. } => {
                    debug!("{}", err);
                    counter_add!(state.instruments, "chart_rejected", 1);
                }
            }
            err.into_response()
        }
    }
}

/// Build a 200 response bearing `image`
///
/// axum would compute `Content-Length` on its own, but the legacy service set it explicitly &
/// clients may key on its presence, so it's set explicitly here, too.
fn image_response(image: Bytes, max_age: u32) -> axum::response::Response {
    axum::response::Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "image/png")
        .header(CONTENT_LENGTH, image.len())
        .header(CACHE_CONTROL, format!("public, max-age={}", max_age))
        .body(axum::body::Body::from(image))
        .expect("Failed to construct a response from /chart. This is a bug & should be investigated")
}

/// Make the [Router] serving the chart endpoint
pub fn make_router(state: Arc<Spidergram>) -> Router<Arc<Spidergram>> {
    Router::new()
        .route("/chart", get(chart))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;

    // The wire messages are a contract; pin each one.
    #[test]
    fn wire_messages() {
        let table: &[(&str, &str, &str, &str, StatusCode, &str)] = &[
            ("bar", "1x1", "t:1", "0:|a|b", StatusCode::BAD_REQUEST, "Unsupported chart type"),
            ("", "1x1", "t:1", "0:|a|b", StatusCode::BAD_REQUEST, "Unsupported chart type"),
            ("r", "225", "t:1", "0:|a|b", StatusCode::BAD_REQUEST, "Invalid chart size"),
            ("r", "abcx225", "t:1", "0:|a|b", StatusCode::BAD_REQUEST, "Invalid chart width"),
            ("r", "225xabc", "t:1", "0:|a|b", StatusCode::BAD_REQUEST, "Invalid chart height"),
            ("r", "225x225", "t:1,x", "0:|a|b", StatusCode::BAD_REQUEST, "Invalid data point"),
            ("r", "225x225", "t:1", "a|b", StatusCode::BAD_REQUEST, "Invalid axis labels"),
        ];
        for &(cht, chs, chd, chxl, status, msg) in table {
            let err = Error::BadRequest {
                source: ChartRequest::parse(cht, chs, chd, chxl).unwrap_err(),
            };
            assert_eq!(err.as_status_and_msg(), (status, msg.to_string()));
        }
        // The note guard:
        let err = Error::BadRequest {
            source: ChartRequest::parse("r", "1x1", "t:", "0:|a|b")
                .unwrap()
                .normalize()
                .note()
                .unwrap_err(),
        };
        assert_eq!(
            err.as_status_and_msg(),
            (StatusCode::BAD_REQUEST, "No data points provided".to_string())
        );
    }
}
