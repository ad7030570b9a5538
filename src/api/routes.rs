/// HTTP handlers for the read side
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::ApiState;
use crate::collector::{CollectorState, CollectorStatus};
use crate::data::ChartData;
use crate::error::Result;

fn default_time_unit_hours() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default = "default_time_unit_hours")]
    pub time_unit_hours: u32,
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Hello World" }))
}

pub async fn get_chart_data(
    State(state): State<ApiState>,
    Path(token_symbol): Path<String>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<ChartData>> {
    let aggregator = state.aggregator.clone();
    let chart = state
        .store
        .blocking(move |_| aggregator.aggregate(&token_symbol, query.time_unit_hours))
        .await?;

    Ok(Json(chart))
}

#[derive(Debug, Serialize)]
pub struct CollectorHealth {
    #[serde(flatten)]
    pub status: CollectorStatus,
    pub stored_samples: usize,
    pub latest_period_start: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub collectors: Vec<CollectorHealth>,
}

pub async fn health(State(state): State<ApiState>) -> Result<Json<HealthReport>> {
    let statuses = state.registry.snapshot().await;

    let overall = if statuses.iter().any(|s| s.state == CollectorState::Failed) {
        "degraded"
    } else if statuses.iter().all(|s| s.state == CollectorState::Polling) {
        "ok"
    } else {
        "starting"
    };

    let collectors = state
        .store
        .blocking(move |store| {
            statuses
                .into_iter()
                .map(|status| -> Result<CollectorHealth> {
                    let (stored_samples, latest_period_start) = match &status.symbol {
                        Some(symbol) => (
                            store.count_hourly_samples(symbol)?,
                            store.latest_period_start(symbol)?,
                        ),
                        None => (0, None),
                    };
                    Ok(CollectorHealth {
                        status,
                        stored_samples,
                        latest_period_start,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .await?;

    Ok(Json(HealthReport {
        status: overall,
        collectors,
    }))
}
