use axum::extract::{Path, Query, State};
use axum::Json;
use booster_core::chart::{ChartQuery, ChartSeries};
use booster_core::types::SkillId;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

fn default_batch_size() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct ChartParams {
    #[serde(default = "default_batch_size")]
    batch_size: u32,
    #[serde(default)]
    from: Option<DateTime<Utc>>,
    #[serde(default)]
    to: Option<DateTime<Utc>>,
}

/// GET /skill/chart/{skill_id}?batch_size=&from=&to=
///
/// Most recent `batch_size` samples (capped by `chart.max_rows`) in the
/// optional time range, oldest first.
pub async fn get_chart(
    State(app): State<AppState>,
    Path(skill_id): Path<SkillId>,
    Query(params): Query<ChartParams>,
) -> Result<Json<ChartSeries>, AppError> {
    if let (Some(from), Some(to)) = (params.from, params.to) {
        if from > to {
            return Err(AppError::bad_request("from must not be after to"));
        }
    }

    let store = app.store.clone();
    let batch_size = params.batch_size.min(store.max_rows());
    let query = ChartQuery {
        skill_id,
        from: params.from,
        to: params.to,
        limit: batch_size,
    };
    let rows = tokio::task::spawn_blocking(move || store.query(&query))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(ChartSeries::new(skill_id, batch_size, &rows)))
}
