use axum::extract::{Path, State};
use axum::Json;
use booster_core::skill::SkillStatus;
use booster_core::types::SkillId;

use crate::error::AppError;
use crate::state::AppState;

/// GET /skills: snapshot of every tracked skill, ordered by id.
pub async fn list_skills(State(app): State<AppState>) -> Json<Vec<SkillStatus>> {
    Json(app.registry.statuses())
}

/// GET /skills/{skill_id}
pub async fn get_skill(
    State(app): State<AppState>,
    Path(skill_id): Path<SkillId>,
) -> Result<Json<SkillStatus>, AppError> {
    let handle = app
        .registry
        .get(skill_id)
        .ok_or_else(|| AppError::not_found(format!("skill {skill_id} is not tracked")))?;
    Ok(Json(handle.status()))
}
