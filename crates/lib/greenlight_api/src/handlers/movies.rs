//! Movie catalog handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use chrono::Utc;
use greenlight_core::data::bounded;
use greenlight_core::models::movie::Movie;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::handlers::tokens::MessageResponse;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateMovieRequest {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

/// Partial update. `version` is the version the client last saw and must be sent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UpdateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
    pub version: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct MovieResponse {
    pub movie: Movie,
}

/// Ids are positive; anything else cannot exist.
fn parse_id(raw: &str) -> AppResult<i64> {
    raw.parse::<i64>()
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(AppError::NotFound)
}

async fn load(state: &AppState, id: i64) -> AppResult<Movie> {
    bounded(
        "movie fetch",
        state.config.query_timeout,
        state.movies.fetch(id),
    )
    .await?
    .ok_or(AppError::NotFound)
}

/// `POST /v1/movies`: add a movie at version 1.
pub async fn create_movie_handler(
    State(state): State<AppState>,
    Json(body): Json<CreateMovieRequest>,
) -> AppResult<impl IntoResponse> {
    let movie = Movie {
        id: 0,
        created_at: Utc::now(),
        title: body.title,
        year: body.year,
        runtime: body.runtime,
        genres: body.genres,
        version: 1,
    };
    movie.validate()?;

    let movie = bounded(
        "movie insert",
        state.config.query_timeout,
        state.movies.insert_movie(&movie),
    )
    .await?;

    let location = format!("/v1/movies/{}", movie.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(MovieResponse { movie }),
    ))
}

/// `GET /v1/movies/{id}`
pub async fn show_movie_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<MovieResponse>> {
    let movie = load(&state, parse_id(&id)?).await?;
    Ok(Json(MovieResponse { movie }))
}

/// `PATCH /v1/movies/{id}`: apply the supplied fields under the version guard.
///
/// A body without `version` is rejected before anything is read.
pub async fn update_movie_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateMovieRequest>,
) -> AppResult<Json<MovieResponse>> {
    let id = parse_id(&id)?;
    let UpdateMovieRequest {
        title,
        year,
        runtime,
        genres,
        version,
    } = body;

    let expected = version.ok_or_else(|| AppError::invalid("version", "must be provided"))?;

    let movie = state
        .versions
        .check_and_apply(state.movies.as_ref(), id, expected, move |m: &mut Movie| {
            if let Some(title) = title {
                m.title = title;
            }
            if let Some(year) = year {
                m.year = year;
            }
            if let Some(runtime) = runtime {
                m.runtime = runtime;
            }
            if let Some(genres) = genres {
                m.genres = genres;
            }
            m.validate()?;
            Ok::<(), AppError>(())
        })
        .await?;

    Ok(Json(MovieResponse { movie }))
}

/// `DELETE /v1/movies/{id}`
pub async fn delete_movie_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id(&id)?;
    bounded(
        "movie delete",
        state.config.query_timeout,
        state.movies.delete_movie(id),
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "movie successfully deleted".into(),
    }))
}
