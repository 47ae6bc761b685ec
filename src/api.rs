// src/api.rs
use crate::auth::extract_token;
use crate::chart::ChartSource;
use crate::error::{handle_rejection, ApiError};
use crate::identity::IdentityService;
use crate::models::{
    CommentBody, Direction, LoginBody, Principal, PublicUser, RegisterBody, TokenResponse,
};
use crate::stocks::StockService;
use log::{error, info, warn};
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Everything the handlers need, injected once at startup.
pub struct AppState {
    pub stocks: StockService,
    pub identity: IdentityService,
    pub charts: Arc<dyn ChartSource>,
}

pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let root = warp::path::end()
        .and(warp::get())
        .map(|| "TradingPanel API is running");

    let get_profile = warp::path!("api" / "stock" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(get_profile_handler);

    let create_profile = warp::path!("api" / "stock" / String)
        .and(warp::post())
        .and(with_state(state.clone()))
        .and_then(create_profile_handler);

    let chart = warp::path!("api" / "stock" / String / "chart")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(chart_handler);

    let vote = warp::path!("api" / "stock" / String / "vote" / Direction)
        .and(warp::post())
        .and(with_principal(state.clone()))
        .and(with_state(state.clone()))
        .and_then(vote_handler);

    let comment = warp::path!("api" / "stock" / String / "comments")
        .and(warp::post())
        .and(with_principal(state.clone()))
        .and(json_body::<CommentBody>())
        .and(with_state(state.clone()))
        .and_then(comment_handler);

    let delete_comment = warp::path!("api" / "stock" / String / "comments" / String)
        .and(warp::delete())
        .and(with_principal(state.clone()))
        .and(with_state(state.clone()))
        .and_then(delete_comment_handler);

    let register = warp::path!("api" / "user" / "register")
        .and(warp::post())
        .and(json_body::<RegisterBody>())
        .and(with_state(state.clone()))
        .and_then(register_handler);

    let login = warp::path!("api" / "auth")
        .and(warp::post())
        .and(json_body::<LoginBody>())
        .and(with_state(state.clone()))
        .and_then(login_handler);

    let me = warp::path!("api" / "auth")
        .and(warp::get())
        .and(bearer_token())
        .and(with_state(state))
        .and_then(me_handler);

    root.or(get_profile)
        .or(create_profile)
        .or(chart)
        .or(vote)
        .or(comment)
        .or(delete_comment)
        .or(register)
        .or(login)
        .or(me)
        .recover(handle_rejection)
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

fn bearer_token() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::header::optional::<String>("x-auth-token"))
        .and_then(|authorization: Option<String>, legacy: Option<String>| async move {
            extract_token(authorization.as_deref(), legacy.as_deref()).map_err(Rejection::from)
        })
}

/// Resolves the request's bearer credential to the calling user.
fn with_principal(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Principal,), Error = Rejection> + Clone {
    bearer_token()
        .and(with_state(state))
        .and_then(|token: String, state: Arc<AppState>| async move {
            state
                .identity
                .principal(&token)
                .await
                .map_err(Rejection::from)
        })
}

fn reject(context: &str, e: ApiError) -> Rejection {
    if e.status().is_server_error() {
        error!("{}: {}", context, e);
    } else {
        warn!("{}: {}", context, e);
    }
    warp::reject::custom(e)
}

/// warp hands path parameters over still percent-encoded.
fn path_segment(param: &str, raw: &str) -> Result<String, Rejection> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| {
            let e = ApiError::invalid(param, "Path segment is not valid UTF-8");
            reject("Undecodable path segment", e)
        })
}

async fn get_profile_handler(
    symbol: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    match state.stocks.get(&symbol).await {
        Ok(profile) => Ok(warp::reply::json(&profile)),
        Err(e) => Err(reject("Failed to retrieve stock profile", e)),
    }
}

async fn create_profile_handler(
    symbol: String,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    match state.stocks.fetch_or_create(&symbol).await {
        Ok((profile, created)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok(warp::reply::with_status(warp::reply::json(&profile), status))
        }
        Err(e) => Err(reject("Failed to create stock profile", e)),
    }
}

async fn chart_handler(symbol: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    match state.charts.daily_series(&symbol).await {
        Ok(series) => {
            info!("Chart data relayed for {}.", symbol);
            Ok(warp::reply::json(&series))
        }
        Err(e) => Err(reject("Failed to fetch chart data", e)),
    }
}

async fn vote_handler(
    symbol: String,
    direction: Direction,
    caller: Principal,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    match state.stocks.cast_vote(&symbol, &caller, direction).await {
        Ok(profile) => Ok(warp::reply::json(&profile)),
        Err(e) => Err(reject("Failed to cast vote", e)),
    }
}

async fn comment_handler(
    symbol: String,
    caller: Principal,
    body: CommentBody,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    match state.stocks.post_comment(&symbol, &caller, &body.text).await {
        Ok(profile) => Ok(warp::reply::json(&profile)),
        Err(e) => Err(reject("Failed to post comment", e)),
    }
}

async fn delete_comment_handler(
    symbol: String,
    comment_id: String,
    caller: Principal,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    let symbol = path_segment("symbol", &symbol)?;
    let comment_id = path_segment("comment_id", &comment_id)?;
    match state.stocks.delete_comment(&symbol, &caller, &comment_id).await {
        Ok(profile) => Ok(warp::reply::json(&profile)),
        Err(e) => Err(reject("Failed to delete comment", e)),
    }
}

async fn register_handler(
    body: RegisterBody,
    state: Arc<AppState>,
) -> Result<impl Reply, Rejection> {
    match state.identity.register(body).await {
        Ok(token) => Ok(warp::reply::json(&TokenResponse { token })),
        Err(e) => Err(reject("Failed to register user", e)),
    }
}

async fn login_handler(body: LoginBody, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    match state.identity.login(body).await {
        Ok(token) => Ok(warp::reply::json(&TokenResponse { token })),
        Err(e) => Err(reject("Failed to authenticate user", e)),
    }
}

async fn me_handler(token: String, state: Arc<AppState>) -> Result<impl Reply, Rejection> {
    match state.identity.current_user(&token).await {
        Ok(user) => Ok(warp::reply::json(&PublicUser::from(user))),
        Err(e) => Err(reject("Failed to load current user", e)),
    }
}
