use crate::api_model::ClockInCreate;
use crate::api_model::ClockInFilter;
use crate::api_model::ItemCreate;
use crate::api_model::ItemFilter;
use crate::clock_in_api::ClockInApi;
use crate::command_line_interface::CliOptions;
use crate::constants;
use crate::database_api::Database;
use crate::error::Error;
use crate::error::Result;
use crate::items_api::ItemsApi;
use bytes::Bytes;
use log::info;
use log::warn;
use serde::Serialize;
use serde_json::json;
use serde_json::Value;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use warp::http::status::StatusCode;
use warp::reply::Response;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

/// Start web framework with specified APIs.
pub async fn run_server(cli_options: &CliOptions, database: Database) {
    let package_name = env!("CARGO_PKG_NAME").to_uppercase();
    info!("Starting {} HTTP server", package_name);

    let items = ItemsApi::new(database.clone());
    let clock_in = ClockInApi::new(database);

    let address = SocketAddr::new(cli_options.address, cli_options.port);
    info!("Listening on http://{}", address);
    warp::serve(routes(items, clock_in)).run(address).await;
}

/// Every route of the service, with rejections turned into JSON errors.
pub fn routes(
    items: ItemsApi,
    clock_in: ClockInApi,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let welcome = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "message": constants::WELCOME_MESSAGE })));

    let version = warp::path("version")
        .and(warp::path::end())
        .and(warp::get())
        .map(get_project_version);

    welcome
        .or(version)
        .or(item_routes(items))
        .or(clock_in_routes(clock_in))
        .recover(handle_rejection)
}

fn item_routes(api: ItemsApi) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let with_api = warp::any().map(move || api.clone());

    // GET filtered items.
    // Query parameters (all optional): email, expiry_date, insert_date, quantity.
    let filter = warp::path!("items" / "filter")
        .and(warp::get())
        .and(with_api.clone())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(|api: ItemsApi, query: HashMap<String, String>| {
            reply(async move {
                let filter = ItemFilter::from_query(&query)?;
                blocking(move || api.filter(&filter)).await
            })
        });

    // GET number of items per email.
    let aggregate = warp::path!("items" / "aggregate")
        .and(warp::get())
        .and(with_api.clone())
        .and_then(|api: ItemsApi| reply(blocking(move || api.aggregate())));

    // POST a new item, json body with all user fields.
    let create = warp::path!("items")
        .and(warp::post())
        .and(with_api.clone())
        .and(json_body())
        .and_then(|api: ItemsApi, body: Bytes| {
            reply(async move {
                let item = ItemCreate::from_json(&parse_json(&body)?)?;
                blocking(move || api.create(item)).await
            })
        });

    let get = warp::path!("items" / String)
        .and(warp::get())
        .and(with_api.clone())
        .and_then(|id: String, api: ItemsApi| reply(blocking(move || api.get(&id))));

    // PUT (replace) the user fields of an item, keeping its id and insert_date.
    let update = warp::path!("items" / String)
        .and(warp::put())
        .and(with_api.clone())
        .and(json_body())
        .and_then(|id: String, api: ItemsApi, body: Bytes| {
            reply(async move {
                let item = ItemCreate::from_json(&parse_json(&body)?)?;
                blocking(move || api.update(&id, item)).await
            })
        });

    let delete = warp::path!("items" / String)
        .and(warp::delete())
        .and(with_api)
        .and_then(|id: String, api: ItemsApi| {
            reply(async move {
                blocking(move || api.delete(&id)).await?;
                Ok::<_, Error>(json!({ "detail": "Item deleted" }))
            })
        });

    // Fixed paths go first, "filter" and "aggregate" are not item ids.
    filter
        .or(aggregate)
        .or(create)
        .or(get)
        .or(update)
        .or(delete)
}

fn clock_in_routes(
    api: ClockInApi,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let with_api = warp::any().map(move || api.clone());

    // GET filtered records.
    // Query parameters (all optional): email, location, insert_datetime.
    let filter = warp::path!("clock-in" / "filter")
        .and(warp::get())
        .and(with_api.clone())
        .and(warp::query::<HashMap<String, String>>())
        .and_then(|api: ClockInApi, query: HashMap<String, String>| {
            reply(async move {
                let filter = ClockInFilter::from_query(&query)?;
                blocking(move || api.filter(&filter)).await
            })
        });

    let create = warp::path!("clock-in")
        .and(warp::post())
        .and(with_api.clone())
        .and(json_body())
        .and_then(|api: ClockInApi, body: Bytes| {
            reply(async move {
                let record = ClockInCreate::from_json(&parse_json(&body)?)?;
                blocking(move || api.create(record)).await
            })
        });

    let get = warp::path!("clock-in" / String)
        .and(warp::get())
        .and(with_api.clone())
        .and_then(|id: String, api: ClockInApi| reply(blocking(move || api.get(&id))));

    let update = warp::path!("clock-in" / String)
        .and(warp::put())
        .and(with_api.clone())
        .and(json_body())
        .and_then(|id: String, api: ClockInApi, body: Bytes| {
            reply(async move {
                let record = ClockInCreate::from_json(&parse_json(&body)?)?;
                blocking(move || api.update(&id, record)).await
            })
        });

    let delete = warp::path!("clock-in" / String)
        .and(warp::delete())
        .and(with_api)
        .and_then(|id: String, api: ClockInApi| {
            reply(async move {
                blocking(move || api.delete(&id)).await?;
                Ok::<_, Error>(json!({ "detail": "Record deleted" }))
            })
        });

    filter.or(create).or(get).or(update).or(delete)
}

/// Get project version as seen by Cargo.
pub fn get_project_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//
// helper functions:
//

fn json_body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::bytes()
}

fn parse_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|err| Error {
        code: StatusCode::BAD_REQUEST,
        msg: format!("Request body is not valid JSON, {}", err),
    })
}

/// Run storage work on the blocking thread pool, so that the executor stays free
/// while SQLite is busy.
async fn blocking<T, F>(func: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(func).await?
}

async fn reply<T, F>(result: F) -> std::result::Result<Response, Infallible>
where
    T: Serialize,
    F: Future<Output = Result<T>>,
{
    Ok(match result.await {
        Ok(value) => warp::reply::json(&value).into_response(),
        Err(err) => error_response(err),
    })
}

fn error_response(err: Error) -> Response {
    if err.code.is_server_error() {
        warn!("{}", err);
    }
    let body = warp::reply::json(&json!({ "detail": err.msg }));
    warp::reply::with_status(body, err.code).into_response()
}

async fn handle_rejection(rejection: Rejection) -> std::result::Result<Response, Infallible> {
    let err = if rejection.is_not_found() {
        Error::not_found("Not Found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        Error {
            code: StatusCode::METHOD_NOT_ALLOWED,
            msg: "Method Not Allowed".to_string(),
        }
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        Error {
            code: StatusCode::BAD_REQUEST,
            msg: "Invalid query string".to_string(),
        }
    } else {
        Error {
            code: StatusCode::INTERNAL_SERVER_ERROR,
            msg: format!("Unhandled rejection {:?}", rejection),
        }
    };
    Ok(error_response(err))
}
