#![allow(dead_code)]

use records_pod::clock_in_api::ClockInApi;
use records_pod::database_api::Database;
use records_pod::items_api::ItemsApi;
use records_pod::warp_api;
use serde_json::Value;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::Filter;
use warp::Reply;

/// All routes, backed by a fresh in-memory database.
pub fn test_routes() -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone + 'static {
    let database = Database::open_in_memory().expect("Failed to open in-memory database");
    warp_api::routes(ItemsApi::new(database.clone()), ClockInApi::new(database))
}

/// Send one request and decode the JSON response.
pub async fn call<F>(filter: &F, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value)
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let mut request = warp::test::request().method(method).path(path);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request.reply(filter).await;
    let json = serde_json::from_slice(response.body())
        .unwrap_or_else(|err| panic!("Response to {} {} is not JSON, {}", method, path, err));
    (response.status(), json)
}
