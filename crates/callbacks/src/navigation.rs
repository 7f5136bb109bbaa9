//! Request parameters carried across a navigation hop.
//!
//! A flow that needs another view serializes its parameters into the target
//! (`<route>?data=<base64url json>&callback_id=<id>`), stores its callbacks
//! under the id, and the target view settles them by id once done.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CallbackError;
use crate::registry::CallbackId;

const DATA_PARAM: &str = "data";
const CALLBACK_PARAM: &str = "callback_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationTarget<P> {
    pub route: String,
    pub params: P,
    pub callback_id: CallbackId,
}

pub fn navigation_target<P: Serialize>(
    route: &str,
    params: &P,
    callback_id: CallbackId,
) -> Result<String, CallbackError> {
    let json = serde_json::to_vec(params)
        .map_err(|e| CallbackError::InvalidTarget(format!("unserializable params: {e}")))?;
    Ok(format!(
        "{route}?{DATA_PARAM}={}&{CALLBACK_PARAM}={callback_id}",
        URL_SAFE_NO_PAD.encode(json)
    ))
}

pub fn parse_navigation_target<P: DeserializeOwned>(
    target: &str,
) -> Result<NavigationTarget<P>, CallbackError> {
    let invalid = |reason: &str| CallbackError::InvalidTarget(reason.to_string());

    let (route, query) = target.split_once('?').ok_or_else(|| invalid("missing query"))?;

    let mut data = None;
    let mut callback_id = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some((DATA_PARAM, value)) => data = Some(value),
            Some((CALLBACK_PARAM, value)) => {
                callback_id = Some(
                    value
                        .parse::<CallbackId>()
                        .map_err(|_| invalid("callback id is not a number"))?,
                )
            }
            _ => {}
        }
    }

    let data = data.ok_or_else(|| invalid("missing data parameter"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(data)
        .map_err(|_| invalid("data is not base64url"))?;
    let params = serde_json::from_slice(&bytes)
        .map_err(|e| CallbackError::InvalidTarget(format!("malformed params: {e}")))?;

    Ok(NavigationTarget {
        route: route.to_string(),
        params,
        callback_id: callback_id.ok_or_else(|| invalid("missing callback id"))?,
    })
}
