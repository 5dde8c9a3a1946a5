#![allow(clippy::new_without_default)]

use anyhow::Context;

pub mod assembler;
pub mod auth;
pub mod config;
pub mod diff;
pub mod errors;
pub mod gitlab;
pub mod logger;
pub mod notification;
pub mod poll;
pub mod snapshot;
pub mod utils;
pub mod watch_state;


/// Deserializes a JSON body, reporting the path of the offending field on
/// failure.
pub fn deserialize_payload<T: serde::de::DeserializeOwned>(v: &[u8]) -> anyhow::Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(v);
    let res: Result<T, _> = serde_path_to_error::deserialize(&mut deserializer);
    match res {
        Ok(r) => Ok(r),
        Err(e) => {
            let ctx = format!("at {:?}", e.path().to_string());
            Err(e.into_inner()).context(ctx)
        }
    }
}
