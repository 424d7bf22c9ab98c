use rocket::{
    data::{Data, ToByteUnit},
    http::Status,
    request::{FromRequest, Outcome, Request},
};

use crate::config::Config;
use crate::error::{Error, Result};

/// Where a request came from, as used by the per-origin vote ledger: the
/// first `X-Forwarded-For` entry when a proxy supplied one, else the peer IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOrigin(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientOrigin {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let forwarded = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        match forwarded.or_else(|| req.client_ip().map(|ip| ip.to_string())) {
            Some(origin) => Outcome::Success(ClientOrigin(origin)),
            None => Outcome::Failure((
                Status::BadRequest,
                Error::BadRequest("Unable to determine client origin".to_string()),
            )),
        }
    }
}

/// Read an uploaded ID document, refusing anything over the configured size.
pub async fn read_document(data: Data<'_>, config: &Config) -> Result<Vec<u8>> {
    let limit = config.max_document_size();
    let document = data.open(limit).into_bytes().await?;
    if !document.is_complete() {
        return Err(Error::BadRequest(format!(
            "Document exceeds the maximum size of {}",
            limit
        )));
    }
    let document = document.into_inner();
    if document.is_empty() {
        return Err(Error::BadRequest("No document uploaded".to_string()));
    }
    debug!("Received document of {}", document.len().bytes());
    Ok(document)
}
