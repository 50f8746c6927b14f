//! Public request gateway
//!
//! Every public HTTP request becomes exactly one tunnel request. The
//! outcome is terminal: replied, timed out, disconnected, or write failed.
//! Retries are left to the original caller.

use std::error::Error as StdError;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use tokio::time::timeout;
use tracing::{debug, warn};

use revtun_shared::protocol::{TunnelRequest, TunnelResponse};

use crate::correlation::Reply;
use crate::error::GatewayError;
use crate::headers;
use crate::AppState;

pub async fn proxy_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    match forward(&state, req).await {
        Ok(resp) => resp,
        Err(e) => {
            debug!(error = %e, "gateway request failed");
            e.into_response()
        }
    }
}

async fn forward(state: &AppState, req: Request<Body>) -> Result<Response, GatewayError> {
    // Fail fast, before touching the body
    let epoch = state
        .channel
        .current_epoch()
        .await
        .ok_or(GatewayError::NoActiveClient)?;

    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let headers = headers::to_tunnel(req.headers());

    let limit = state.config.max_body_bytes;
    let body = to_bytes(req.into_body(), limit).await.map_err(|e| {
        if is_length_limit(&e) {
            GatewayError::BodyTooLarge(limit)
        } else {
            GatewayError::BodyRead(e.to_string())
        }
    })?;

    let id = state.ids.next_id();
    let mut pending = state.pending.register(&id, epoch)?;

    let frame = TunnelRequest {
        id: id.clone(),
        method,
        path,
        headers,
        body: body.to_vec(),
    }
    .encode()?;

    debug!(id = %pending.id(), epoch, "forwarding request");

    // One deadline covers queueing the frame and waiting for the reply
    let exchange = async {
        state.channel.send(epoch, frame).await?;
        Ok::<_, GatewayError>(pending.wait().await)
    };
    let reply = match timeout(state.config.gateway_timeout(), exchange).await {
        Ok(reply) => reply?,
        Err(_) => {
            warn!(id = %id, "no reply from tunnel client before timeout");
            return Err(GatewayError::GatewayTimeout);
        }
    };

    match reply {
        Reply::Response(resp) => build_response(resp),
        Reply::Disconnected => Err(GatewayError::ClientDisconnected),
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

fn build_response(resp: TunnelResponse) -> Result<Response, GatewayError> {
    let status = StatusCode::from_u16(resp.status)
        .map_err(|_| GatewayError::InvalidReply(format!("status code {}", resp.status)))?;

    let mut response = Response::new(Body::from(resp.body));
    *response.status_mut() = status;
    let skipped = headers::apply_reply(response.headers_mut(), &resp.headers);
    if skipped > 0 {
        debug!(id = %resp.id, skipped, "reply headers not forwarded");
    }
    Ok(response)
}
