use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;

use super::protocol::{
    AckResponse, ChannelRequest, ENDPOINT_PUBLISH, ENDPOINT_ROUTE, ENDPOINT_SUBSCRIBE,
    ENDPOINT_SUBSCRIPTIONS, ENDPOINT_UNSUBSCRIBE, PublishRequest, RouteResponse,
    SubscriptionsQuery, SubscriptionsResponse,
};
use crate::client::cluster_client::IoClusterClient;
use crate::error::ClusterError;
use crate::routing::types::{Operation, RoutingKey};
use crate::subscription::types::SocketId;

pub fn router(client: Arc<IoClusterClient>) -> Router {
    Router::new()
        .route(ENDPOINT_PUBLISH, post(handle_publish))
        .route(ENDPOINT_SUBSCRIBE, post(handle_subscribe))
        .route(ENDPOINT_UNSUBSCRIBE, post(handle_unsubscribe))
        .route(ENDPOINT_SUBSCRIPTIONS, get(handle_subscriptions))
        .route(ENDPOINT_ROUTE, get(handle_route))
        .layer(Extension(client))
}

fn failure(err: ClusterError) -> (StatusCode, Json<AckResponse>) {
    let status = if err.is_notice() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(AckResponse::failed(err)))
}

pub async fn handle_publish(
    Extension(client): Extension<Arc<IoClusterClient>>,
    Json(req): Json<PublishRequest>,
) -> (StatusCode, Json<AckResponse>) {
    if req.channel.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::failed("channel must not be empty")),
        );
    }

    let result = match req.exclude {
        Some(exclude) => {
            client
                .publish_excluding(&req.channel, req.data, &SocketId(exclude))
                .await
        }
        None => client.publish(&req.channel, req.data).await,
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())),
        Err(e) => {
            tracing::error!("Failed to publish to {}: {}", req.channel, e);
            failure(e)
        }
    }
}

pub async fn handle_subscribe(
    Extension(client): Extension<Arc<IoClusterClient>>,
    Json(req): Json<ChannelRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match client.subscribe(&req.channel).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())),
        Err(e) => {
            tracing::warn!("Subscribe to {} failed: {}", req.channel, e);
            failure(e)
        }
    }
}

pub async fn handle_unsubscribe(
    Extension(client): Extension<Arc<IoClusterClient>>,
    Json(req): Json<ChannelRequest>,
) -> (StatusCode, Json<AckResponse>) {
    match client.unsubscribe(&req.channel).await {
        Ok(()) => (StatusCode::OK, Json(AckResponse::ok())),
        Err(e) => {
            tracing::warn!("Unsubscribe from {} failed: {}", req.channel, e);
            failure(e)
        }
    }
}

pub async fn handle_subscriptions(
    Extension(client): Extension<Arc<IoClusterClient>>,
    Query(query): Query<SubscriptionsQuery>,
) -> Json<SubscriptionsResponse> {
    Json(SubscriptionsResponse {
        channels: client.subscriptions(query.pending),
    })
}

pub async fn handle_route(
    Extension(client): Extension<Arc<IoClusterClient>>,
    Path(channel): Path<String>,
) -> Json<RouteResponse> {
    let route = client
        .registry()
        .pool()
        .map(&RoutingKey::from(channel.as_str()), Operation::Publish);
    Json(RouteResponse {
        channel,
        shards: route.shards(),
    })
}
