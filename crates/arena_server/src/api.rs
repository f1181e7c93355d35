//! Management API over the resource registry.
//!
//! Transport-neutral request/response pairs. Registry errors become responses
//! through [`RegistryError::status_code`]; nothing here returns `Err`.

use arena_core::{
    current_timestamp, Arena, RegistryError, ResourceId, ResourceRegistry, ResourceSpec,
    StartOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// A management operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiRequest {
    Health,
    ListResources,
    GetResource(ResourceId),
    Register(ResourceSpec),
    Unregister(ResourceId),
    Start {
        resource_id: ResourceId,
        options: StartOptions,
    },
    Stop(ResourceId),
    ListInstances,
    InstanceStats(ResourceId),
}

/// Result of a management operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: 404,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<RegistryError> for ApiResponse {
    fn from(error: RegistryError) -> Self {
        Self {
            status: error.status_code(),
            body: json!({ "error": error.to_string() }),
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(body) => ApiResponse::ok(body),
        Err(e) => ApiResponse {
            status: 500,
            body: json!({ "error": format!("Failed to encode response: {e}") }),
        },
    }
}

/// Serves [`ApiRequest`]s against a registry.
#[derive(Clone)]
pub struct ManagementApi {
    registry: Arc<ResourceRegistry>,
    lobby: Arc<Arena>,
}

impl ManagementApi {
    pub fn new(registry: Arc<ResourceRegistry>, lobby: Arc<Arena>) -> Self {
        Self { registry, lobby }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        debug!("Management request: {:?}", request);

        match request {
            ApiRequest::Health => ApiResponse::ok(json!({
                "status": "healthy",
                "timestamp": current_timestamp(),
                "lobby_players": self.lobby.len().await,
                "lobby_capacity": self.lobby.capacity(),
                "games": self.registry.len(),
                "active_instances": self.registry.list_active().await.len(),
            })),

            ApiRequest::ListResources => to_body(&self.registry.list().await),

            ApiRequest::GetResource(id) => match self.registry.get(&id).await {
                Some(resource) => to_body(&resource),
                None => ApiResponse::not_found(format!("Game not found: {id}")),
            },

            ApiRequest::Register(spec) => match self.registry.register(spec).await {
                Ok(resource) => {
                    let response = to_body(&resource);
                    if response.is_success() {
                        ApiResponse::created(response.body)
                    } else {
                        response
                    }
                }
                Err(e) => e.into(),
            },

            ApiRequest::Unregister(id) => match self.registry.unregister(&id).await {
                Ok(true) => ApiResponse::ok(json!({ "removed": id })),
                Ok(false) => ApiResponse::not_found(format!("Game not found: {id}")),
                Err(e) => e.into(),
            },

            ApiRequest::Start {
                resource_id,
                options,
            } => match self.registry.start_instance(&resource_id, options).await {
                Ok(instance) => to_body(&instance),
                Err(e) => e.into(),
            },

            ApiRequest::Stop(id) => match self.registry.stop_instance(&id).await {
                Ok(stopped) => ApiResponse::ok(json!({ "game_id": id, "stopped": stopped })),
                Err(e) => e.into(),
            },

            ApiRequest::ListInstances => to_body(&self.registry.list_active().await),

            ApiRequest::InstanceStats(id) => match self.registry.instance_report(&id).await {
                Some(report) => to_body(&report),
                None => ApiResponse::not_found(format!("No running instance for game: {id}")),
            },
        }
    }
}
