use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;

use crate::{
    model::rbac::{NamedInput, Permission, Role, User, UserInput, opaque_id},
    rbac::RbacError,
    sync::client::{ApiClient, ApiRequest},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RolePermissionAssignment {
    #[serde(deserialize_with = "opaque_id")]
    pub role_id: String,
    #[serde(deserialize_with = "opaque_id")]
    pub permission_id: String,
}

#[derive(Deserialize, Debug)]
struct AssignmentList {
    #[serde(default)]
    assignments: Vec<RolePermissionAssignment>,
}

/// Admin backend for users, roles, permissions and their relations.
#[async_trait]
pub trait RbacApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, RbacError>;
    async fn create_user(&self, input: &UserInput) -> Result<User, RbacError>;
    async fn update_user(&self, id: &str, input: &UserInput) -> Result<User, RbacError>;
    async fn delete_user(&self, id: &str) -> Result<(), RbacError>;
    async fn profile(&self) -> Result<User, RbacError>;
    async fn update_profile(&self, input: &UserInput) -> Result<User, RbacError>;

    async fn list_roles(&self) -> Result<Vec<Role>, RbacError>;
    async fn create_role(&self, input: &NamedInput) -> Result<Role, RbacError>;
    async fn update_role(&self, id: &str, input: &NamedInput) -> Result<Role, RbacError>;
    async fn delete_role(&self, id: &str) -> Result<(), RbacError>;

    async fn list_permissions(&self) -> Result<Vec<Permission>, RbacError>;
    async fn create_permission(&self, input: &NamedInput) -> Result<Permission, RbacError>;
    async fn update_permission(&self, id: &str, input: &NamedInput) -> Result<Permission, RbacError>;
    async fn delete_permission(&self, id: &str) -> Result<(), RbacError>;

    async fn role_permissions(&self) -> Result<Vec<RolePermissionAssignment>, RbacError>;
    async fn assign_permission(&self, role_id: &str, permission_id: &str) -> Result<(), RbacError>;
    async fn remove_permission(&self, role_id: &str, permission_id: &str) -> Result<(), RbacError>;

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, RbacError>;
    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), RbacError>;
    async fn remove_role(&self, user_id: &str, role_id: &str) -> Result<(), RbacError>;
}

#[derive(Clone)]
pub struct HttpRbacClient {
    client: ApiClient,
}

impl HttpRbacClient {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest, fallback: &str) -> Result<T, RbacError> {
        self.client
            .send_json(&request)
            .await
            .map_err(|e| RbacError::Api(e.message_or(fallback)))
    }

    async fn execute(&self, request: ApiRequest, fallback: &str) -> Result<(), RbacError> {
        self.client
            .send(&request)
            .await
            .map_err(|e| RbacError::Api(e.message_or(fallback)))
    }

    fn body<T: Serialize>(input: &T) -> Result<serde_json::Value, RbacError> {
        serde_json::to_value(input).map_err(|e| RbacError::Api(e.to_string()))
    }
}

#[async_trait]
impl RbacApi for HttpRbacClient {
    async fn list_users(&self) -> Result<Vec<User>, RbacError> {
        self.fetch(ApiRequest::get("/users"), "Failed to fetch users").await
    }

    async fn create_user(&self, input: &UserInput) -> Result<User, RbacError> {
        self.fetch(ApiRequest::post("/users", Self::body(input)?), "Failed to create user")
            .await
    }

    async fn update_user(&self, id: &str, input: &UserInput) -> Result<User, RbacError> {
        self.fetch(
            ApiRequest::put(format!("/users/{}", id), Self::body(input)?),
            "Failed to update user",
        )
        .await
    }

    async fn delete_user(&self, id: &str) -> Result<(), RbacError> {
        self.execute(ApiRequest::delete(format!("/users/{}", id)), "Failed to delete user")
            .await
    }

    async fn profile(&self) -> Result<User, RbacError> {
        self.fetch(ApiRequest::get("/users/profile"), "Failed to fetch profile").await
    }

    async fn update_profile(&self, input: &UserInput) -> Result<User, RbacError> {
        self.fetch(
            ApiRequest::put("/users/profile", Self::body(input)?),
            "Failed to update profile",
        )
        .await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, RbacError> {
        self.fetch(ApiRequest::get("/roles"), "Failed to fetch roles").await
    }

    async fn create_role(&self, input: &NamedInput) -> Result<Role, RbacError> {
        self.fetch(ApiRequest::post("/roles", Self::body(input)?), "Failed to create role")
            .await
    }

    async fn update_role(&self, id: &str, input: &NamedInput) -> Result<Role, RbacError> {
        self.fetch(
            ApiRequest::put(format!("/roles/{}", id), Self::body(input)?),
            "Failed to update role",
        )
        .await
    }

    async fn delete_role(&self, id: &str) -> Result<(), RbacError> {
        self.execute(ApiRequest::delete(format!("/roles/{}", id)), "Failed to delete role")
            .await
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, RbacError> {
        self.fetch(ApiRequest::get("/permissions"), "Failed to fetch permissions")
            .await
    }

    async fn create_permission(&self, input: &NamedInput) -> Result<Permission, RbacError> {
        self.fetch(
            ApiRequest::post("/permissions", Self::body(input)?),
            "Failed to create permission",
        )
        .await
    }

    async fn update_permission(&self, id: &str, input: &NamedInput) -> Result<Permission, RbacError> {
        self.fetch(
            ApiRequest::put(format!("/permissions/{}", id), Self::body(input)?),
            "Failed to update permission",
        )
        .await
    }

    async fn delete_permission(&self, id: &str) -> Result<(), RbacError> {
        self.execute(
            ApiRequest::delete(format!("/permissions/{}", id)),
            "Failed to delete permission",
        )
        .await
    }

    async fn role_permissions(&self) -> Result<Vec<RolePermissionAssignment>, RbacError> {
        let list: AssignmentList = self
            .fetch(ApiRequest::get("/roles/permissions"), "Failed to load RBAC matrix")
            .await?;
        Ok(list.assignments)
    }

    async fn assign_permission(&self, role_id: &str, permission_id: &str) -> Result<(), RbacError> {
        self.execute(
            ApiRequest::post(
                format!("/roles/{}/permissions", role_id),
                json!({ "permissionId": permission_id }),
            ),
            "Failed to update permission",
        )
        .await
    }

    async fn remove_permission(&self, role_id: &str, permission_id: &str) -> Result<(), RbacError> {
        self.execute(
            ApiRequest::delete(format!("/roles/{}/permissions/{}", role_id, permission_id)),
            "Failed to update permission",
        )
        .await
    }

    async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>, RbacError> {
        self.fetch(
            ApiRequest::get(format!("/users/{}/roles", user_id)),
            "Failed to fetch user roles",
        )
        .await
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), RbacError> {
        self.execute(
            ApiRequest::post(format!("/users/{}/roles", user_id), json!({ "roleId": role_id })),
            "Failed to assign role",
        )
        .await
    }

    async fn remove_role(&self, user_id: &str, role_id: &str) -> Result<(), RbacError> {
        self.execute(
            ApiRequest::delete(format!("/users/{}/roles", user_id)).with_body(json!({ "roleId": role_id })),
            "Failed to remove role",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::client::{
        Method,
        testing::{ScriptedTransport, client_with},
    };

    #[tokio::test]
    async fn lists_users() {
        let transport = ScriptedTransport::new();
        transport.push(200, json!([{ "id": 7, "name": "Sam", "email": "sam@example.org" }]));
        let api = HttpRbacClient::new(client_with(transport.clone(), Some("tok")).await);

        let users = api.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "7");
        assert_eq!(users[0].display_name(), "Sam");
        assert!(transport.requests()[0].url.ends_with("/users"));
    }

    #[tokio::test]
    async fn failures_carry_server_message_or_default() {
        let transport = ScriptedTransport::new();
        transport
            .push(403, json!({ "error": "Admins only" }))
            .push(400, json!({}));
        let api = HttpRbacClient::new(client_with(transport, Some("tok")).await);

        assert_eq!(
            api.create_role(&NamedInput {
                name: "Usher".to_string(),
                description: None
            })
            .await,
            Err(RbacError::Api("Admins only".to_string()))
        );
        assert_eq!(
            api.list_permissions().await,
            Err(RbacError::Api("Failed to fetch permissions".to_string()))
        );
    }

    #[tokio::test]
    async fn relation_endpoints() {
        let transport = ScriptedTransport::new();
        let (role, perm, user) = ("usher", "cues.edit", "u-19");
        transport
            .push(200, json!({ "assignments": [{ "role_id": role, "permission_id": 12 }] }))
            .push(201, json!({}))
            .push(200, json!({}))
            .push(200, json!({}));
        let api = HttpRbacClient::new(client_with(transport.clone(), Some("tok")).await);

        assert_eq!(
            api.role_permissions().await.unwrap(),
            vec![RolePermissionAssignment {
                role_id: role.to_string(),
                permission_id: "12".to_string()
            }]
        );
        api.assign_permission(role, perm).await.unwrap();
        api.remove_permission(role, perm).await.unwrap();
        api.remove_role(user, role).await.unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].body.as_ref().unwrap()["permissionId"], perm);
        assert!(requests[2].url.ends_with(&format!("/roles/{}/permissions/{}", role, perm)));
        assert_eq!(requests[3].method, Method::Delete);
        assert_eq!(requests[3].body.as_ref().unwrap()["roleId"], role);
    }
}
