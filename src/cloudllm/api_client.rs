//! Control-plane REST client (§6).
//!
//! Everything here is a thin wrapper over the documented surface; the control-plane server
//! itself is out of scope for this crate.

use crate::clients::common::get_shared_http_client;
use crate::ticket::{Subtask, SubtaskStatus, Task, Ticket};
use serde::Serialize;
use std::error::Error;

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            base_url: server_url.trim_end_matches('/').to_string(),
            http: get_shared_http_client().clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, Box<dyn Error>> {
        let resp = self
            .http
            .get(self.url(&format!("/api/tickets/{}", ticket_id)))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json::<Ticket>().await?)
    }

    pub async fn set_status(
        &self,
        ticket_id: &str,
        status: &str,
    ) -> Result<Ticket, Box<dyn Error>> {
        self.patch(&format!("/api/tickets/{}/status", ticket_id), &serde_json::json!({ "status": status }))
            .await
    }

    pub async fn set_branch(
        &self,
        ticket_id: &str,
        branch_name: &str,
    ) -> Result<Ticket, Box<dyn Error>> {
        self.patch(
            &format!("/api/tickets/{}/branch", ticket_id),
            &serde_json::json!({ "branchName": branch_name }),
        )
        .await
    }

    pub async fn set_cost(&self, ticket_id: &str, cost: f64) -> Result<Ticket, Box<dyn Error>> {
        self.patch(&format!("/api/tickets/{}/cost", ticket_id), &serde_json::json!({ "cost": cost }))
            .await
    }

    pub async fn add_task(&self, ticket_id: &str, task: &Task) -> Result<Ticket, Box<dyn Error>> {
        self.post(&format!("/api/tickets/{}/tasks", ticket_id), &serde_json::json!({ "task": task }))
            .await
    }

    pub async fn add_subtask(
        &self,
        ticket_id: &str,
        task_id: &str,
        subtask: &Subtask,
    ) -> Result<Ticket, Box<dyn Error>> {
        self.post(
            &format!("/api/tickets/{}/tasks/{}/subtasks", ticket_id, task_id),
            &serde_json::json!({ "subtask": subtask }),
        )
        .await
    }

    pub async fn update_subtask_status(
        &self,
        ticket_id: &str,
        task_id: &str,
        subtask_id: &str,
        status: SubtaskStatus,
    ) -> Result<Ticket, Box<dyn Error>> {
        self.patch(
            &format!(
                "/api/tickets/{}/tasks/{}/subtasks/{}",
                ticket_id, task_id, subtask_id
            ),
            &serde_json::json!({ "status": status }),
        )
        .await
    }

    pub async fn delete_all_tasks(&self, ticket_id: &str) -> Result<Ticket, Box<dyn Error>> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/tickets/{}/tasks", ticket_id)))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json::<Ticket>().await?)
    }

    pub async fn post_activity(&self, ticket_id: &str, message: &str) -> Result<(), Box<dyn Error>> {
        self.http
            .post(self.url(&format!("/api/tickets/{}/activity", ticket_id)))
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn patch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, Box<dyn Error>> {
        let resp = self.http.patch(self.url(path)).json(body).send().await?;
        Ok(resp.error_for_status()?.json::<T>().await?)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, Box<dyn Error>> {
        let resp = self.http.post(self.url(path)).json(body).send().await?;
        Ok(resp.error_for_status()?.json::<T>().await?)
    }
}
