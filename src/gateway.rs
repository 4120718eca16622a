/// REST gateway: CRUD calls against the task backend.
///
/// Each call is a single attempt: no retry, no caching. Every failure is
/// mapped to the `SyncError` variant of the operation that produced it.
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::task::{DonePatch, NewTask, Task, TaskUpdate};

/// Backend operations the sync pipeline depends on.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    /// `GET /tasks`
    async fn fetch_tasks(&self) -> SyncResult<Vec<Task>>;

    /// `POST /tasks`. The created task is only observed through a later fetch.
    async fn create_task(&self, task: &NewTask) -> SyncResult<()>;

    /// `DELETE /tasks/{id}`
    async fn delete_task(&self, id: &str) -> SyncResult<()>;

    /// `PUT /tasks/{id}` with `{"done": true}`
    async fn set_done(&self, id: &str) -> SyncResult<()>;

    /// `PUT /tasks/{id}` with every editable field
    async fn update_task(&self, id: &str, update: &TaskUpdate) -> SyncResult<()>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct RestGateway {
    http: reqwest::Client,
    base_url: Url,
}

impl RestGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid backend URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Backend URL cannot carry a path: {base_url}");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    /// `{base}/tasks[/{id}]` with the id percent-encoded as a single segment.
    fn tasks_url(&self, id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new(), so this always succeeds
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("tasks");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url
    }
}

/// Turn a non-2xx response into a readable reason, keeping the body short.
async fn status_reason(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let body = body.trim();
    if status == StatusCode::NOT_FOUND {
        return "task not found (404)".to_string();
    }
    if body.is_empty() {
        status.to_string()
    } else {
        let short: String = body.chars().take(200).collect();
        format!("{status}: {short}")
    }
}

#[async_trait]
impl TaskGateway for RestGateway {
    async fn fetch_tasks(&self) -> SyncResult<Vec<Task>> {
        let url = self.tasks_url(None);
        debug!(%url, "GET tasks");
        let fetch_err = |reason: String| SyncError::Fetch { reason };

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fetch_err(status_reason(resp).await));
        }
        // Backends without any documents answer `null`
        let tasks: Option<Vec<Task>> = resp
            .json()
            .await
            .map_err(|e| fetch_err(format!("invalid task list: {e}")))?;
        Ok(tasks.unwrap_or_default())
    }

    async fn create_task(&self, task: &NewTask) -> SyncResult<()> {
        let url = self.tasks_url(None);
        debug!(%url, title = %task.title, "POST task");
        let resp = self
            .http
            .post(url)
            .json(task)
            .send()
            .await
            .map_err(|e| SyncError::Create { reason: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(SyncError::Create { reason: status_reason(resp).await });
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> SyncResult<()> {
        let delete_err = |reason: String| SyncError::Delete { id: id.to_string(), reason };
        if id.is_empty() {
            return Err(delete_err("missing task id".to_string()));
        }
        let url = self.tasks_url(Some(id));
        debug!(%url, "DELETE task");
        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| delete_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(delete_err(status_reason(resp).await));
        }
        Ok(())
    }

    async fn set_done(&self, id: &str) -> SyncResult<()> {
        self.put(id, &DonePatch::DONE).await
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> SyncResult<()> {
        self.put(id, update).await
    }
}

impl RestGateway {
    async fn put<B: serde::Serialize + Sync>(&self, id: &str, body: &B) -> SyncResult<()> {
        let update_err = |reason: String| SyncError::Update { id: id.to_string(), reason };
        if id.is_empty() {
            return Err(update_err("missing task id".to_string()));
        }
        let url = self.tasks_url(Some(id));
        debug!(%url, "PUT task");
        let resp = self
            .http
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| update_err(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(update_err(status_reason(resp).await));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer) -> RestGateway {
        RestGateway::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_tasks_url_handles_trailing_slash_and_encodes_id() {
        let gw = RestGateway::new("http://localhost:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(gw.tasks_url(None).as_str(), "http://localhost:8080/api/tasks");
        assert_eq!(
            gw.tasks_url(Some("a b/c")).as_str(),
            "http://localhost:8080/api/tasks/a%20b%2Fc"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(RestGateway::new("not a url", Duration::from_secs(1)).is_err());
        assert!(RestGateway::new("mailto:me@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_fetch_tasks_parses_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "1", "title": "A", "description": "", "done": false},
                {"_id": "2", "title": "B", "done": true}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let tasks = gateway(&server).fetch_tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "1");
        assert_eq!(tasks[1].id, "2");
        assert!(tasks[1].done);
    }

    #[tokio::test]
    async fn test_fetch_tasks_null_body_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("null", "application/json"))
            .mount(&server)
            .await;

        let tasks = gateway(&server).fetch_tasks().await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_tasks_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(500).set_body_string("Failed to fetch tasks"))
            .mount(&server)
            .await;

        let err = gateway(&server).fetch_tasks().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_fetch_tasks_garbage_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = gateway(&server).fetch_tasks().await.unwrap_err();
        assert!(matches!(err, SyncError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_create_task_posts_title_and_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .and(body_json(serde_json::json!({"title": "Buy milk", "description": "for breakfast"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"message": "Task created successfully"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let body = NewTask {
            title: "Buy milk".to_string(),
            description: "for breakfast".to_string(),
        };
        gateway(&server).create_task(&body).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_task_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Invalid input"))
            .mount(&server)
            .await;

        let body = NewTask { title: "x".to_string(), description: String::new() };
        let err = gateway(&server).create_task(&body).await.unwrap_err();
        assert!(matches!(err, SyncError::Create { .. }));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).delete_task("1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_task() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/tasks/nope"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = gateway(&server).delete_task("nope").await.unwrap_err();
        match err {
            SyncError::Delete { id, reason } => {
                assert_eq!(id, "nope");
                assert!(reason.contains("404"));
            }
            other => panic!("expected delete error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_empty_id_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = gateway(&server).delete_task("").await.unwrap_err();
        assert!(matches!(err, SyncError::Delete { .. }));
    }

    #[tokio::test]
    async fn test_set_done_sends_partial_update() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tasks/7"))
            .and(body_json(serde_json::json!({"done": true})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        gateway(&server).set_done("7").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_task_failure_maps_to_update_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tasks/7"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let update = TaskUpdate {
            title: "A".to_string(),
            description: String::new(),
            done: false,
        };
        let err = gateway(&server).update_task("7", &update).await.unwrap_err();
        assert!(matches!(err, SyncError::Update { .. }));
    }
}
