use crate::constants::api::{endpoints, http};
use crate::error::{BackupError, Result};
use crate::reporter::ProgressSink;
use crate::sync::{HostRegistrar, TaskSource};
use crate::task::{BackupState, BackupTask};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// 中央服务器的统一响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl ApiResult {
    fn failure(message: String) -> Self {
        Self {
            success: false,
            message: Some(message),
            data: None,
        }
    }
}

/// 进度上报请求
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackupProgressRequest<'a> {
    pub hypervisor: &'a str,
    pub backup_states: Vec<BackupState>,
}

/// 主机信息上报请求
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HypervisorRequest<'a> {
    pub hypervisor: &'a str,
    pub virtual_machines: Vec<String>,
    pub backup_task: String,
}

/// 中央服务器客户端
#[derive(Debug, Clone)]
pub struct CentralServer {
    client: Client,
    base_url: String,
}

impl CentralServer {
    /// 创建客户端；`base_url` 末尾的 '/' 会被去掉
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackupError::validation("central server url is empty"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(http::USER_AGENT)
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// 存活探测，任何错误都视为不可达
    pub async fn ping(&self) -> bool {
        let url = self.endpoint_url(endpoints::PING);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(http::PING_TIMEOUT))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %url, error = %e, "中央服务器不可达");
                false
            }
        }
    }

    /// 获取指定主机的备份任务
    pub async fn get_backup_task(&self, hypervisor: &str) -> Result<ApiResult> {
        if hypervisor.trim().is_empty() {
            return Err(BackupError::validation("hypervisor name is empty"));
        }

        let url = self.endpoint_url(endpoints::GET_BACKUP_TASK);
        let response = self
            .client
            .get(&url)
            .query(&[("hypervisor", hypervisor)])
            .send()
            .await?;
        Self::parse_response(&url, response).await
    }

    pub async fn send_backup_progress(&self, request: &BackupProgressRequest<'_>) -> Result<ApiResult> {
        self.post(endpoints::SEND_BACKUP_PROGRESS, request).await
    }

    pub async fn update_hypervisor(&self, request: &HypervisorRequest<'_>) -> Result<ApiResult> {
        self.post(endpoints::UPDATE_HYPERVISOR, request).await
    }

    async fn post<T: Serialize + ?Sized>(&self, endpoint: &str, body: &T) -> Result<ApiResult> {
        let url = self.endpoint_url(endpoint);
        let response = self.client.post(&url).json(body).send().await?;
        Self::parse_response(&url, response).await
    }

    /// 非 2xx 响应转换为失败的 ApiResult，而不是错误
    async fn parse_response(url: &str, response: Response) -> Result<ApiResult> {
        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            warn!(url = %url, status = %status, "中央服务器返回错误状态");
            return Ok(ApiResult::failure(format!(
                "StatusCode: {}, ReasonPhrase: {}, Url: {}",
                status.as_u16(),
                reason,
                url
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait::async_trait]
impl TaskSource for CentralServer {
    async fn reachable(&self) -> bool {
        self.ping().await
    }

    async fn fetch_task(&self, hypervisor: &str) -> Result<Option<BackupTask>> {
        let result = self.get_backup_task(hypervisor).await?;
        if !result.success {
            return Err(BackupError::sync(
                result
                    .message
                    .unwrap_or_else(|| "获取备份任务失败".to_string()),
            ));
        }

        match result.data.as_deref().map(str::trim) {
            Some(data) if !data.is_empty() => Ok(Some(BackupTask::from_json(data)?)),
            _ => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ProgressSink for CentralServer {
    async fn reachable(&self) -> bool {
        self.ping().await
    }

    async fn push(&self, hypervisor: &str, states: Vec<BackupState>) -> Result<ApiResult> {
        let request = BackupProgressRequest {
            hypervisor,
            backup_states: states,
        };
        self.send_backup_progress(&request).await
    }
}

#[async_trait::async_trait]
impl HostRegistrar for CentralServer {
    async fn register(
        &self,
        hypervisor: &str,
        machines: Vec<String>,
        task: &BackupTask,
    ) -> Result<ApiResult> {
        if !self.ping().await {
            return Ok(ApiResult::failure(format!(
                "central server {} is not reachable",
                self.base_url
            )));
        }

        let request = HypervisorRequest {
            hypervisor,
            virtual_machines: machines,
            backup_task: task.to_json()?,
        };
        self.update_hypervisor(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let server = CentralServer::new("http://central:5000/", 5).unwrap();
        assert_eq!(server.base_url(), "http://central:5000");
        assert_eq!(
            server.endpoint_url(endpoints::PING),
            "http://central:5000/api/ping"
        );
        assert!(CentralServer::new("  ", 5).unwrap_err().is_validation());
    }

    #[test]
    fn test_api_result_format() {
        let result: ApiResult =
            serde_json::from_str(r#"{"Success": true, "Message": null, "Data": "{}"}"#).unwrap();
        assert!(result.success);
        assert_eq!(result.data.as_deref(), Some("{}"));

        let empty: ApiResult = serde_json::from_str("{}").unwrap();
        assert!(!empty.success);
    }

    #[test]
    fn test_progress_request_shape() {
        let request = BackupProgressRequest {
            hypervisor: "hv01",
            backup_states: Vec::new(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["Hypervisor"], "hv01");
        assert!(json["BackupStates"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // 端口 9 (discard) 上通常没有 HTTP 服务
        let server = CentralServer::new("http://127.0.0.1:9", 1).unwrap();
        assert!(!server.ping().await);
    }
}
