//! 托管平台文件接口：按文件标识下载 / 删除

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait RemoteFiles: Send + Sync {
    async fn download(&self, file_id: &str) -> anyhow::Result<RemoteFile>;

    async fn delete(&self, file_id: &str) -> anyhow::Result<()>;
}
