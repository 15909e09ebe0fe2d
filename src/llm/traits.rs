//! 模型调用回调抽象
//!
//! 编排层自身从不发起网络请求：调用方注入一个 ModelClient，接收完整有序的消息列表与请求参数，
//! 返回内容块 + 完成信号，或一段失败原因。

use std::future::Future;

use async_trait::async_trait;

use crate::llm::{Message, ModelRequest, ModelResponse};

/// 模型调用回调
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, messages: &[Message], request: &ModelRequest)
        -> Result<ModelResponse, String>;
}

/// 将异步闭包包装为 ModelClient
pub struct FnModelClient<F> {
    f: F,
}

/// `model_fn(|messages, request| async move { ... })`
pub fn model_fn<F, Fut>(f: F) -> FnModelClient<F>
where
    F: Fn(Vec<Message>, ModelRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ModelResponse, String>> + Send,
{
    FnModelClient { f }
}

#[async_trait]
impl<F, Fut> ModelClient for FnModelClient<F>
where
    F: Fn(Vec<Message>, ModelRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ModelResponse, String>> + Send,
{
    async fn call(
        &self,
        messages: &[Message],
        request: &ModelRequest,
    ) -> Result<ModelResponse, String> {
        (self.f)(messages.to_vec(), request.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ContentBlock, StopReason};

    #[tokio::test]
    async fn test_model_fn_sees_messages() {
        let client = model_fn(|messages, _request| async move {
            Ok(ModelResponse::new(
                vec![ContentBlock::text(format!("{} messages", messages.len()))],
                StopReason::EndTurn,
            ))
        });
        let resp = client
            .call(&[Message::user("hi")], &ModelRequest::default())
            .await
            .unwrap();
        assert_eq!(resp.text(), "1 messages");
    }
}
