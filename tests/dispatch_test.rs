//! 分发门面的集成测试 - 用可编程 mock 适配器验证路由和批量语义

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use message_bridge::batch::BatchOptions;
use message_bridge::dispatch::{Dispatcher, SendFileRequest, SendTextRequest};
use message_bridge::error::{DispatchError, Result};
use message_bridge::provider::{
    FileRef, Provider, ProviderRegistry, ProviderStatus, SendOutcome, Target, TargetKind,
};

/// 记录每次发送的 mock 适配器
#[derive(Debug)]
struct RecordingProvider {
    name: &'static str,
    sent_to: Mutex<Vec<Option<String>>>,
    files: Mutex<Vec<FileRef>>,
    send_count: AtomicUsize,
    fail_targets: Vec<&'static str>,
}

impl RecordingProvider {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            sent_to: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            send_count: AtomicUsize::new(0),
            fail_targets: Vec::new(),
        }
    }

    fn failing_on(name: &'static str, targets: Vec<&'static str>) -> Self {
        Self {
            fail_targets: targets,
            ..Self::new(name)
        }
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        self.name
    }
    fn display_name(&self) -> &str {
        "Mock"
    }
    fn features(&self) -> Vec<&'static str> {
        vec!["text", "file"]
    }

    async fn send_text(&self, target: &Target, _text: &str) -> Result<SendOutcome> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.sent_to.lock().unwrap().push(target.id.clone());
        if let Some(id) = target.id.as_deref() {
            if self.fail_targets.contains(&id) {
                return Err(DispatchError::BackendUnavailable(format!("{id} unreachable")));
            }
        }
        Ok(SendOutcome {
            message_id: Some(format!("mock_{}", self.send_count.load(Ordering::SeqCst))),
            message: None,
        })
    }

    async fn send_file(&self, target: &Target, file: &FileRef) -> Result<SendOutcome> {
        self.sent_to.lock().unwrap().push(target.id.clone());
        self.files.lock().unwrap().push(file.clone());
        Ok(SendOutcome {
            message_id: Some("mock_file_1".to_string()),
            message: None,
        })
    }

    async fn health_check(&self) -> ProviderStatus {
        ProviderStatus::ok(true)
    }
}

fn make_dispatcher(provider: Arc<RecordingProvider>) -> Dispatcher {
    let mut registry = ProviderRegistry::new();
    registry.register(provider);
    Dispatcher::new(Arc::new(registry))
}

fn text_request(service: &str) -> SendTextRequest {
    serde_json::from_value(serde_json::json!({
        "service": service,
        "text": "hello",
    }))
    .unwrap()
}

#[tokio::test]
async fn test_filehelper_scenario() {
    // 发 "hello" 到 filehelper，适配器已配置
    let provider = Arc::new(RecordingProvider::new("enterprise-wechat-bot"));
    let dispatcher = make_dispatcher(provider.clone());

    let mut request = text_request("enterprise-wechat-bot");
    request.to_type = Some(TargetKind::FileHelper);

    let result = dispatcher.send_text(request).await.unwrap();
    assert!(result.success);
    assert_eq!(result.service, "enterprise-wechat-bot");
    // filehelper 忽略 id
    assert_eq!(provider.sent_to.lock().unwrap().as_slice(), &[None]);
}

#[tokio::test]
async fn test_batch_partial_failure_scenario() {
    // A/B/C 三个目标，B 失败：summary {3,2,1}，B 的明细带错误
    let provider = Arc::new(RecordingProvider::failing_on("personal-wechat", vec!["B"]));
    let dispatcher = make_dispatcher(provider.clone());

    let request: SendTextRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "text": "broadcast",
        "toType": "contact",
        "toIds": ["A", "B", "C"],
        "batchOptions": {"sendDelay": 1, "randomDelay": false},
    }))
    .unwrap();

    let result = dispatcher.send_text(request).await.unwrap();
    let summary = result.summary.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 1);

    let per_target = result.per_target.unwrap();
    assert_eq!(per_target[1].to_id, "B");
    assert!(!per_target[1].success);
    assert!(per_target[1].error.as_deref().unwrap().contains("unreachable"));
}

#[tokio::test]
async fn test_batch_preserves_order_and_duplicates() {
    // toIds 不要求去重：顺序即发送顺序
    let provider = Arc::new(RecordingProvider::new("personal-wechat"));
    let dispatcher = make_dispatcher(provider.clone());

    let request: SendTextRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "text": "hi",
        "toType": "room",
        "toIds": ["group-1", "group-1", "group-2"],
        "batchOptions": {"sendDelay": 1, "randomDelay": false},
    }))
    .unwrap();

    let result = dispatcher.send_text(request).await.unwrap();
    assert_eq!(result.summary.unwrap().total, 3);

    let sent = provider.sent_to.lock().unwrap();
    assert_eq!(
        sent.as_slice(),
        &[
            Some("group-1".to_string()),
            Some("group-1".to_string()),
            Some("group-2".to_string())
        ]
    );
}

#[tokio::test]
async fn test_batch_options_default_when_omitted() {
    let provider = Arc::new(RecordingProvider::new("personal-wechat"));
    let dispatcher = make_dispatcher(provider.clone());

    // 单目标列表走直接路径，不经过批量延迟
    let request: SendTextRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "text": "hi",
        "toType": "contact",
        "toIds": ["only-one"],
    }))
    .unwrap();

    let start = std::time::Instant::now();
    let result = dispatcher.send_text(request).await.unwrap();
    assert!(result.success);
    assert!(result.summary.is_none());
    assert!(start.elapsed() < std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_inline_file_data_decoded_for_provider() {
    let provider = Arc::new(RecordingProvider::new("personal-wechat"));
    let dispatcher = make_dispatcher(provider.clone());

    let request: SendFileRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "fileData": "aGVsbG8gd29ybGQ=",
        "filename": "greeting.txt",
        "toType": "contact",
        "toId": "张三",
        "caption": "见附件",
    }))
    .unwrap();

    let result = dispatcher.send_file(request).await.unwrap();
    assert!(result.success);

    let files = provider.files.lock().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].inline_data.as_deref(), Some(b"hello world".as_slice()));
    assert_eq!(files[0].filename, "greeting.txt");
    assert_eq!(files[0].caption.as_deref(), Some("见附件"));
    assert!(files[0].url.is_none());
}

#[tokio::test]
async fn test_bad_base64_rejected_before_provider() {
    let provider = Arc::new(RecordingProvider::new("personal-wechat"));
    let dispatcher = make_dispatcher(provider.clone());

    let request: SendFileRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "fileData": "!!! not base64 !!!",
        "filename": "x.bin",
    }))
    .unwrap();

    let err = dispatcher.send_file(request).await.unwrap_err();
    assert_eq!(err.code(), "ValidationError");
    assert!(provider.files.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_file_send_fans_out() {
    let provider = Arc::new(RecordingProvider::new("personal-wechat"));
    let dispatcher = make_dispatcher(provider.clone());

    let request: SendFileRequest = serde_json::from_value(serde_json::json!({
        "service": "personal-wechat",
        "fileData": "ZGF0YQ==",
        "filename": "f.txt",
        "toType": "contact",
        "toIds": ["A", "B"],
        "batchOptions": {"sendDelay": 1, "randomDelay": false},
    }))
    .unwrap();

    let result = dispatcher.send_file(request).await.unwrap();
    assert_eq!(result.summary.unwrap().total, 2);
    assert_eq!(provider.files.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_default_batch_options_parse() {
    let options: BatchOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(options.send_delay, 3);
    assert!(options.random_delay);
}
