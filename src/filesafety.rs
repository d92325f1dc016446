//! 文件安全校验 - 在任何文件被转发给后端之前执行
//!
//! 流程：URL 校验（SSRF 防护）→ HEAD 探测 → 按扩展名分类限制大小 →
//! 扩展名/MIME 白名单 → 流式下载时二次强制大小上限。
//! 任何一步失败都返回带子原因的 `FileRejected`，不会静默降级。

use std::net::IpAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{DispatchError, FileRejectReason, Result};
use crate::worker::TempArtifact;

/// HEAD 探测超时
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// 下载超时
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// 适配器共用的 HTTP client 构造
///
/// 不跟随重定向：`validate_url` 只校验调用方给的地址，跟随 Location
/// 会让外部 URL 一跳转进内网，绕过主机校验。重定向应答在下载路径
/// 直接按 `FileRejected:host` 拒绝。
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build http client")
}

const MB: u64 = 1024 * 1024;

/// 文件分类，每类有独立的字节上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Video,
    Document,
    Presentation,
    File,
}

impl FileCategory {
    /// 按扩展名（不含点，小写）分类
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => FileCategory::Image,
            "mp4" | "avi" | "mov" | "wmv" | "flv" | "webm" => FileCategory::Video,
            "ppt" | "pptx" => FileCategory::Presentation,
            "pdf" | "doc" | "docx" | "xls" | "xlsx" | "txt" => FileCategory::Document,
            _ => FileCategory::File,
        }
    }

    /// 该分类的大小上限（字节）
    pub fn max_bytes(&self) -> u64 {
        match self {
            FileCategory::Image => 50 * MB,
            FileCategory::Video => 1024 * MB,
            FileCategory::Document => 500 * MB,
            FileCategory::Presentation => 1024 * MB,
            FileCategory::File => 100 * MB,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Document => "document",
            FileCategory::Presentation => "presentation",
            FileCategory::File => "file",
        }
    }
}

/// 后端级别的类型白名单
///
/// 线上格式要求更严格的后端（企业微信机器人只认 mp4 视频、
/// jpg/jpeg/png 图片）用收窄后的列表。
#[derive(Debug, Clone)]
pub struct FileTypePolicy {
    name: &'static str,
    allowed_extensions: &'static [&'static str],
    allowed_mime_prefixes: &'static [&'static str],
}

impl FileTypePolicy {
    /// 企业微信机器人的严格白名单
    pub fn strict_wecom() -> Self {
        Self {
            name: "enterprise-wechat-bot",
            allowed_extensions: &[
                "mp4", "jpg", "jpeg", "png", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
                "pptx", "txt", "mp3", "wav",
            ],
            allowed_mime_prefixes: &[
                "video/mp4",
                "image/jpeg",
                "image/jpg",
                "image/png",
                "audio/mpeg",
                "audio/wav",
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument",
                "application/vnd.ms-excel",
                "application/vnd.ms-powerpoint",
                "text/plain",
            ],
        }
    }

    /// UI 自动化后端的通用白名单（微信客户端自己兜底）
    pub fn generic() -> Self {
        Self {
            name: "personal-wechat",
            allowed_extensions: &[
                "jpg", "jpeg", "png", "gif", "bmp", "webp", "mp4", "avi", "mov", "webm",
                "mp3", "wav", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt",
                "zip", "rar", "7z", "csv", "json", "md",
            ],
            allowed_mime_prefixes: &[
                "image/", "video/", "audio/", "text/", "application/pdf",
                "application/msword", "application/vnd", "application/zip",
                "application/x-rar", "application/x-7z", "application/json",
                "application/octet-stream",
            ],
        }
    }

    /// 扩展名和（已知的）MIME 类型都必须命中白名单
    pub fn check(&self, extension: &str, content_type: Option<&str>) -> Result<()> {
        if !self.allowed_extensions.contains(&extension) {
            return Err(DispatchError::FileRejected {
                reason: FileRejectReason::Type,
                message: format!(
                    "extension '.{extension}' not allowed for {}",
                    self.name
                ),
            });
        }

        // HEAD 失败时类型未知，只按扩展名放行；octet-stream 视为未声明
        if let Some(mime) = content_type {
            let mime = mime.split(';').next().unwrap_or(mime).trim();
            if mime != "application/octet-stream"
                && !self
                    .allowed_mime_prefixes
                    .iter()
                    .any(|prefix| mime.starts_with(prefix))
            {
                return Err(DispatchError::FileRejected {
                    reason: FileRejectReason::Type,
                    message: format!("content type '{mime}' not allowed for {}", self.name),
                });
            }
        }

        Ok(())
    }
}

/// HEAD 探测结果
#[derive(Debug, Clone, Default)]
pub struct FileProbe {
    /// 声明的大小；探测失败或无 Content-Length 时为 None，下载时再验证
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

fn is_forbidden_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_private() // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// URL 校验：仅允许 http/https，拒绝解析到回环或内网的主机
/// （防止本服务被用作内网探测跳板）
pub async fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| DispatchError::FileRejected {
        reason: FileRejectReason::Scheme,
        message: format!("invalid url: {e}"),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DispatchError::FileRejected {
                reason: FileRejectReason::Scheme,
                message: format!("scheme '{other}' is not allowed, use http(s)"),
            });
        }
    }

    let host = url.host().ok_or_else(|| DispatchError::FileRejected {
        reason: FileRejectReason::Host,
        message: "url has no host".to_string(),
    })?;

    match host {
        Host::Ipv4(ip) => {
            if is_forbidden_ip(&IpAddr::V4(ip)) {
                return Err(forbidden_host(&ip.to_string()));
            }
        }
        Host::Ipv6(ip) => {
            if is_forbidden_ip(&IpAddr::V6(ip)) {
                return Err(forbidden_host(&ip.to_string()));
            }
        }
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            if domain == "localhost" {
                return Err(forbidden_host(&domain));
            }
            // 域名要看实际解析结果，否则 DNS 重绑定可以绕过字面检查
            let port = url.port_or_known_default().unwrap_or(80);
            let addrs = tokio::net::lookup_host((domain.as_str(), port))
                .await
                .map_err(|e| DispatchError::FileRejected {
                    reason: FileRejectReason::Host,
                    message: format!("cannot resolve host '{domain}': {e}"),
                })?;
            for addr in addrs {
                if is_forbidden_ip(&addr.ip()) {
                    return Err(forbidden_host(&domain));
                }
            }
        }
    }

    Ok(url)
}

fn forbidden_host(host: &str) -> DispatchError {
    DispatchError::FileRejected {
        reason: FileRejectReason::Host,
        message: format!("host '{host}' resolves to a loopback or private address"),
    }
}

/// HEAD 探测远端大小和类型，不下载 body；失败视为"大小未知，下载时验证"
pub async fn probe(client: &reqwest::Client, url: &Url) -> FileProbe {
    let response = match client
        .head(url.clone())
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            debug!(url = %url, error = %e, "HEAD probe failed, will verify size during download");
            return FileProbe::default();
        }
    };

    // 重定向应答的头部说的是跳转目标，不是文件本身
    if response.status().is_redirection() {
        debug!(url = %url, status = %response.status(), "HEAD probe got a redirect");
        return FileProbe::default();
    }

    let size = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0);
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    FileProbe { size, content_type }
}

/// 从文件名提取扩展名（小写，不含点）
pub fn extension_of(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// 从 URL path 提取扩展名
fn extension_from_url(url: &Url) -> Option<String> {
    extension_of(url.path())
}

/// 常见 Content-Type 到扩展名的映射（原样保留原实现支持的类型）
fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next().unwrap_or(content_type).trim();
    match mime {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "video/mp4" => Some("mp4"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" => Some("wav"),
        "application/pdf" => Some("pdf"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "text/plain" => Some("txt"),
        "application/zip" => Some("zip"),
        _ => None,
    }
}

/// 智能文件名：调用方给的名字缺扩展名时，从 URL path 或
/// Content-Type 补全，保证 worker 拿到的文件名总有正确后缀
pub fn smart_filename(filename: &str, url: Option<&Url>, content_type: Option<&str>) -> String {
    if extension_of(filename).is_some() {
        return filename.to_string();
    }

    if let Some(url) = url {
        if let Some(ext) = extension_from_url(url) {
            if filename.is_empty() {
                // URL path 里自带完整文件名的话直接用
                if let Some(name) = url
                    .path_segments()
                    .and_then(|s| s.last())
                    .filter(|n| extension_of(n).is_some())
                {
                    return name.to_string();
                }
                return format!("file.{ext}");
            }
            return format!("{filename}.{ext}");
        }
    }

    if let Some(ext) = content_type.and_then(extension_from_content_type) {
        if filename.is_empty() {
            return format!("file.{ext}");
        }
        return format!("{filename}.{ext}");
    }

    if filename.is_empty() {
        "file".to_string()
    } else {
        filename.to_string()
    }
}

/// 校验结果：补全后的文件名 + 分类 + 探测信息
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub url: Url,
    pub filename: String,
    pub category: FileCategory,
    pub probe: FileProbe,
}

/// 完整校验一个待下载的远程文件
pub async fn validate_remote(
    client: &reqwest::Client,
    raw_url: &str,
    filename: &str,
    policy: &FileTypePolicy,
) -> Result<ValidatedFile> {
    let url = validate_url(raw_url).await?;
    let probe = probe(client, &url).await;

    let filename = smart_filename(filename, Some(&url), probe.content_type.as_deref());
    let extension = extension_of(&filename).unwrap_or_default();
    let category = FileCategory::from_extension(&extension);

    enforce_declared_size(&probe, category, &filename)?;

    policy.check(&extension, probe.content_type.as_deref())?;

    debug!(
        file = %filename,
        category = category.label(),
        declared_size = ?probe.size,
        "File passed safety validation"
    );

    Ok(ValidatedFile {
        url,
        filename,
        category,
        probe,
    })
}

/// 声明大小超限时直接拒绝，一个字节都不下载
fn enforce_declared_size(
    probe: &FileProbe,
    category: FileCategory,
    filename: &str,
) -> Result<()> {
    if let Some(size) = probe.size {
        if size > category.max_bytes() {
            return Err(DispatchError::FileRejected {
                reason: FileRejectReason::Size,
                message: format!(
                    "{} is {}MB, limit for {} files is {}MB",
                    filename,
                    size / MB,
                    category.label(),
                    category.max_bytes() / MB
                ),
            });
        }
    }
    Ok(())
}

/// 校验一段内联文件数据（无 URL，大小已知）
pub fn validate_inline(
    bytes: &[u8],
    filename: &str,
    declared_mime: Option<&str>,
    policy: &FileTypePolicy,
) -> Result<(String, FileCategory)> {
    let filename = smart_filename(filename, None, declared_mime);
    let extension = extension_of(&filename).unwrap_or_default();
    let category = FileCategory::from_extension(&extension);

    if bytes.len() as u64 > category.max_bytes() {
        return Err(DispatchError::FileRejected {
            reason: FileRejectReason::Size,
            message: format!(
                "{} is {}MB, limit for {} files is {}MB",
                filename,
                bytes.len() as u64 / MB,
                category.label(),
                category.max_bytes() / MB
            ),
        });
    }

    policy.check(&extension, declared_mime)?;
    Ok((filename, category))
}

/// 流式下载到临时文件，边下边数字节：探测时没拿到大小或
/// 声明是假的，超过分类上限立即中断传输
pub async fn download_to_temp(
    client: &reqwest::Client,
    validated: &ValidatedFile,
) -> Result<TempArtifact> {
    download_with_ceiling(
        client,
        &validated.url,
        &validated.filename,
        validated.category.max_bytes(),
        validated.category.label(),
    )
    .await
}

async fn download_with_ceiling(
    client: &reqwest::Client,
    url: &Url,
    filename: &str,
    ceiling: u64,
    category_label: &'static str,
) -> Result<TempArtifact> {
    let response = client
        .get(url.clone())
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|e| DispatchError::BackendUnavailable(format!(
            "download failed: {e}"
        )))?;

    // 重定向目标可能指向内网，不跟随也不重新校验，直接拒绝
    if response.status().is_redirection() {
        return Err(DispatchError::FileRejected {
            reason: FileRejectReason::Host,
            message: format!(
                "download responded {} with a redirect, redirects are not followed",
                response.status()
            ),
        });
    }

    let response = response
        .error_for_status()
        .map_err(|e| DispatchError::BackendUnavailable(format!(
            "download failed: {e}"
        )))?;

    let path = TempArtifact::unique_path(filename);
    let mut artifact = TempArtifact::adopt(path.clone());

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| DispatchError::BackendUnavailable(format!(
            "cannot create temp file: {e}"
        )))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                artifact.cleanup().await;
                return Err(DispatchError::BackendUnavailable(format!(
                    "download interrupted: {e}"
                )));
            }
        };
        downloaded += chunk.len() as u64;
        if downloaded > ceiling {
            warn!(
                file = %filename,
                downloaded,
                ceiling,
                "Download exceeded category ceiling, aborting transfer"
            );
            artifact.cleanup().await;
            return Err(DispatchError::FileRejected {
                reason: FileRejectReason::Size,
                message: format!(
                    "download exceeded {}MB limit for {category_label} files",
                    ceiling / MB
                ),
            });
        }
        if let Err(e) = file.write_all(&chunk).await {
            artifact.cleanup().await;
            return Err(DispatchError::BackendUnavailable(format!(
                "cannot write temp file: {e}"
            )));
        }
    }

    file.flush().await.ok();
    debug!(file = %filename, bytes = downloaded, "Download complete");
    Ok(artifact)
}
