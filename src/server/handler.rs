//! Per-request pipeline: dispatch by hook ID, parse the body, evaluate the
//! trigger rule and run the hook's command in the configured response mode.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Response, StatusCode, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::response::{
    sanitize_status, stream_body, text_response, ResponseBody, COMMAND_FAILED_BODY,
    HOOK_NOT_FOUND_BODY, RULES_ERROR_BODY, RULES_NOT_SATISFIED_BODY,
};
use super::streaming::{stream_channel, ChunkFrameStream, StreamChunk, DEFAULT_STREAM_BUFFER_SIZE};
use crate::config::ServerConfig;
use crate::core::request::HookRequest;
use crate::executor::CommandExecutor;
use crate::hook::Hook;
use crate::payload;
use crate::registry::HookRegistry;

/// Shared state for request handling.
pub struct RequestPipeline {
    registry: Arc<HookRegistry>,
    url_prefix: String,
    default_methods: Vec<String>,
    response_headers: Vec<(String, String)>,
    multipart_max_memory: u64,
}

impl RequestPipeline {
    pub fn new(registry: Arc<HookRegistry>, config: &ServerConfig) -> Self {
        Self {
            registry,
            url_prefix: config.url_prefix.clone(),
            default_methods: config.default_http_methods.clone(),
            response_headers: config.response_headers.clone(),
            multipart_max_memory: config.multipart_max_memory,
        }
    }

    /// Handle one HTTP request.
    pub async fn handle(
        &self,
        req: http::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<ResponseBody> {
        let path = req.uri().path().to_string();

        // Healthcheck endpoint.
        if path == "/" {
            return text_response(StatusCode::OK, &self.response_headers, "OK");
        }

        let Some(hook_id) = self.hook_id_from_path(&path) else {
            return text_response(StatusCode::NOT_FOUND, &[], HOOK_NOT_FOUND_BODY);
        };

        let request_id = Uuid::new_v4().simple().to_string();
        info!(
            request_id = %request_id,
            method = %req.method(),
            path = %path,
            remote_addr = %remote_addr,
            "incoming HTTP request"
        );

        let Some(hook) = self.registry.get(&hook_id) else {
            return text_response(StatusCode::NOT_FOUND, &[], HOOK_NOT_FOUND_BODY);
        };
        info!(request_id = %request_id, hook_id = %hook.id, "hook matched");

        if !self.is_method_allowed(&hook, req.method().as_str()) {
            warn!(request_id = %request_id, method = %req.method(),
                "HTTP method not allowed for this hook");
            return text_response(StatusCode::METHOD_NOT_ALLOWED, &[], "");
        }

        let version = req.version();
        let mut request = self
            .build_hook_request(request_id, req, remote_addr, &hook)
            .await;

        // Trigger rule evaluation, with the hook's soft-failure policy.
        request.allow_signature_errors = hook.trigger_signature_soft_failures;
        let matched = match &hook.trigger_rule {
            None => true,
            Some(rule) => {
                let (matched, err) = rule.evaluate(&request);
                if let Some(err) = err {
                    if !err.is_parameter_node() {
                        error!(request_id = %request.id, error = %err,
                            "error evaluating hook rules");
                        return text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            &self.response_headers,
                            RULES_ERROR_BODY,
                        );
                    }
                    warn!(request_id = %request.id, error = %err,
                        "hook rules were not satisfied");
                }
                matched
            }
        };

        if !matched {
            return text_response(
                sanitize_status(hook.trigger_rule_mismatch_http_response_code),
                &self.response_headers,
                RULES_NOT_SATISFIED_BODY,
            );
        }

        info!(request_id = %request.id, hook_id = %hook.id, "hook triggered successfully");

        let mut headers = self.response_headers.clone();
        for header in &hook.response_headers {
            headers.push((header.name.clone(), header.value.clone()));
        }

        self.respond(hook, request, headers, version).await
    }

    /// Select and run the hook's response mode.
    async fn respond(
        &self,
        hook: Arc<Hook>,
        request: HookRequest,
        headers: Vec<(String, String)>,
        version: Version,
    ) -> Response<ResponseBody> {
        let mut stream_output = hook.stream_command_output;

        // Chunked streaming needs HTTP/1.1 or later.
        if stream_output && version == Version::HTTP_10 {
            error!("client does not support chunked responses, falling back to non-streaming mode");
            stream_output = false;
        }

        if stream_output {
            return self.respond_streaming(hook, request, headers);
        }

        if hook.capture_command_output {
            return self.respond_buffered(hook, request, headers).await;
        }

        self.respond_detached(hook, request, headers)
    }

    /// Streamed mode: the status is fixed at 200 before the command runs,
    /// chunks flush as they arrive, and an exit-code trailer ends the body.
    fn respond_streaming(
        &self,
        hook: Arc<Hook>,
        request: HookRequest,
        headers: Vec<(String, String)>,
    ) -> Response<ResponseBody> {
        let (tx, rx) = stream_channel(DEFAULT_STREAM_BUFFER_SIZE);

        tokio::spawn(async move {
            let executor = CommandExecutor::new(hook);
            let exit_code = match executor.execute(&request, tx.clone()).await {
                Ok(()) => 0,
                Err(_) => 1,
            };
            let trailer = format!("\n---\n{}\n", exit_code);
            let _ = tx.send(StreamChunk::from(trailer)).await;
        });

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8");
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder
            .body(stream_body(ChunkFrameStream::new(rx)))
            .unwrap_or_else(|_| {
                text_response(StatusCode::INTERNAL_SERVER_ERROR, &[], "")
            })
    }

    /// Buffered mode: run to completion, bind the status to the exit code
    /// and return the captured output.
    async fn respond_buffered(
        &self,
        hook: Arc<Hook>,
        request: HookRequest,
        headers: Vec<(String, String)>,
    ) -> Response<ResponseBody> {
        let executor = CommandExecutor::new(hook.clone());
        let (output, result) = executor.execute_buffered(&request).await;

        match result {
            Ok(()) => text_response(
                sanitize_status(hook.success_http_response_code),
                &headers,
                output,
            ),
            Err(_) if hook.capture_command_output_on_error => text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &headers,
                output,
            ),
            Err(_) => text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &headers,
                COMMAND_FAILED_BODY,
            ),
        }
    }

    /// Detached mode: acknowledge immediately, discard the output.
    fn respond_detached(
        &self,
        hook: Arc<Hook>,
        request: HookRequest,
        headers: Vec<(String, String)>,
    ) -> Response<ResponseBody> {
        let status = sanitize_status(hook.success_http_response_code);
        let message = hook.response_message.clone();

        tokio::spawn(async move {
            let executor = CommandExecutor::new(hook);
            let _ = executor.execute_buffered(&request).await;
        });

        text_response(status, &headers, message)
    }

    /// Build the normalized request model: headers, query, body and the
    /// decoded payload. Parse failures are logged and leave the request
    /// partially populated rather than aborting.
    async fn build_hook_request(
        &self,
        request_id: String,
        req: http::Request<Incoming>,
        remote_addr: SocketAddr,
        hook: &Hook,
    ) -> HookRequest {
        let (parts, body) = req.into_parts();

        let mut request = HookRequest::new(
            request_id,
            parts.method.as_str(),
            remote_addr.to_string(),
        );

        request.parse_headers(&parts.headers);
        request.parse_query(parts.uri.query());

        request.content_type = if hook.incoming_payload_content_type.is_empty() {
            request.header("Content-Type").unwrap_or("").to_string()
        } else {
            hook.incoming_payload_content_type.clone()
        };

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => {
                error!(request_id = %request.id, error = %err, "error reading the request body");
                Bytes::new()
            }
        };

        let content_type = request.content_type.clone();
        let is_multipart = content_type.starts_with("multipart/form-data");
        if !is_multipart {
            request.body = body.clone();
        }

        if content_type.contains("json") {
            match payload::parse_json(&body) {
                Ok(value) => request.payload = Some(value),
                Err(err) => {
                    error!(request_id = %request.id, error = %err, "error parsing JSON payload")
                }
            }
        } else if content_type.contains("x-www-form-urlencoded") {
            match payload::parse_form(&body) {
                Ok(value) => request.payload = Some(value),
                Err(err) => error!(request_id = %request.id, error = %err,
                    "error parsing form-urlencoded payload"),
            }
        } else if content_type.contains("xml") {
            match payload::xml::parse_xml(&body) {
                Ok(value) => request.payload = Some(value),
                Err(err) => {
                    error!(request_id = %request.id, error = %err, "error parsing XML payload")
                }
            }
        } else if is_multipart {
            match payload::multipart::parse_multipart(
                &content_type,
                body,
                &hook.json_string_parameters,
                self.multipart_max_memory,
            )
            .await
            {
                Ok(map) => request.payload = Some(serde_json::Value::Object(map)),
                Err(err) => {
                    error!(request_id = %request.id, error = %err, "error parsing multipart form")
                }
            }
        } else if !content_type.is_empty() {
            warn!(request_id = %request.id, content_type = %content_type,
                "unsupported content type, skip parsing body payload");
        }

        if let Err(errors) = hook.parse_json_parameters(&mut request) {
            error!(request_id = %request.id, error = %errors, "error parsing JSON parameters");
        }

        request
    }

    /// Map the URL path to a hook ID: `/<prefix>/<id>` where the ID may
    /// itself contain slashes. An empty prefix serves hooks at the root.
    fn hook_id_from_path(&self, path: &str) -> Option<String> {
        let rest = if self.url_prefix.is_empty() {
            path.strip_prefix('/')?
        } else {
            path.strip_prefix(&format!("/{}/", self.url_prefix))?
        };

        if rest.is_empty() {
            return None;
        }

        Some(rest.to_string())
    }

    /// HTTP method gate: the hook's own list wins, then the daemon-global
    /// default list, then anything goes.
    fn is_method_allowed(&self, hook: &Hook, method: &str) -> bool {
        let allowed = if !hook.http_methods.is_empty() {
            &hook.http_methods
        } else if !self.default_methods.is_empty() {
            &self.default_methods
        } else {
            return true;
        };

        allowed
            .iter()
            .any(|m| m.trim().eq_ignore_ascii_case(method))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn pipeline(prefix: &str, default_methods: Vec<String>) -> RequestPipeline {
        let (registry, _rx) = HookRegistry::new(Vec::<PathBuf>::new(), false);
        let config = ServerConfig {
            url_prefix: prefix.to_string(),
            default_http_methods: default_methods,
            ..Default::default()
        };
        RequestPipeline::new(registry, &config)
    }

    #[test]
    fn test_hook_id_from_path() {
        let p = pipeline("hooks", vec![]);
        assert_eq!(p.hook_id_from_path("/hooks/deploy"), Some("deploy".to_string()));
        // Hook IDs may contain slashes.
        assert_eq!(
            p.hook_id_from_path("/hooks/group/deploy"),
            Some("group/deploy".to_string())
        );
        assert_eq!(p.hook_id_from_path("/other/deploy"), None);
        assert_eq!(p.hook_id_from_path("/hooks/"), None);

        let p = pipeline("", vec![]);
        assert_eq!(p.hook_id_from_path("/deploy"), Some("deploy".to_string()));
    }

    #[test]
    fn test_method_gate() {
        let p = pipeline("hooks", vec![]);

        let hook = Hook {
            http_methods: vec!["POST".to_string(), " get ".to_string()],
            ..Default::default()
        };
        assert!(p.is_method_allowed(&hook, "POST"));
        assert!(p.is_method_allowed(&hook, "GET"));
        assert!(!p.is_method_allowed(&hook, "DELETE"));

        // Hook list empty: daemon default applies.
        let p = pipeline("hooks", vec!["POST".to_string()]);
        let hook = Hook::default();
        assert!(p.is_method_allowed(&hook, "POST"));
        assert!(!p.is_method_allowed(&hook, "GET"));

        // Both empty: anything goes.
        let p = pipeline("hooks", vec![]);
        assert!(p.is_method_allowed(&Hook::default(), "PATCH"));
    }
}
