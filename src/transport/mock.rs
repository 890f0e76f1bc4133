use super::{FileUpload, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
}

#[derive(Debug, Clone)]
enum Reply {
    Body(Vec<u8>),
    Status(u16),
    Fail(String, String),
}

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    pattern: String,
    reply: Reply,
}

/// A request seen by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub fields: Vec<(String, String)>,
    pub files: Vec<FileUpload>,
}

/// Scripted transport. A request is answered by the route with the longest
/// pattern contained in its url; unmatched requests fail with code `"mock"`.
/// A route whose pattern is contained in an uploaded file's path wins over
/// url-only matches, so uploads of different files can be told apart.
#[derive(Clone)]
pub struct MockTransport {
    routes: Arc<Mutex<Vec<Route>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    clear_count: Arc<Mutex<usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            clear_count: Arc::new(Mutex::new(0)),
        }
    }

    fn with_route(self, method: Method, pattern: &str, reply: Reply) -> Self {
        self.routes.lock().unwrap().push(Route {
            method,
            pattern: pattern.to_string(),
            reply,
        });
        self
    }

    pub fn with_get(self, pattern: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_route(Method::Get, pattern, Reply::Body(body.into()))
    }

    pub fn with_get_failure(self, pattern: &str, code: &str, message: &str) -> Self {
        self.with_route(
            Method::Get,
            pattern,
            Reply::Fail(code.to_string(), message.to_string()),
        )
    }

    pub fn with_head(self, pattern: &str, status: u16) -> Self {
        self.with_route(Method::Head, pattern, Reply::Status(status))
    }

    pub fn with_post(self, pattern: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_route(Method::Post, pattern, Reply::Body(body.into()))
    }

    pub fn with_post_failure(self, pattern: &str, code: &str, message: &str) -> Self {
        self.with_route(
            Method::Post,
            pattern,
            Reply::Fail(code.to_string(), message.to_string()),
        )
    }

    pub fn get_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn get_clear_count(&self) -> usize {
        *self.clear_count.lock().unwrap()
    }

    fn respond(
        &self,
        method: Method,
        url: &str,
        fields: &[(String, String)],
        files: &[FileUpload],
    ) -> Result<Reply> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            url: url.to_string(),
            fields: fields.to_vec(),
            files: files.to_vec(),
        });

        let uploads_match = |pattern: &str| {
            files
                .iter()
                .any(|file| file.path.to_string_lossy().contains(pattern))
        };

        self.routes
            .lock()
            .unwrap()
            .iter()
            .filter(|route| route.method == method)
            .filter_map(|route| {
                if uploads_match(&route.pattern) {
                    Some(((true, route.pattern.len()), route))
                } else if url.contains(&route.pattern) {
                    Some(((false, route.pattern.len()), route))
                } else {
                    None
                }
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, route)| route.reply.clone())
            .ok_or_else(|| Error::transport("mock", format!("No route for {:?} {}", method, url)))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn into_body(reply: Reply) -> Result<Vec<u8>> {
    match reply {
        Reply::Body(body) => Ok(body),
        Reply::Status(status) => Err(Error::transport(
            format!("status {}", status),
            "Mock status reply",
        )),
        Reply::Fail(code, message) => Err(Error::transport(code, message)),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        into_body(self.respond(Method::Get, url, &[], &[])?)
    }

    async fn head(&self, url: &str) -> Result<u16> {
        match self.respond(Method::Head, url, &[], &[])? {
            Reply::Status(status) => Ok(status),
            Reply::Body(_) => Ok(200),
            Reply::Fail(code, message) => Err(Error::transport(code, message)),
        }
    }

    async fn post_multipart(
        &self,
        url: &str,
        fields: &[(String, String)],
        files: &[FileUpload],
    ) -> Result<Vec<u8>> {
        into_body(self.respond(Method::Post, url, fields, files)?)
    }

    fn clear_session(&self) -> Result<()> {
        *self.clear_count.lock().unwrap() += 1;
        Ok(())
    }
}
