//! Scripted transport for tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::ViewerResult;
use crate::transport::{FetchResponse, Transport};

/// Answers GETs from a queue of canned replies and records every URL asked for.
/// The last reply repeats once the queue runs dry.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ViewerResult<FetchResponse>>>,
    last: Mutex<Option<ViewerResult<FetchResponse>>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ViewerResult<FetchResponse>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn get(&self, url: &str) -> ViewerResult<FetchResponse> {
        self.urls.lock().unwrap().push(url.to_string());

        let next = self.replies.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = next {
            *last = Some(reply);
        }
        last.clone().expect("ScriptedTransport has no replies")
    }
}

pub fn ok(status: u16, content_type: Option<&str>, body: &str) -> ViewerResult<FetchResponse> {
    Ok(FetchResponse {
        status,
        content_type: content_type.map(|s| s.to_string()),
        body: body.as_bytes().to_vec(),
    })
}

pub fn json(body: &str) -> ViewerResult<FetchResponse> {
    ok(200, Some("application/json"), body)
}
