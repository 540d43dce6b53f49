//! In-memory collaborators shared by this crate's unit tests.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use bridge_traits::storage::SecureStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(secs: i64) -> Self {
        Self {
            now: Mutex::new(Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// HTTP double answering by path suffix from scripted queues.
#[derive(Default)]
pub struct ScriptedHttp {
    queued: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    repeated: Mutex<HashMap<String, HttpResponse>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHttp {
    pub fn push(&self, path: &str, status: u16, body: serde_json::Value) {
        self.queued
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(HttpResponse::new(status, body.to_string()));
    }

    pub fn always(&self, path: &str, status: u16, body: serde_json::Value) {
        self.repeated
            .lock()
            .unwrap()
            .insert(path.to_string(), HttpResponse::new(status, body.to_string()));
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.ends_with(path))
            .count()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let path = request
            .url
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();
        self.calls.lock().unwrap().push(path.clone());

        let mut queued = self.queued.lock().unwrap();
        if let Some((_, queue)) = queued.iter_mut().find(|(key, _)| path.ends_with(key.as_str())) {
            if let Some(response) = queue.pop_front() {
                return Ok(response);
            }
        }
        drop(queued);

        let repeated = self.repeated.lock().unwrap();
        Ok(repeated
            .iter()
            .find(|(key, _)| path.ends_with(key.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| HttpResponse::new(404, "")))
    }
}
