use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use std::sync::Mutex;

/// Routes by method and URL path, replaying queued responses; the last
/// response of a route repeats. Unknown routes answer 404.
#[derive(Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<(HttpMethod, String, Vec<HttpResponse>)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn route(&self, method: HttpMethod, path: &str, status: u16, body: serde_json::Value) {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        let response = HttpResponse::new(status, body);
        let mut routes = self.routes.lock().unwrap();
        match routes
            .iter_mut()
            .find(|(m, p, _)| *m == method && p == path)
        {
            Some((_, _, queue)) => queue.push(response),
            None => routes.push((method, path.to_string(), vec![response])),
        }
    }

    pub fn get(&self, path: &str, body: serde_json::Value) {
        self.route(HttpMethod::Get, path, 200, body);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: HttpMethod, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && path_of(&r.url) == path)
            .collect()
    }
}

pub fn path_of(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    path.split('?').next().unwrap_or_default().to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned());
    value
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let path = path_of(&request.url);

        let mut routes = self.routes.lock().unwrap();
        let Some((_, _, queue)) = routes
            .iter_mut()
            .find(|(m, p, _)| *m == request.method && *p == path)
        else {
            return Ok(HttpResponse::new(404, ""));
        };
        if queue.len() > 1 {
            Ok(queue.remove(0))
        } else {
            Ok(queue[0].clone())
        }
    }
}
