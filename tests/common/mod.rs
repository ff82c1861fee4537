#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use time::{Duration as TimeDuration, OffsetDateTime};

#[path = "../../src/testutil/fixtures.rs"]
mod fixtures;

pub use fixtures::{EkOptions, TestPki};

pub const EK_SERIAL: [u8; 4] = [0x0e, 0x4b, 0x00, 0x01];

/// Root and intermediate CA of a fake TPM vendor.
pub type VendorPki = TestPki;

impl TestPki {
    /// An EK certificate issued by the intermediate CA.
    pub fn ek(&self, issuer_urls: &[String], crl_urls: &[String]) -> Vec<u8> {
        self.ek_der(EkOptions {
            issuer_urls: issuer_urls.to_vec(),
            crl_urls: crl_urls.to_vec(),
            serial: EK_SERIAL.to_vec(),
            ..EkOptions::default()
        })
    }

    /// A CRL valid from yesterday to next week.
    pub fn current_crl(&self, revoked: &[&[u8]]) -> Vec<u8> {
        let now = OffsetDateTime::now_utc();
        self.crl(
            revoked,
            now - TimeDuration::days(1),
            now + TimeDuration::days(7),
        )
    }

    /// Write the vendor hierarchy into a trust bundle directory.
    pub fn write_bundle(&self, dir: &std::path::Path, vendor: &str, with_intermediate: bool) {
        let vendor_dir = dir.join(vendor);
        std::fs::create_dir_all(&vendor_dir).unwrap();
        std::fs::write(vendor_dir.join("root.der"), &self.root_der).unwrap();
        if with_intermediate {
            std::fs::write(vendor_dir.join("intermediate.der"), &self.intermediate_der).unwrap();
        }
    }
}

#[derive(Clone)]
struct Route {
    status: StatusCode,
    body: Vec<u8>,
    delay: Option<Duration>,
}

#[derive(Default)]
struct Routes {
    routes: HashMap<String, Route>,
    hits: AtomicUsize,
}

/// Builder of a local HTTP server playing the vendor PKI endpoints.
#[derive(Default)]
pub struct PkiServer {
    routes: HashMap<String, Route>,
}

impl PkiServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(mut self, path: &str, body: Vec<u8>) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status: StatusCode::OK,
                body,
                delay: None,
            },
        );
        self
    }

    pub fn status(mut self, path: &str, status: StatusCode) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status,
                body: Vec::new(),
                delay: None,
            },
        );
        self
    }

    pub fn delayed(mut self, path: &str, body: Vec<u8>, delay: Duration) -> Self {
        self.routes.insert(
            path.to_string(),
            Route {
                status: StatusCode::OK,
                body,
                delay: Some(delay),
            },
        );
        self
    }

    // Spawn the server on a random port
    pub async fn spawn(self) -> RunningServer {
        let state = Arc::new(Routes {
            routes: self.routes,
            hits: AtomicUsize::new(0),
        });
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("failed to run server");
        });

        RunningServer {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

pub struct RunningServer {
    pub base_url: String,
    state: Arc<Routes>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Number of requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn handle(State(state): State<Arc<Routes>>, uri: Uri) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let Some(route) = state.routes.get(uri.path()).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if let Some(delay) = route.delay {
        tokio::time::sleep(delay).await;
    }
    (route.status, route.body).into_response()
}
