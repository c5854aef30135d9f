//! Shared fixtures for integration tests: token endpoint mocks, fast-retry
//! sessions, scripted responders, and on-disk mirror builders.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sentinel_core::auth::{
    AuthSession, ResolvedCredentials, SessionConfig, TokenEndpoint, TokenManager,
};
use sentinel_core::download::RetryPolicy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

pub const TOKEN_PATH: &str = "/auth/token";
pub const CLIENT_ID: &str = "test-client";

/// Token grant body with the given access token.
pub fn token_body(access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "expires_in": 600,
        "refresh_token": format!("refresh-{access_token}"),
        "refresh_expires_in": 3600,
    })
}

/// Mounts a token endpoint that always grants `access_token`.
pub async fn mount_token_endpoint(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token)))
        .mount(server)
        .await;
}

/// Session settings pointing at `server`, with millisecond backoff.
pub fn fast_session_config(server: &MockServer, max_attempts: u32) -> SessionConfig {
    SessionConfig {
        token_endpoint: token_endpoint(server),
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(10),
        retry_policy: RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(5),
            2.0,
        ),
    }
}

pub fn token_endpoint(server: &MockServer) -> TokenEndpoint {
    TokenEndpoint {
        url: format!("{}{TOKEN_PATH}", server.uri()),
        client_id: CLIENT_ID.to_string(),
    }
}

/// Opens a session against the mocked token endpoint.
pub async fn open_session(server: &MockServer, max_attempts: u32) -> AuthSession {
    let config = fast_session_config(server, max_attempts);
    let tokens = TokenManager::new(
        config.token_endpoint.clone(),
        ResolvedCredentials::new("alice", "s3cret"),
    )
    .expect("token manager");
    AuthSession::open(Arc::new(tokens), &config)
        .await
        .expect("session should open")
}

/// Responder returning its templates in order, repeating the last one.
pub struct SequenceResponder {
    request_count: Arc<AtomicUsize>,
    responses: Vec<ResponseTemplate>,
}

impl SequenceResponder {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(!responses.is_empty(), "at least one response required");
        Self {
            request_count: Arc::new(AtomicUsize::new(0)),
            responses,
        }
    }

    /// Shared counter of requests answered so far.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.request_count)
    }
}

impl Respond for SequenceResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

/// Responder that fails the first `fail_count` requests with `fail_status`.
pub struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    fail_status: u16,
    success_body: Vec<u8>,
}

impl FlakyResponder {
    pub fn new(fail_count: usize, fail_status: u16, success_body: &[u8]) -> Self {
        Self {
            request_count: Arc::new(AtomicUsize::new(0)),
            fail_count,
            fail_status,
            success_body: success_body.to_vec(),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.request_count)
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let n = self.request_count.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_count {
            ResponseTemplate::new(self.fail_status)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.success_body.clone())
        }
    }
}

/// Node path under the product, e.g. `/odata/v1/Products(id)/Nodes(a)/Nodes(b)`.
pub fn node_path(scene_id: &str, segments: &[&str]) -> String {
    let mut path = format!("/odata/v1/Products({scene_id})");
    for segment in segments {
        path.push_str(&format!("/Nodes({segment})"));
    }
    path
}

/// Mounts a listing of `children` at `segments`.
pub async fn mount_listing(server: &MockServer, scene_id: &str, segments: &[&str], children: &[&str]) {
    let result: Vec<serde_json::Value> = children
        .iter()
        .map(|name| serde_json::json!({ "Name": name }))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("{}/Nodes", node_path(scene_id, segments))))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": result })))
        .mount(server)
        .await;
}

/// Mounts HEAD and GET for a file node.
pub async fn mount_file(server: &MockServer, scene_id: &str, segments: &[&str], body: &[u8]) {
    let content = format!("{}/$value", node_path(scene_id, segments));
    Mock::given(method("HEAD"))
        .and(path(content.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(content))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

/// Minimal JP2 file: signature, ftyp, jp2h/ihdr, and a stub codestream.
pub fn jp2_bytes(width: u32, height: u32, bits_per_component: u8) -> Vec<u8> {
    let boxed = |kind: &[u8; 4], body: &[u8]| {
        let len = u32::try_from(body.len() + 8).expect("small box");
        let mut out = len.to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    };

    let mut ihdr = Vec::new();
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&1u16.to_be_bytes());
    ihdr.extend_from_slice(&[bits_per_component - 1, 7, 0, 0]);

    let mut bytes = boxed(b"jP  ", &[0x0d, 0x0a, 0x87, 0x0a]);
    bytes.extend(boxed(b"ftyp", b"jp2 \0\0\0\0jp2 "));
    bytes.extend(boxed(b"jp2h", &boxed(b"ihdr", &ihdr)));
    bytes.extend(boxed(b"jp2c", &[0xff, 0x4f]));
    bytes
}

/// Tile metadata carrying geocoding for the 10, 20 and 60 m tiers.
pub const TILE_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-2A_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-2A_Tile_Metadata.xsd">
  <n1:Geometric_Info>
    <Tile_Geocoding metadataLevel="Brief">
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 32N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:32632</HORIZONTAL_CS_CODE>
      <Size resolution="10"><NROWS>10980</NROWS><NCOLS>10980</NCOLS></Size>
      <Size resolution="20"><NROWS>5490</NROWS><NCOLS>5490</NCOLS></Size>
      <Size resolution="60"><NROWS>1830</NROWS><NCOLS>1830</NCOLS></Size>
      <Geoposition resolution="10"><ULX>600000</ULX><ULY>5100000</ULY><XDIM>10</XDIM><YDIM>-10</YDIM></Geoposition>
      <Geoposition resolution="20"><ULX>600000</ULX><ULY>5100000</ULY><XDIM>20</XDIM><YDIM>-20</YDIM></Geoposition>
      <Geoposition resolution="60"><ULX>600000</ULX><ULY>5100000</ULY><XDIM>60</XDIM><YDIM>-60</YDIM></Geoposition>
    </Tile_Geocoding>
  </n1:Geometric_Info>
</n1:Level-2A_Tile_ID>
"#;

/// Writes a one-granule SAFE archive holding `bands` at `resolution`, plus
/// the SCL band and tile metadata. Returns the `IMG_DATA/R{res}m` directory.
pub fn write_safe_mirror(
    root: &Path,
    safe_name: &str,
    tile: &str,
    date: &str,
    bands: &[&str],
    resolution: u32,
) -> PathBuf {
    let granule = root
        .join(safe_name)
        .join("GRANULE")
        .join(format!("L2A_{tile}_A000001_{date}T103021"));
    let tier = granule.join("IMG_DATA").join(format!("R{resolution}m"));
    std::fs::create_dir_all(&tier).expect("create tier dir");
    std::fs::write(granule.join("MTD_TL.xml"), TILE_METADATA).expect("write tile metadata");

    let side = 10_980 / (resolution / 10);
    for band in bands.iter().copied().chain(["SCL"]) {
        let bits = if band == "SCL" { 8 } else { 15 };
        let name = format!("{tile}_{date}T103021_{band}_{resolution}m.jp2");
        std::fs::write(tier.join(name), jp2_bytes(side, side, bits)).expect("write band");
    }
    tier
}
