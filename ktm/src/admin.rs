use std::net::SocketAddr;
use std::time::Instant;

use ktm_core::metrics::REGISTRY;
use prometheus::{
    Encoder,
    TextEncoder,
};
use rocket::fairing::{
    Fairing,
    Info,
    Kind,
};
use rocket::{
    Data,
    Request,
    Response,
};
use tracing::info;

/// Logs every admin request as a single `info`-level line recording method, path, status, and
/// duration, mirroring a standard access-log line without a bespoke formatter.
pub struct RequestLog;

#[rocket::async_trait]
impl Fairing for RequestLog {
    fn info(&self) -> Info {
        Info { name: "request log", kind: Kind::Request | Kind::Response }
    }

    async fn on_request(&self, req: &mut Request<'_>, _data: &mut Data<'_>) {
        req.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, req: &'r Request<'_>, res: &mut Response<'r>) {
        let started = *req.local_cache(Instant::now);
        info!(
            method = %req.method(),
            path = %req.uri(),
            status = res.status().code,
            duration_ms = started.elapsed().as_millis() as u64,
            "admin request"
        );
    }
}

#[rocket::get("/metrics")]
fn metrics() -> (rocket::http::ContentType, String) {
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(error) = TextEncoder::new().encode(&families, &mut buf) {
        tracing::warn!(%error, "failed to encode prometheus metrics");
    }
    (rocket::http::ContentType::Text, String::from_utf8_lossy(&buf).into_owned())
}

/// `net/http/pprof`'s well-known path has no direct Rust stdlib equivalent; this exists so
/// operators probing it get a clear "not implemented here" response instead of a bare 404.
#[rocket::get("/debug/pprof")]
fn pprof_placeholder() -> &'static str {
    "on-demand profiling is not implemented by this build; see /metrics"
}

pub fn serve(listen_address: &str) -> anyhow::Result<rocket::Rocket<rocket::Build>> {
    let addr: SocketAddr = listen_address.parse()?;
    let config = rocket::Config { address: addr.ip(), port: addr.port(), ..Default::default() };

    Ok(rocket::custom(&config).attach(RequestLog).mount("/", rocket::routes![metrics, pprof_placeholder]))
}
