use actix_web::{web, App, HttpResponse, HttpServer};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Serve `/metrics` for `registry` on `port`.
///
/// Runs its own actix system; call it from a dedicated thread so scrapes never
/// queue behind agent traffic.
pub async fn start_metrics_server(registry: Arc<Registry>, port: u16) -> std::io::Result<()> {
    tracing::info!(port, "📊 Serving metrics on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .configure(metrics_routes)
    })
    .workers(1)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

fn metrics_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(scrape));
}

/// Text exposition of everything gathered from `registry`.
fn render(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn scrape(registry: web::Data<Arc<Registry>>) -> HttpResponse {
    match render(&registry) {
        Ok(body) => HttpResponse::Ok()
            .content_type(EXPOSITION_CONTENT_TYPE)
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}
