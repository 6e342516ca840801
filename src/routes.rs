use actix_web::web;

use crate::handlers;

/// Protocol and REST routes. Every operation here runs through the dispatcher pipeline.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mcp/request", web::post().to(handlers::mcp_handlers::mcp_request));

    cfg.service(
        web::scope("/resources")
            .route("", web::get().to(handlers::rest_handlers::list_resources))
            .route("/{resource}", web::get().to(handlers::rest_handlers::read_resource_list))
            .route("/{resource}/{id}", web::get().to(handlers::rest_handlers::read_resource_item)),
    );
    cfg.service(
        web::scope("/tools")
            .route("", web::get().to(handlers::rest_handlers::list_tools))
            .route("/{name}", web::post().to(handlers::rest_handlers::call_tool)),
    );
    cfg.service(
        web::scope("/prompts")
            .route("", web::get().to(handlers::rest_handlers::list_prompts))
            .route("/{name}", web::post().to(handlers::rest_handlers::get_prompt)),
    );
    cfg.route("/capabilities", web::get().to(handlers::rest_handlers::get_capabilities));
    cfg.route("/auth/token", web::post().to(handlers::auth_handlers::issue_token));
}

/// Routes that bypass authentication and rate limiting.
pub fn configure_public_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health::health_check));
    cfg.route("/metrics", web::get().to(handlers::metrics_handlers::get_metrics));
}
